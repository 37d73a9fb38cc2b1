//! Mirror of the user's notifications.
//!
//! Only the most recent page of notifications is held, so the unread counter
//! is seeded from the server's own count and then moved by pushes and edits.
//! It never goes below zero.
//!
//! Local edits are optimistic: the change is visible immediately and rolled
//! back if the server refuses it. Errors are returned to the caller, nothing
//! is retried.

use crate::{lock, Channel, Client, HandlerId, Result};
use chrono::Utc;
use ringside_types::{EventKind, Notification, RealtimeEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Number of notifications fetched by default.
pub const DEFAULT_LIMIT: usize = 20;

struct Inner {
    client: Client,
    limit: usize,
    notifications: watch::Sender<Vec<Notification>>,
    unread: watch::Sender<u64>,
    /// Serializes optimistic edits with their rollbacks.
    edits: Mutex<()>,
}

#[derive(Clone)]
pub struct NotificationInbox {
    inner: Arc<Inner>,
}

impl NotificationInbox {
    pub fn new(client: Client, limit: usize) -> Self {
        let (notifications, _) = watch::channel(Vec::new());
        let (unread, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                client,
                limit,
                notifications,
                unread,
                edits: Mutex::new(()),
            }),
        }
    }

    /// Notifications, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.notifications.borrow().clone()
    }

    /// Unread notifications on the server, including ones beyond the held page.
    pub fn unread_count(&self) -> u64 {
        *self.inner.unread.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Notification>> {
        self.inner.notifications.subscribe()
    }

    pub fn watch_unread(&self) -> watch::Receiver<u64> {
        self.inner.unread.subscribe()
    }

    /// Replaces the inbox with the server's most recent notifications and
    /// unread count. Returns how many notifications are held.
    pub async fn refresh(&self) -> Result<usize> {
        let (mut fetched, unread) = tokio::try_join!(
            self.inner.client.notifications(self.inner.limit),
            self.inner.client.unread_count()
        )?;
        sort(&mut fetched);
        let count = fetched.len();
        {
            let _edit = lock(&self.inner.edits);
            self.inner.notifications.send_replace(fetched);
            self.inner.unread.send_replace(unread);
        }
        debug!(count, unread, "inbox refreshed");
        Ok(count)
    }

    /// Inserts a pushed notification. Returns `false` for one already held.
    pub fn push(&self, notification: Notification) -> bool {
        let _edit = lock(&self.inner.edits);
        self.insert(notification)
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<()> {
        let previous = {
            let _edit = lock(&self.inner.edits);
            let mut previous = None;
            self.inner.notifications.send_if_modified(|notifications| {
                let Some(held) = notifications.iter_mut().find(|held| held.id == id) else {
                    return false;
                };
                if held.is_read {
                    return false;
                }
                previous = Some(held.clone());
                held.mark_read(Utc::now());
                true
            });
            if previous.is_some() {
                self.adjust_unread(-1);
            }
            previous
        };

        match self.inner.client.mark_notification_read(id).await {
            Ok(confirmed) => {
                let _edit = lock(&self.inner.edits);
                self.replace(confirmed);
                Ok(())
            }
            Err(err) => {
                warn!(?err, id, "failed to mark notification read");
                if let Some(previous) = previous {
                    let _edit = lock(&self.inner.edits);
                    if self.replace(previous) {
                        self.adjust_unread(1);
                    }
                }
                Err(err)
            }
        }
    }

    /// Returns how many notifications the server marked.
    pub async fn mark_all_as_read(&self) -> Result<u64> {
        let (previous, unread): (Vec<Notification>, u64) = {
            let _edit = lock(&self.inner.edits);
            let mut previous = Vec::new();
            let now = Utc::now();
            self.inner.notifications.send_if_modified(|notifications| {
                for held in notifications.iter_mut().filter(|held| !held.is_read) {
                    previous.push(held.clone());
                    held.mark_read(now);
                }
                !previous.is_empty()
            });
            (previous, self.inner.unread.send_replace(0))
        };

        match self.inner.client.mark_all_notifications_read().await {
            Ok(updated) => Ok(updated),
            Err(err) => {
                warn!(?err, "failed to mark notifications read");
                let _edit = lock(&self.inner.edits);
                for notification in previous {
                    self.replace(notification);
                }
                self.inner.unread.send_replace(unread);
                Err(err)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = {
            let _edit = lock(&self.inner.edits);
            let mut removed = None;
            self.inner.notifications.send_if_modified(|notifications| {
                let Some(index) = notifications.iter().position(|held| held.id == id) else {
                    return false;
                };
                removed = Some(notifications.remove(index));
                true
            });
            if removed.as_ref().is_some_and(|removed| !removed.is_read) {
                self.adjust_unread(-1);
            }
            removed
        };

        match self.inner.client.delete_notification(id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(?err, id, "failed to delete notification");
                if let Some(removed) = removed {
                    let _edit = lock(&self.inner.edits);
                    self.insert(removed);
                }
                Err(err)
            }
        }
    }

    pub fn handle_event(&self, event: &RealtimeEvent) {
        if let RealtimeEvent::Notification(notification) = event {
            self.push(notification.clone());
        }
    }

    /// Feeds pushed notifications into the inbox.
    pub fn attach(&self, channel: &Channel) -> HandlerId {
        let inbox = self.clone();
        channel.on(EventKind::Notification, move |event| {
            inbox.handle_event(event)
        })
    }

    /// Adds `notification` unless already held, counting it if unread.
    /// Callers hold the edit lock.
    fn insert(&self, notification: Notification) -> bool {
        let unread = !notification.is_read;
        let inserted = self.inner.notifications.send_if_modified(|notifications| {
            if notifications.iter().any(|held| held.id == notification.id) {
                debug!(id = notification.id, "duplicate notification");
                return false;
            }
            insert_sorted(notifications, notification);
            true
        });
        if inserted && unread {
            self.adjust_unread(1);
        }
        inserted
    }

    /// Moves the unread counter by `delta`, flooring at zero.
    fn adjust_unread(&self, delta: i64) {
        self.inner.unread.send_modify(|unread| {
            *unread = if delta < 0 {
                unread.saturating_sub(delta.unsigned_abs())
            } else {
                unread.saturating_add(delta.unsigned_abs())
            };
        });
    }

    /// Swaps in `notification` for the held entry with the same id. Callers
    /// hold the edit lock.
    fn replace(&self, notification: Notification) -> bool {
        self.inner.notifications.send_if_modified(|notifications| {
            match notifications
                .iter_mut()
                .find(|held| held.id == notification.id)
            {
                Some(held) if *held != notification => {
                    *held = notification;
                    true
                }
                _ => false,
            }
        })
    }
}

fn sort(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn insert_sorted(notifications: &mut Vec<Notification>, notification: Notification) {
    let index = notifications
        .iter()
        .position(|held| held.created_at < notification.created_at)
        .unwrap_or(notifications.len());
    notifications.insert(index, notification);
}
