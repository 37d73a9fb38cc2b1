use crate::{lock, Channel, Client, HandlerId, Result};
use chrono::{DateTime, Utc};
use ringside_types::{EventKind, RealtimeEvent, WalletSnapshot, WalletUpdate};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Inner {
    client: Client,
    snapshot: watch::Sender<Option<WalletSnapshot>>,
    /// Timestamp of the newest pushed snapshot applied so far.
    updated_at: Mutex<Option<DateTime<Utc>>>,
}

/// Read-only mirror of the user's wallet.
///
/// The snapshot is only ever replaced by a server-confirmed value: either a
/// `GET /wallet/balance` result or a wallet push. Balances are never adjusted
/// locally.
#[derive(Clone)]
pub struct WalletLedger {
    inner: Arc<Inner>,
}

impl WalletLedger {
    pub fn new(client: Client) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                client,
                snapshot,
                updated_at: Mutex::new(None),
            }),
        }
    }

    /// Last confirmed snapshot, if one was received yet.
    pub fn snapshot(&self) -> Option<WalletSnapshot> {
        *self.inner.snapshot.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<WalletSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Replaces the snapshot with the server's current balances.
    pub async fn refresh(&self) -> Result<WalletSnapshot> {
        let snapshot = self.inner.client.wallet_balance().await?;
        debug!(?snapshot, "wallet refreshed");
        self.inner.snapshot.send_replace(Some(snapshot));
        Ok(snapshot)
    }

    /// Applies a pushed snapshot unless a newer one was applied already.
    ///
    /// Returns whether the snapshot changed.
    pub fn apply(&self, update: &WalletUpdate) -> bool {
        {
            let mut updated_at = lock(&self.inner.updated_at);
            match (*updated_at, update.updated_at) {
                (Some(latest), Some(at)) if at < latest => {
                    debug!(%at, %latest, "ignoring stale wallet update");
                    return false;
                }
                (_, Some(at)) => *updated_at = Some(at),
                (_, None) => {}
            }
        }
        self.inner.snapshot.send_if_modified(|current| {
            if *current == Some(update.snapshot) {
                return false;
            }
            *current = Some(update.snapshot);
            true
        })
    }

    /// Applies wallet related pushes.
    ///
    /// A confirmed transaction triggers a refresh on the current tokio
    /// runtime.
    pub fn handle_event(&self, event: &RealtimeEvent) {
        match event {
            RealtimeEvent::WalletUpdated(update) => {
                self.apply(update);
            }
            RealtimeEvent::TransactionConfirmed(transaction) => {
                info!(id = transaction.id, kind = ?transaction.kind, "transaction confirmed");
                let ledger = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = ledger.refresh().await {
                        warn!(?err, "failed to refresh wallet");
                    }
                });
            }
            RealtimeEvent::TransactionFailed(transaction) => {
                warn!(
                    id = transaction.id,
                    kind = ?transaction.kind,
                    reason = transaction.reason.as_deref().unwrap_or_default(),
                    "transaction failed"
                );
            }
            _ => {}
        }
    }

    /// Keeps the ledger in sync with `channel`.
    pub fn attach(&self, channel: &Channel) -> HandlerId {
        let ledger = self.clone();
        channel.on_many(
            &[
                EventKind::WalletUpdated,
                EventKind::TransactionConfirmed,
                EventKind::TransactionFailed,
            ],
            move |event| ledger.handle_event(event),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Credentials;
    use chrono::TimeZone;

    fn ledger() -> WalletLedger {
        let client = Client::new("http://127.0.0.1:1/api", Credentials::new("alice", "t")).unwrap();
        WalletLedger::new(client)
    }

    fn update(balance: u64, at: Option<i64>) -> WalletUpdate {
        WalletUpdate {
            snapshot: WalletSnapshot {
                balance,
                locked_balance: 0,
                bonus_balance: 0,
            },
            updated_at: at.map(|minute| {
                Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap()
                    + chrono::Duration::minutes(minute)
            }),
        }
    }

    #[test]
    fn test_newer_updates_win() {
        let ledger = ledger();
        assert!(ledger.snapshot().is_none());

        assert!(ledger.apply(&update(100, Some(2))));
        assert_eq!(ledger.snapshot().unwrap().balance, 100);

        // Older update arriving late is ignored
        assert!(!ledger.apply(&update(50, Some(1))));
        assert_eq!(ledger.snapshot().unwrap().balance, 100);

        // Same update twice changes nothing
        assert!(ledger.apply(&update(70, Some(3))));
        assert!(!ledger.apply(&update(70, Some(3))));

        // Untimed updates always apply
        assert!(ledger.apply(&update(10, None)));
        assert_eq!(ledger.snapshot().unwrap().balance, 10);
    }

    #[test]
    fn test_handle_event_notifies_watchers() {
        let ledger = ledger();
        let mut watcher = ledger.watch();
        ledger.handle_event(&RealtimeEvent::WalletUpdated(update(500, Some(0))));
        assert!(watcher.has_changed().unwrap());
        assert_eq!(watcher.borrow_and_update().unwrap().balance, 500);
    }
}
