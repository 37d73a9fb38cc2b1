//! Push channel shared by every view of a session.
//!
//! A [Channel] owns at most one connection to the push endpoint at a time.
//! A single supervisor task dials, subscribes to the user's bet events,
//! dispatches every decoded event to the handlers registered for its
//! [EventKind], and redials on a fixed interval after an unexpected close.
//! [Channel::disconnect] aborts the supervisor so nothing reconnects behind
//! the caller's back.

use crate::{lock, Client, CommandSender, Error};
use ringside_types::{Command, EventKind, RealtimeEvent};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, error::TryRecvError},
        watch,
    },
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

/// Delay between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
}

impl ChannelState {
    /// Whether pushes may currently be missed.
    pub fn is_degraded(self) -> bool {
        matches!(self, ChannelState::Connecting | ChannelState::Reconnecting)
    }
}

/// Handle returned when registering a handler, used to remove it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

struct Shared {
    client: Client,
    reconnect_interval: Mutex<Duration>,
    handlers: Mutex<BTreeMap<EventKind, Vec<(HandlerId, Handler)>>>,
    next_handler: AtomicU64,
    state: watch::Sender<ChannelState>,
    commands: Mutex<Option<CommandSender>>,
    /// Bumped on every connect and disconnect. A supervisor only acts while
    /// the epoch it was started with is current.
    epoch: AtomicU64,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn publish(&self, epoch: u64, state: ChannelState) {
        self.state.send_if_modified(|current| {
            if !self.is_current(epoch) || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn set_commands(&self, epoch: u64, commands: Option<CommandSender>) {
        let mut slot = lock(&self.commands);
        if self.is_current(epoch) {
            *slot = commands;
        }
    }

    fn remove(&self, id: HandlerId) -> bool {
        let mut removed = false;
        let mut handlers = lock(&self.handlers);
        for registered in handlers.values_mut() {
            let before = registered.len();
            registered.retain(|(registered_id, _)| *registered_id != id);
            removed |= registered.len() != before;
        }
        handlers.retain(|_, registered| !registered.is_empty());
        removed
    }

    fn dispatch(&self, event: &RealtimeEvent) {
        let handlers = {
            let handlers = lock(&self.handlers);
            handlers.get(&event.kind()).cloned().unwrap_or_default()
        };
        debug!(kind = ?event.kind(), handlers = handlers.len(), "dispatching event");
        for (_, handler) in handlers {
            handler(event);
        }
    }
}

struct Connection {
    user_id: String,
    supervisor: JoinHandle<()>,
}

/// Realtime synchronization channel for one session.
///
/// Dropping the channel disconnects it.
pub struct Channel {
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl Channel {
    pub fn new(client: Client) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            shared: Arc::new(Shared {
                client,
                reconnect_interval: Mutex::new(DEFAULT_RECONNECT_INTERVAL),
                handlers: Mutex::new(BTreeMap::new()),
                next_handler: AtomicU64::new(0),
                state,
                commands: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
            connection: Mutex::new(None),
        }
    }

    /// Returns the channel with a different reconnection delay.
    pub fn with_reconnect_interval(self, reconnect_interval: Duration) -> Self {
        self.set_reconnect_interval(reconnect_interval);
        self
    }

    /// Changes the delay used from the next reconnection attempt on.
    pub fn set_reconnect_interval(&self, reconnect_interval: Duration) {
        *lock(&self.shared.reconnect_interval) = reconnect_interval;
    }

    /// Registers `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.on_many(&[kind], handler)
    }

    /// Registers one handler for several kinds under a single id.
    pub fn on_many<F>(&self, kinds: &[EventKind], handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(handler);
        let mut handlers = lock(&self.shared.handlers);
        for kind in kinds {
            handlers
                .entry(*kind)
                .or_default()
                .push((id, handler.clone()));
        }
        id
    }

    /// Removes a handler. Returns whether it was registered.
    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.remove(id)
    }

    /// Forwards events of the given kinds into a [Listener].
    ///
    /// Dropping the listener removes its handler.
    pub fn listen(&self, kinds: &[EventKind]) -> Listener {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = self.on_many(kinds, move |event| {
            let _ = tx.send(event.clone());
        });
        Listener {
            id,
            receiver,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Opens the connection for `user_id`.
    ///
    /// Connecting again as the same user is a no-op; connecting as another
    /// user replaces the current connection. Must be called inside a tokio
    /// runtime.
    pub fn connect(&self, user_id: &str) {
        let mut connection = lock(&self.connection);
        if let Some(current) = connection.as_ref() {
            if current.user_id == user_id && !current.supervisor.is_finished() {
                debug!(user_id, "already connected");
                return;
            }
        }
        if let Some(previous) = connection.take() {
            self.stop(previous);
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!(user_id, "connecting channel");
        let supervisor = tokio::spawn(supervise(
            self.shared.clone(),
            user_id.to_string(),
            epoch,
        ));
        *connection = Some(Connection {
            user_id: user_id.to_string(),
            supervisor,
        });
    }

    /// Closes the connection and cancels any pending reconnection.
    pub fn disconnect(&self) {
        let Some(connection) = lock(&self.connection).take() else {
            return;
        };
        info!(user_id = connection.user_id, "disconnecting channel");
        self.stop(connection);
    }

    fn stop(&self, connection: Connection) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        connection.supervisor.abort();
        if let Some(commands) = lock(&self.shared.commands).take() {
            let _ = commands.try_send(Command::UnsubscribeBets {
                user_id: connection.user_id,
            });
        }
        self.shared.state.send_replace(ChannelState::Idle);
    }

    /// Sends a command on the open connection.
    ///
    /// Returns `false` (and drops the command) when not connected.
    pub fn send(&self, command: Command) -> bool {
        let commands = lock(&self.shared.commands).clone();
        let Some(commands) = commands else {
            warn!(?command, "channel not connected, dropping command");
            return false;
        };
        match commands.try_send(command) {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, "failed to queue command");
                false
            }
        }
    }

    /// User the channel is connected (or connecting) as.
    pub fn user_id(&self) -> Option<String> {
        lock(&self.connection)
            .as_ref()
            .map(|connection| connection.user_id.clone())
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Events forwarded by [Channel::listen].
pub struct Listener {
    id: HandlerId,
    receiver: mpsc::UnboundedReceiver<RealtimeEvent>,
    shared: Weak<Shared>,
}

impl Listener {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Next event, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<RealtimeEvent, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}

async fn supervise(shared: Arc<Shared>, user_id: String, epoch: u64) {
    let mut attempt = 0u64;
    loop {
        let state = if attempt == 0 {
            ChannelState::Connecting
        } else {
            ChannelState::Reconnecting
        };
        shared.publish(epoch, state);

        match shared.client.connect_events().await {
            Ok(mut stream) => {
                let commands = stream.sender();
                let subscribe = Command::SubscribeBets {
                    user_id: user_id.clone(),
                };
                if let Err(err) = commands.send(subscribe).await {
                    warn!(?err, "failed to subscribe");
                } else {
                    shared.set_commands(epoch, Some(commands));
                    shared.publish(epoch, ChannelState::Connected);
                    info!(user_id, attempt, "channel connected");
                    attempt = 0;

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => {
                                if !shared.is_current(epoch) {
                                    return;
                                }
                                shared.dispatch(&event);
                            }
                            Err(Error::InvalidFrame(err)) => {
                                warn!(?err, "dropping malformed frame");
                            }
                            Err(err) => {
                                warn!(?err, "channel disconnected");
                                break;
                            }
                        }
                    }
                    shared.set_commands(epoch, None);
                }
            }
            Err(err) => {
                warn!(?err, attempt, "failed to connect channel");
            }
        }

        if !shared.is_current(epoch) {
            return;
        }
        attempt += 1;
        shared.publish(epoch, ChannelState::Reconnecting);
        let delay = *lock(&shared.reconnect_interval);
        debug!(?delay, attempt, "scheduling reconnect");
        sleep(delay).await;
    }
}
