//! Client core for peer-to-peer fight wagering.
//!
//! [Client] speaks the REST API and opens the push endpoint. On top of it sit
//! the long-lived views a front end renders: [BetController] mirrors bets and
//! drives their lifecycle, [WalletLedger] and [NotificationInbox] mirror the
//! wallet and the inbox, and [Channel] keeps all of them in sync with server
//! pushes. [Session] wires everything together for one user.

pub mod bets;
pub mod channel;
pub mod client;
pub mod config;
pub mod countdown;
pub mod events;
pub mod fallback;
pub mod inbox;
pub mod session;
pub mod wallet;

pub use bets::{reconcile::Reconciled, BetController};
pub use channel::{Channel, ChannelState, HandlerId, Listener};
pub use client::{Client, Credentials, RetryPolicy};
pub use config::{Config, ConfigError, ValidatedConfig};
pub use countdown::{Clock, CountdownTimer, Remaining, SystemClock};
pub use events::{CommandSender, Stream};
pub use fallback::FallbackPoller;
pub use inbox::NotificationInbox;
pub use session::{Session, SessionOptions};
pub use wallet::WalletLedger;

#[cfg(any(test, feature = "mocks"))]
pub use countdown::ManualClock;

use ringside_types::DecodeError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// A command the user is not allowed to issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount is outside the fight's bet limits")]
    InvalidAmount,
    #[error("fight is not open for betting")]
    FightNotOpen,
    #[error("fight operators may not bet on their own fight")]
    OperatorBet,
    #[error("you cannot accept your own bet")]
    SelfAcceptance,
    #[error("insufficient balance")]
    InsufficientFunds,
    #[error("only the creator may cancel a bet")]
    NotCreator,
}

/// A command that lost a race against another state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum StateConflict {
    #[error("bet was already accepted")]
    AlreadyAccepted,
    #[error("the cancellation window has expired")]
    WindowExpired,
    #[error("bet is already settled")]
    AlreadySettled,
    #[error("bet was cancelled")]
    AlreadyCancelled,
}

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid frame: {0}")]
    InvalidFrame(DecodeError),
    #[error("failed: {message} ({status})")]
    Failed {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error(transparent)]
    Invalid(ValidationError),
    #[error(transparent)]
    Conflict(StateConflict),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
    /// Failure of a request that several callers joined.
    #[error(transparent)]
    Shared(Arc<Error>),
}

/// Coarse classification of an [Error], for callers that branch on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The command can never succeed as issued.
    Validation,
    /// The bet moved on before the command arrived.
    StateConflict,
    /// The request may succeed if tried again later.
    TransientNetwork,
    /// The push channel is not connected.
    ChannelDisconnected,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Invalid(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::StateConflict,
            Error::Reqwest(_) | Error::DialTimeout => ErrorKind::TransientNetwork,
            Error::Failed { status, .. } if status.is_server_error() => {
                ErrorKind::TransientNetwork
            }
            Error::Tungstenite(_) | Error::ConnectionClosed => ErrorKind::ChannelDisconnected,
            Error::Shared(inner) => inner.kind(),
            _ => ErrorKind::Other,
        }
    }

    /// The conflict behind this error, if it is one.
    pub fn conflict(&self) -> Option<StateConflict> {
        match self {
            Error::Conflict(conflict) => Some(*conflict),
            Error::Shared(inner) => inner.conflict(),
            _ => None,
        }
    }

    /// The validation failure behind this error, if it is one.
    pub fn validation(&self) -> Option<ValidationError> {
        match self {
            Error::Invalid(invalid) => Some(*invalid),
            Error::Shared(inner) => inner.validation(),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Locks `mutex`, ignoring poisoning (no state is left half-written).
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ringside_simulator::{Api, Audience, Simulator};
    use ringside_types::{
        BetStatus, BetUpdate, EventKind, Fight, FightResult, FightStatus, FighterRef,
        NotificationType, RealtimeEvent, Side, Winner,
    };
    use std::{net::SocketAddr, time::Duration};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct TestContext {
        simulator: Arc<Simulator>,
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new() -> Self {
            let simulator = Arc::new(Simulator::new());
            simulator.add_fight(fight("F1", None));
            simulator.add_fight(fight("F2", Some("operator")));
            for user in ["alice", "bob", "operator"] {
                simulator.deposit(user, 100_000);
            }
            let api = Api::new(simulator.clone());

            // Start server on random port
            let addr = SocketAddr::from(([127, 0, 0, 1], 0));
            let router = api.router();
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let actual_addr = listener.local_addr().unwrap();
            let base_url = format!("http://{actual_addr}/api");

            let server_handle = tokio::spawn(async move {
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                .unwrap();
            });

            Self {
                simulator,
                base_url,
                server_handle,
            }
        }

        fn create_client(&self, user_id: &str) -> Client {
            // The simulator accepts the user id as bearer token
            Client::new(&self.base_url, Credentials::new(user_id, user_id)).unwrap()
        }

        fn create_controller(&self, user_id: &str) -> BetController {
            let client = self.create_client(user_id);
            BetController::new(client.clone(), WalletLedger::new(client))
        }

        fn create_channel(&self, user_id: &str) -> Channel {
            Channel::new(self.create_client(user_id))
                .with_reconnect_interval(Duration::from_millis(100))
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    fn fight(id: &str, operator: Option<&str>) -> Fight {
        Fight {
            id: id.to_string(),
            title: format!("Main event {id}"),
            status: FightStatus::Scheduled,
            fighter_a: FighterRef {
                id: format!("{id}-a"),
                name: "Red corner".to_string(),
            },
            fighter_b: FighterRef {
                id: format!("{id}-b"),
                name: "Blue corner".to_string(),
            },
            scheduled_at: Utc::now() + chrono::Duration::days(1),
            min_bet_amount: 100,
            max_bet_amount: 1_000_000,
            operator_id: operator.map(str::to_string),
            result: None,
        }
    }

    async fn wait_for_state(channel: &Channel, state: ChannelState) {
        let mut states = channel.watch_state();
        timeout(WAIT, states.wait_for(|current| *current == state))
            .await
            .expect("timed out waiting for channel state")
            .unwrap();
    }

    /// Waits until the server confirmed the bet subscription of `channel`.
    async fn wait_subscribed(events: &mut Listener) {
        timeout(WAIT, async {
            while let Some(event) = events.recv().await {
                if let RealtimeEvent::ConnectionStatus { message } = &event {
                    if message.starts_with("subscribed") {
                        return;
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for subscription");
    }

    #[tokio::test]
    async fn test_create_then_cancel() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");

        let bet = alice.create("F1", Side::A, 5000).await.unwrap();
        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(bet.amount, 5000);
        assert_eq!(
            bet.can_cancel_until,
            Some(bet.created_at + chrono::Duration::minutes(20))
        );
        assert!(bet.potential_win.is_some());
        assert!(alice.can_cancel(&bet.id));
        assert_eq!(alice.pending_count(), 1);

        // Stake is locked
        let wallet = alice.wallet().snapshot().unwrap();
        assert_eq!(wallet.balance, 95_000);
        assert_eq!(wallet.locked_balance, 5000);

        let cancelled = alice.cancel(&bet.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, BetStatus::Cancelled);
        assert_eq!(alice.bet(&bet.id).unwrap().status, BetStatus::Cancelled);
        assert_eq!(alice.pending_count(), 0);

        // Stake is released
        let wallet = alice.wallet().snapshot().unwrap();
        assert_eq!(wallet.balance, 100_000);
        assert_eq!(wallet.locked_balance, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_acceptance() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");

        let bet = alice.create("F1", Side::A, 5000).await.unwrap();
        let accepted = bob.accept(&bet.id).await.unwrap();
        assert_eq!(accepted.status, BetStatus::Accepted);
        assert_eq!(accepted.acceptor_id.as_deref(), Some("bob"));

        // Alice still mirrors the pending record, so the server refuses
        let err = alice.cancel(&bet.id).await.unwrap_err();
        assert_eq!(err.conflict(), Some(StateConflict::AlreadyAccepted));
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        // The conflict forced a reconciliation fetch
        assert_eq!(alice.bet(&bet.id).unwrap().status, BetStatus::Accepted);
        assert_eq!(
            ctx.simulator.bet(&bet.id).unwrap().status,
            BetStatus::Accepted
        );

        // Now the precheck refuses without a round trip
        let err = alice.cancel(&bet.id).await.unwrap_err();
        assert_eq!(err.conflict(), Some(StateConflict::AlreadyAccepted));
    }

    #[tokio::test]
    async fn test_cancel_after_window() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");

        let bet = alice.create("F1", Side::B, 1000).await.unwrap();
        ctx.simulator.advance(Duration::from_secs(20 * 60));

        let err = alice.cancel(&bet.id).await.unwrap_err();
        assert_eq!(err.conflict(), Some(StateConflict::WindowExpired));
        assert_eq!(alice.bet(&bet.id).unwrap().status, BetStatus::Pending);
    }

    #[tokio::test]
    async fn test_only_creator_cancels() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");

        let bet = alice.create("F1", Side::A, 1000).await.unwrap();

        // Bob never saw the bet, so the server decides
        let err = bob.cancel(&bet.id).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::NotCreator));

        // With the record mirrored the precheck decides
        bob.refresh(&bet.id).await.unwrap();
        let err = bob.cancel(&bet.id).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::NotCreator));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_self_acceptance() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");

        let bet = alice.create("F1", Side::A, 1000).await.unwrap();
        let err = alice.accept(&bet.id).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::SelfAcceptance));

        // Server enforces the same rule
        let err = ctx
            .create_client("alice")
            .accept_bet(&bet.id)
            .await
            .unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::SelfAcceptance));
    }

    #[tokio::test]
    async fn test_stake_rules() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let operator = ctx.create_controller("operator");

        let err = alice.create("F1", Side::A, 50).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::InvalidAmount));
        let err = alice.create("F1", Side::A, 2_000_000).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::InvalidAmount));

        let err = operator.create("F2", Side::A, 1000).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::OperatorBet));

        let err = alice.create("F1", Side::A, 500_000).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::InsufficientFunds));

        ctx.simulator
            .set_fight_status("F2", FightStatus::Ongoing)
            .unwrap();
        let err = alice.create("F2", Side::A, 1000).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::FightNotOpen));

        let err = alice.create("missing", Side::A, 1000).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // Nothing was staked
        assert!(alice.bets().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_accepts_join() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");

        let bet = alice.create("F1", Side::A, 1000).await.unwrap();
        bob.refresh(&bet.id).await.unwrap();

        let (first, second) = tokio::join!(bob.accept(&bet.id), bob.accept(&bet.id));
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, BetStatus::Accepted);

        // Only one stake was locked
        let wallet = ctx.simulator.wallet("bob");
        assert_eq!(wallet.locked_balance, 1000);
    }

    #[tokio::test]
    async fn test_settlement() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");

        let bet = alice.create("F1", Side::A, 10_000).await.unwrap();
        let refund = alice.create("F1", Side::B, 1000).await.unwrap();
        bob.accept(&bet.id).await.unwrap();

        ctx.simulator
            .record_result(
                "F1",
                FightResult {
                    winner: Winner::B,
                    victory_method: Some("KO".to_string()),
                },
            )
            .unwrap();

        let mine = bob.load_mine().await.unwrap();
        assert_eq!(mine.accepted.len(), 1);
        let settled = bob.bet(&bet.id).unwrap();
        assert_eq!(settled.status, BetStatus::Lost);
        assert_eq!(
            settled.outcome_for("bob"),
            Some(ringside_types::Outcome::Won)
        );
        assert_eq!(
            settled.outcome_for("alice"),
            Some(ringside_types::Outcome::Lost)
        );

        alice.load_mine().await.unwrap();
        assert_eq!(
            alice.bet(&refund.id).unwrap().status,
            BetStatus::Refunded
        );

        // Winner takes the pot minus commission
        let payout = settled.potential_win.unwrap();
        assert_eq!(payout, 18_000);
        let wallet = bob.wallet().refresh().await.unwrap();
        assert_eq!(wallet.balance, 100_000 - 10_000 + payout);
        assert_eq!(wallet.locked_balance, 0);
    }

    #[tokio::test]
    async fn test_available_bets() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");

        let bet = alice.create("F1", Side::A, 1000).await.unwrap();
        alice.create("F1", Side::B, 2000).await.unwrap();

        let open = bob.available("F1").await.unwrap();
        assert_eq!(open.len(), 2);
        bob.accept(&bet.id).await.unwrap();
        assert_eq!(bob.available("F1").await.unwrap().len(), 1);

        // A user's own bets are not offered to them
        assert!(alice.available("F1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_push_updates_views() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");
        let inbox = NotificationInbox::new(ctx.create_client("alice"), 20);

        let channel = ctx.create_channel("alice");
        alice.attach(&channel);
        alice.wallet().attach(&channel);
        inbox.attach(&channel);
        let mut events = channel.listen(&EventKind::ALL);
        channel.connect("alice");
        wait_for_state(&channel, ChannelState::Connected).await;
        wait_subscribed(&mut events).await;

        let bet = alice.create("F1", Side::A, 1000).await.unwrap();
        bob.accept(&bet.id).await.unwrap();

        // Alice learns about the acceptance from the push alone
        timeout(WAIT, async {
            while let Some(event) = events.recv().await {
                if event.kind() == EventKind::BetAccepted {
                    return;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(alice.bet(&bet.id).unwrap().status, BetStatus::Accepted);

        // The acceptance notification lands in the inbox
        timeout(WAIT, async {
            loop {
                if inbox
                    .notifications()
                    .iter()
                    .any(|n| n.kind == NotificationType::BetAccepted)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(inbox.unread_count(), inbox.notifications().len() as u64);

        channel.disconnect();
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_out_of_order_after_reconnect() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let bob = ctx.create_controller("bob");

        let channel = ctx.create_channel("alice");
        alice.attach(&channel);
        let mut events = channel.listen(&EventKind::ALL);
        channel.connect("alice");
        wait_for_state(&channel, ChannelState::Connected).await;
        wait_subscribed(&mut events).await;

        let pending = alice.create("F1", Side::A, 1000).await.unwrap();
        let accepted = bob.accept(&pending.id).await.unwrap();

        // Drop the connection and wait for the supervisor to bring it back
        ctx.simulator.disconnect_all();
        wait_for_state(&channel, ChannelState::Reconnecting).await;
        wait_for_state(&channel, ChannelState::Connected).await;
        wait_subscribed(&mut events).await;

        // Newer event first, older second
        let audience = Audience::Users(vec!["alice".to_string()]);
        let t2 = accepted.asserted_at();
        let t1 = pending.asserted_at();
        assert!(t1 < t2);
        ctx.simulator.publish(
            audience.clone(),
            RealtimeEvent::BetAccepted(BetUpdate {
                bet: accepted.clone(),
                timestamp: t2,
            }),
        );
        ctx.simulator.publish(
            audience,
            RealtimeEvent::BetCreated(BetUpdate {
                bet: pending.clone(),
                timestamp: t1,
            }),
        );

        timeout(WAIT, async {
            let mut seen = 0;
            while let Some(event) = events.recv().await {
                if event.bet_update().map(|u| u.bet.id == pending.id) == Some(true)
                    && (event.bet_update().map(|u| u.timestamp) == Some(t1)
                        || event.bet_update().map(|u| u.timestamp) == Some(t2))
                {
                    seen += 1;
                    if seen == 2 {
                        return;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(alice.bet(&pending.id).unwrap(), accepted);

        channel.disconnect();
    }

    #[tokio::test]
    async fn test_no_reconnect_after_disconnect() {
        let ctx = TestContext::new().await;
        let channel = ctx.create_channel("alice");
        channel.connect("alice");
        wait_for_state(&channel, ChannelState::Connected).await;

        channel.disconnect();
        assert_eq!(channel.state(), ChannelState::Idle);

        // Several reconnect intervals pass without a new connection
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(ctx.simulator.connections(), 0);

        // Sending while disconnected is a no-op
        assert!(!channel.send(ringside_types::Command::Ping));
    }

    #[tokio::test]
    async fn test_reconnects_when_server_starts_late() {
        // Reserve a port, release it, and only serve on it later
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(
            &format!("http://{addr}/api"),
            Credentials::new("alice", "alice"),
        )
        .unwrap();
        let channel = Channel::new(client).with_reconnect_interval(Duration::from_millis(100));
        channel.connect("alice");
        wait_for_state(&channel, ChannelState::Reconnecting).await;

        let simulator = Arc::new(Simulator::new());
        let router = Api::new(simulator).router();
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        wait_for_state(&channel, ChannelState::Connected).await;
        channel.disconnect();
        server.abort();
    }

    #[tokio::test]
    async fn test_fight_events_update_cache() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        let channel = ctx.create_channel("alice");
        alice.attach(&channel);
        let mut events = channel.listen(&EventKind::ALL);
        channel.connect("alice");
        wait_for_state(&channel, ChannelState::Connected).await;
        wait_subscribed(&mut events).await;

        assert_eq!(
            alice.fight("F1").await.unwrap().status,
            FightStatus::Scheduled
        );
        ctx.simulator
            .set_fight_status("F1", FightStatus::Ongoing)
            .unwrap();
        timeout(WAIT, async {
            while let Some(event) = events.recv().await {
                if event.kind() == EventKind::FightStatusChanged {
                    return;
                }
            }
        })
        .await
        .unwrap();

        // Cached fight is closed, so the precheck refuses
        let err = alice.create("F1", Side::A, 1000).await.unwrap_err();
        assert_eq!(err.validation(), Some(ValidationError::FightNotOpen));

        channel.disconnect();
    }

    #[tokio::test]
    async fn test_session() {
        let ctx = TestContext::new().await;
        let options = SessionOptions {
            reconnect_interval: Duration::from_millis(100),
            ..SessionOptions::default()
        };
        let mut session = Session::start(ctx.create_client("bob"), options).await;
        wait_for_state(session.channel(), ChannelState::Connected).await;

        // Initial fetches populated the views
        assert_eq!(session.wallet().snapshot().unwrap().balance, 100_000);
        let notifications = session.inbox().notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationType::DepositSuccess);
        assert_eq!(session.inbox().unread_count(), 1);

        // Commands refresh the shared wallet view
        let bet = session.bets().create("F1", Side::B, 1000).await.unwrap();
        assert_eq!(session.wallet().snapshot().unwrap().locked_balance, 1000);
        assert_eq!(session.bets().bet(&bet.id).unwrap().status, BetStatus::Pending);

        session.stop();
        assert_eq!(session.channel().state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_session_catches_up_after_outage() {
        let ctx = TestContext::new().await;
        let options = SessionOptions {
            reconnect_interval: Duration::from_secs(1),
            ..SessionOptions::default()
        };
        let mut session = Session::start(ctx.create_client("alice"), options).await;
        wait_for_state(session.channel(), ChannelState::Connected).await;
        let bet = session.bets().create("F1", Side::A, 1000).await.unwrap();

        // Bob accepts while alice has no connection, so the push is lost
        ctx.simulator.disconnect_all();
        wait_for_state(session.channel(), ChannelState::Reconnecting).await;
        ctx.create_client("bob").accept_bet(&bet.id).await.unwrap();
        assert_eq!(
            session.bets().bet(&bet.id).unwrap().status,
            BetStatus::Pending
        );

        // Reconnecting refreshes the views well before the next poll period
        wait_for_state(session.channel(), ChannelState::Connected).await;
        timeout(WAIT, async {
            while session.bets().bet(&bet.id).map(|bet| bet.status) != Some(BetStatus::Accepted) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!session.bets().can_cancel(&bet.id));
        assert_eq!(session.bets().pending_count(), 0);

        session.stop();
    }

    #[tokio::test]
    async fn test_inbox_edits() {
        let ctx = TestContext::new().await;
        let alice = ctx.create_controller("alice");
        alice.create("F1", Side::A, 1000).await.unwrap();
        alice.create("F1", Side::B, 1000).await.unwrap();
        alice.create("F1", Side::B, 2000).await.unwrap();

        let inbox = NotificationInbox::new(ctx.create_client("alice"), 20);
        assert_eq!(inbox.refresh().await.unwrap(), 4);
        assert_eq!(inbox.unread_count(), 4);
        let newest = inbox.notifications()[0].clone();
        assert_eq!(newest.kind, NotificationType::BetPlaced);

        inbox.mark_as_read(&newest.id).await.unwrap();
        assert_eq!(inbox.unread_count(), 3);
        assert!(inbox.notifications()[0].read_at.is_some());
        assert_eq!(ctx.simulator.unread_count("alice"), 3);

        // Deleting an unread notification lowers the counter by one
        let unread = inbox.notifications()[1].clone();
        assert!(!unread.is_read);
        inbox.delete(&unread.id).await.unwrap();
        assert_eq!(inbox.unread_count(), 2);
        assert_eq!(ctx.simulator.unread_count("alice"), 2);

        assert_eq!(inbox.mark_all_as_read().await.unwrap(), 2);
        assert_eq!(inbox.unread_count(), 0);

        // Deleting a read one leaves it alone
        inbox.delete(&newest.id).await.unwrap();
        assert_eq!(inbox.unread_count(), 0);
        assert_eq!(inbox.notifications().len(), 2);
        assert_eq!(ctx.simulator.notifications("alice", 20).len(), 2);

        // A second delete is refused and the view is left alone
        let err = inbox.delete(&newest.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(inbox.notifications().len(), 2);
        assert_eq!(inbox.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_unread_count_beyond_page() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client("alice");
        for _ in 0..25 {
            client
                .create_bet(&ringside_types::CreateBet {
                    fight_id: "F1".to_string(),
                    chosen_fighter: Side::A,
                    amount: 100,
                })
                .await
                .unwrap();
        }
        assert_eq!(ctx.simulator.unread_count("alice"), 26);

        let inbox = NotificationInbox::new(client, 20);
        assert_eq!(inbox.refresh().await.unwrap(), 20);
        assert_eq!(inbox.unread_count(), 26);

        let newest = inbox.notifications()[0].id.clone();
        inbox.mark_as_read(&newest).await.unwrap();
        assert_eq!(inbox.unread_count(), 25);
        assert_eq!(ctx.simulator.unread_count("alice"), 25);

        assert_eq!(inbox.mark_all_as_read().await.unwrap(), 25);
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn test_error_kinds() {
        let err = Error::Shared(Arc::new(Error::Conflict(StateConflict::AlreadySettled)));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(err.conflict(), Some(StateConflict::AlreadySettled));
        assert_eq!(err.to_string(), "bet is already settled");

        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::ChannelDisconnected);
        assert_eq!(Error::DialTimeout.kind(), ErrorKind::TransientNetwork);
        let err = Error::Failed {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            message: "down".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(Error::NotFound("bet".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_client_invalid_scheme() {
        let result = Client::new("ftp://example.com", Credentials::new("a", "t"));
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(matches!(err, Error::InvalidScheme(_)));
            assert_eq!(
                err.to_string(),
                "invalid URL scheme: ftp (expected http or https)"
            );
        }

        assert!(Client::new("http://localhost:8080", Credentials::new("a", "t")).is_ok());
        assert!(Client::new("https://localhost:8080", Credentials::new("a", "t")).is_ok());
    }
}
