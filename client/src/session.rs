use crate::{
    channel::DEFAULT_RECONNECT_INTERVAL,
    fallback::{PollTargets, DEFAULT_POLL_INTERVAL},
    inbox::DEFAULT_LIMIT,
    BetController, Channel, Client, FallbackPoller, NotificationInbox, WalletLedger,
};
use std::time::Duration;
use tracing::{info, warn};

/// Tunables of a [Session].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub reconnect_interval: Duration,
    pub poll_interval: Duration,
    pub notification_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notification_limit: DEFAULT_LIMIT,
        }
    }
}

/// Every view of one signed-in user, kept in sync by one channel.
pub struct Session {
    channel: Channel,
    bets: BetController,
    wallet: WalletLedger,
    inbox: NotificationInbox,
    poller: Option<FallbackPoller>,
}

impl Session {
    /// Loads the initial views and connects the channel.
    ///
    /// Failed initial fetches are logged and left to the fallback poller.
    pub async fn start(client: Client, options: SessionOptions) -> Self {
        let user_id = client.user_id().to_string();
        let wallet = WalletLedger::new(client.clone());
        let bets = BetController::new(client.clone(), wallet.clone());
        let inbox = NotificationInbox::new(client.clone(), options.notification_limit);
        let channel = Channel::new(client).with_reconnect_interval(options.reconnect_interval);

        bets.attach(&channel);
        wallet.attach(&channel);
        inbox.attach(&channel);

        let targets = PollTargets {
            bets: bets.clone(),
            wallet: wallet.clone(),
            inbox: inbox.clone(),
        };
        let (mine, snapshot, notifications) = tokio::join!(
            targets.bets.load_mine(),
            targets.wallet.refresh(),
            targets.inbox.refresh()
        );
        if let Err(err) = mine {
            warn!(?err, "failed to load bets");
        }
        if let Err(err) = snapshot {
            warn!(?err, "failed to load wallet");
        }
        if let Err(err) = notifications {
            warn!(?err, "failed to load notifications");
        }

        let poller = FallbackPoller::start(channel.watch_state(), options.poll_interval, targets);
        channel.connect(&user_id);
        info!(user_id, "session started");

        Self {
            channel,
            bets,
            wallet,
            inbox,
            poller: Some(poller),
        }
    }

    /// Disconnects the channel and stops all background work.
    pub fn stop(&mut self) {
        self.poller.take();
        self.channel.disconnect();
        info!("session stopped");
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn bets(&self) -> &BetController {
        &self.bets
    }

    pub fn wallet(&self) -> &WalletLedger {
        &self.wallet
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }
}
