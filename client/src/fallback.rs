//! Periodic refresh while pushes may be missed.
//!
//! Polling never decides anything on its own: it only re-reads server records
//! through the same merge paths pushes use. It runs only while the channel is
//! dialing and idles while the channel is idle. Once the channel is connected
//! again it polls one last time to pick up pushes sent during the outage, then
//! stops.

use crate::{BetController, ChannelState, NotificationInbox, WalletLedger};
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Refresh cadence while degraded.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Views refreshed on every poll.
#[derive(Clone)]
pub struct PollTargets {
    pub bets: BetController,
    pub wallet: WalletLedger,
    pub inbox: NotificationInbox,
}

impl PollTargets {
    /// Refreshes every target once, logging failures.
    pub async fn poll(&self) {
        let (bets, wallet, inbox) = tokio::join!(
            self.bets.load_mine(),
            self.wallet.refresh(),
            self.inbox.refresh()
        );
        if let Err(err) = bets {
            warn!(?err, "failed to poll bets");
        }
        if let Err(err) = wallet {
            warn!(?err, "failed to poll wallet");
        }
        if let Err(err) = inbox {
            warn!(?err, "failed to poll notifications");
        }
    }
}

/// Background poller, stopped when dropped.
pub struct FallbackPoller {
    handle: JoinHandle<()>,
}

impl FallbackPoller {
    pub fn start(
        state: watch::Receiver<ChannelState>,
        period: Duration,
        targets: PollTargets,
    ) -> Self {
        Self {
            handle: tokio::spawn(run(state, period, targets)),
        }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(mut state: watch::Receiver<ChannelState>, period: Duration, targets: PollTargets) {
    loop {
        if state.wait_for(|state| state.is_degraded()).await.is_err() {
            return;
        }
        info!(?period, "channel degraded, polling");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let recovered = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("polling");
                    targets.poll().await;
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let current = *state.borrow_and_update();
                    if !current.is_degraded() {
                        break current == ChannelState::Connected;
                    }
                }
            }
        };
        if recovered {
            // Pushes sent while no connection was open are gone
            debug!("catching up after reconnect");
            targets.poll().await;
            info!("channel recovered, polling stopped");
        } else {
            info!("channel idle, polling stopped");
        }
    }
}
