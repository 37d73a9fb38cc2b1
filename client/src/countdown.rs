//! Countdown to a bet's cancellation deadline.
//!
//! The remaining time is recomputed from a [Clock] on every tick rather than
//! decremented, so a late tick never accumulates drift.

use chrono::{DateTime, Utc};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::debug;

const TICK: Duration = Duration::from_secs(1);

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[cfg(any(test, feature = "mocks"))]
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<std::sync::Mutex<DateTime<Utc>>>,
}

#[cfg(any(test, feature = "mocks"))]
impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(std::sync::Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *crate::lock(&self.now) = now;
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(by) = chrono::Duration::from_std(by) {
            *crate::lock(&self.now) += by;
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *crate::lock(&self.now)
    }
}

/// Whole seconds left until a deadline, never negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Remaining {
    total_seconds: u64,
}

impl Remaining {
    pub const ZERO: Remaining = Remaining { total_seconds: 0 };

    /// Time left at `now`, rounded down. A missing deadline has already passed.
    pub fn between(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(deadline) = deadline else {
            return Self::ZERO;
        };
        let left = deadline.signed_duration_since(now).num_seconds();
        Self {
            total_seconds: u64::try_from(left).unwrap_or(0),
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.total_seconds
    }

    pub fn minutes(&self) -> u64 {
        self.total_seconds / 60
    }

    pub fn seconds(&self) -> u64 {
        self.total_seconds % 60
    }

    pub fn is_expired(&self) -> bool {
        self.total_seconds == 0
    }

    /// `MM:SS`, the way the window is shown to users.
    pub fn formatted(&self) -> String {
        format!("{:02}:{:02}", self.minutes(), self.seconds())
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes(), self.seconds())
    }
}

/// Ticking countdown published on a watch channel.
///
/// The ticker stops on its own once the deadline passes and is aborted when
/// the timer is stopped or dropped. Must be started inside a tokio runtime.
pub struct CountdownTimer {
    clock: Arc<dyn Clock>,
    sender: Arc<watch::Sender<Remaining>>,
    deadline: Option<DateTime<Utc>>,
    handle: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    pub fn start(deadline: Option<DateTime<Utc>>, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = watch::channel(Remaining::between(deadline, clock.now()));
        let mut timer = Self {
            clock,
            sender: Arc::new(sender),
            deadline,
            handle: None,
        };
        timer.spawn();
        timer
    }

    /// Points the countdown at a new deadline, keeping existing watchers.
    pub fn restart(&mut self, deadline: Option<DateTime<Utc>>) {
        self.stop();
        self.deadline = deadline;
        self.sender
            .send_replace(Remaining::between(deadline, self.clock.now()));
        self.spawn();
    }

    /// Stops ticking. The last published value stays readable.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn remaining(&self) -> Remaining {
        *self.sender.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn watch(&self) -> watch::Receiver<Remaining> {
        self.sender.subscribe()
    }

    fn spawn(&mut self) {
        if self.remaining().is_expired() {
            return;
        }
        let clock = self.clock.clone();
        let sender = self.sender.clone();
        let deadline = self.deadline;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let remaining = Remaining::between(deadline, clock.now());
                sender.send_if_modified(|current| {
                    if *current == remaining {
                        return false;
                    }
                    *current = remaining;
                    true
                });
                if remaining.is_expired() {
                    debug!(?deadline, "countdown expired");
                    break;
                }
            }
        }));
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap()
    }

    #[test]
    fn test_remaining() {
        let now = start();
        let remaining = Remaining::between(Some(now + chrono::Duration::seconds(125)), now);
        assert_eq!(remaining.minutes(), 2);
        assert_eq!(remaining.seconds(), 5);
        assert_eq!(remaining.formatted(), "02:05");
        assert!(!remaining.is_expired());

        // Partial seconds round down
        let remaining =
            Remaining::between(Some(now + chrono::Duration::milliseconds(1999)), now);
        assert_eq!(remaining.total_seconds(), 1);

        let window = Remaining::between(Some(now + chrono::Duration::minutes(20)), now);
        assert_eq!(window.to_string(), "20:00");

        assert!(Remaining::between(None, now).is_expired());
    }

    #[test]
    fn test_past_deadline_is_expired() {
        let now = start();
        let remaining = Remaining::between(Some(now - chrono::Duration::seconds(1)), now);
        assert!(remaining.is_expired());
        assert_eq!(remaining.formatted(), "00:00");
        assert_eq!(remaining, Remaining::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_until_expired() {
        let clock = ManualClock::new(start());
        let deadline = start() + chrono::Duration::seconds(3);
        let timer = CountdownTimer::start(Some(deadline), Arc::new(clock.clone()));
        let mut remaining = timer.watch();
        assert_eq!(remaining.borrow().total_seconds(), 3);

        clock.advance(Duration::from_secs(1));
        remaining.changed().await.unwrap();
        assert_eq!(remaining.borrow().formatted(), "00:02");

        clock.advance(Duration::from_secs(5));
        remaining.changed().await.unwrap();
        assert!(remaining.borrow().is_expired());

        // The ticker exits once expired
        tokio::time::sleep(TICK * 2).await;
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_timer_never_ticks() {
        let clock = Arc::new(ManualClock::new(start()));
        let timer = CountdownTimer::start(Some(start() - chrono::Duration::seconds(1)), clock);
        assert!(timer.remaining().is_expired());
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart() {
        let clock = ManualClock::new(start());
        let mut timer = CountdownTimer::start(None, Arc::new(clock.clone()));
        let remaining = timer.watch();
        assert!(remaining.borrow().is_expired());

        timer.restart(Some(start() + chrono::Duration::minutes(20)));
        assert_eq!(remaining.borrow().formatted(), "20:00");
        assert!(timer.is_running());

        timer.stop();
        assert!(!timer.is_running());
        assert_eq!(timer.remaining().formatted(), "20:00");
    }
}
