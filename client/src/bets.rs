//! Bet lifecycle: commands, local mirror and reconciliation.
//!
//! ```text
//! PENDING ──accept──▶ ACCEPTED ──result──▶ WON | LOST | REFUNDED
//!    │
//!    ├──cancel (creator, inside the window)──▶ CANCELLED
//!    └──fight closes unaccepted──────────────▶ REFUNDED
//! ```
//!
//! The controller never invents a status. Every record it holds was returned
//! by the server, either as a command response, a fetch or a push, and is
//! merged through [reconcile::decide].

use crate::{
    countdown::{Clock, CountdownTimer, SystemClock},
    lock, Channel, Client, Error, HandlerId, Result, WalletLedger,
};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use ringside_types::{
    Bet, BetStatus, CreateBet, ErrorCode, EventKind, Fight, FightStatus, MyBets, Outcome,
    RealtimeEvent, Side,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod reconcile {
    //! Pure merge rule for mirrored bet records.

    use chrono::{DateTime, Utc};
    use ringside_types::Bet;
    use std::collections::HashMap;

    /// A mirrored record and the timestamp of the assertion it came from.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Entry {
        pub bet: Bet,
        pub as_of: DateTime<Utc>,
    }

    /// What merging an incoming record did to the mirror.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Reconciled {
        /// First record seen for this bet.
        Inserted,
        /// The incoming record replaced the mirrored one.
        Updated,
        /// The incoming record is already mirrored.
        Duplicate,
        /// The incoming record is older than the mirrored one.
        Stale,
        /// The mirrored record is terminal.
        Frozen,
        /// The incoming status would move the bet backwards.
        Regressed,
    }

    impl Reconciled {
        pub fn applied(self) -> bool {
            matches!(self, Reconciled::Inserted | Reconciled::Updated)
        }
    }

    /// Decides whether `incoming`, asserted at `at`, replaces `local`.
    pub fn decide(local: Option<&Entry>, incoming: &Bet, at: DateTime<Utc>) -> Reconciled {
        let Some(local) = local else {
            return Reconciled::Inserted;
        };
        if local.bet == *incoming {
            return Reconciled::Duplicate;
        }
        if local.bet.status.is_terminal() {
            return Reconciled::Frozen;
        }
        if at < local.as_of {
            return Reconciled::Stale;
        }
        if !local.bet.status.can_advance_to(incoming.status) {
            return Reconciled::Regressed;
        }
        Reconciled::Updated
    }

    /// Merges `incoming` into `mirror`.
    pub fn apply(mirror: &mut HashMap<String, Entry>, incoming: Bet, at: DateTime<Utc>) -> Reconciled {
        let outcome = decide(mirror.get(&incoming.id), &incoming, at);
        if outcome.applied() {
            mirror.insert(
                incoming.id.clone(),
                Entry {
                    bet: incoming,
                    as_of: at,
                },
            );
        }
        outcome
    }
}

use reconcile::{Entry, Reconciled};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Action {
    Accept,
    Cancel,
}

type SharedCommand<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

#[derive(Default)]
struct State {
    bets: HashMap<String, Entry>,
    fights: HashMap<String, Fight>,
}

struct Inner {
    client: Client,
    wallet: WalletLedger,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    accepts: Mutex<HashMap<String, SharedCommand<Bet>>>,
    cancels: Mutex<HashMap<String, SharedCommand<Option<Bet>>>>,
    updates: broadcast::Sender<Bet>,
}

/// Drives bets through their lifecycle and mirrors every bet the user has
/// seen.
#[derive(Clone)]
pub struct BetController {
    inner: Arc<Inner>,
}

impl BetController {
    pub fn new(client: Client, wallet: WalletLedger) -> Self {
        Self::with_clock(client, wallet, Arc::new(SystemClock))
    }

    pub fn with_clock(client: Client, wallet: WalletLedger, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                client,
                wallet,
                clock,
                state: Mutex::new(State::default()),
                accepts: Mutex::new(HashMap::new()),
                cancels: Mutex::new(HashMap::new()),
                updates,
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        self.inner.client.user_id()
    }

    /// Wallet refreshed after every successful command.
    pub fn wallet(&self) -> &WalletLedger {
        &self.inner.wallet
    }

    /// Records applied to the mirror, in application order.
    pub fn subscribe(&self) -> broadcast::Receiver<Bet> {
        self.inner.updates.subscribe()
    }

    /// Opens a bet of `amount` on `chosen_fighter`.
    pub async fn create(&self, fight_id: &str, chosen_fighter: Side, amount: u64) -> Result<Bet> {
        let fight = self.fight(fight_id).await?;
        fight
            .validate_stake(self.user_id(), amount)
            .map_err(refusal)?;

        let request = CreateBet {
            fight_id: fight_id.to_string(),
            chosen_fighter,
            amount,
        };
        match self.inner.client.create_bet(&request).await {
            Ok(bet) => {
                info!(bet_id = bet.id, fight_id, amount, "bet created");
                self.reconcile(bet.clone(), bet.asserted_at());
                self.refresh_wallet().await;
                Ok(bet)
            }
            Err(err) => {
                if err.validation() == Some(crate::ValidationError::FightNotOpen) {
                    // Our copy of the fight is out of date
                    lock(&self.inner.state).fights.remove(fight_id);
                }
                Err(err)
            }
        }
    }

    /// Takes the opposite side of a pending bet.
    ///
    /// A second call for the same bet while the first is in flight waits for
    /// the first one's result instead of sending another request.
    pub async fn accept(&self, bet_id: &str) -> Result<Bet> {
        if let Some(bet) = self.bet(bet_id) {
            bet.check_accept(self.user_id()).map_err(refusal)?;
        }
        let controller = self.clone();
        let id = bet_id.to_string();
        self.join_or_send(&self.inner.accepts, bet_id, Action::Accept, async move {
            match controller.inner.client.accept_bet(&id).await {
                Ok(bet) => {
                    info!(bet_id = id, "bet accepted");
                    controller.confirmed(bet.clone());
                    controller.refresh_wallet().await;
                    Ok(bet)
                }
                Err(err) => Err(controller.refused(&id, err).await),
            }
        })
        .await
    }

    /// Cancels a pending bet the user created.
    ///
    /// The window itself is checked by the server, which answers
    /// [crate::StateConflict::WindowExpired] once it has passed. On success
    /// the cancelled record is fetched back. The cancel still succeeds when
    /// that fetch fails, returning `None`; the BET_CANCELLED push or the next
    /// poll brings the record in.
    pub async fn cancel(&self, bet_id: &str) -> Result<Option<Bet>> {
        if let Some(bet) = self.bet(bet_id) {
            bet.check_cancel(self.user_id(), None).map_err(refusal)?;
        }
        let controller = self.clone();
        let id = bet_id.to_string();
        self.join_or_send(&self.inner.cancels, bet_id, Action::Cancel, async move {
            if let Err(err) = controller.inner.client.cancel_bet(&id).await {
                return Err(controller.refused(&id, err).await);
            }
            info!(bet_id = id, "bet cancelled");
            let cancelled = match controller.inner.client.bet(&id).await {
                Ok(bet) => {
                    controller.confirmed(bet.clone());
                    Some(bet)
                }
                Err(err) => {
                    warn!(bet_id = id, ?err, "failed to fetch cancelled bet");
                    None
                }
            };
            controller.refresh_wallet().await;
            Ok(cancelled)
        })
        .await
    }

    /// Fetches the server's record of a bet and merges it.
    pub async fn refresh(&self, bet_id: &str) -> Result<Bet> {
        let bet = self.inner.client.bet(bet_id).await?;
        self.reconcile(bet.clone(), bet.asserted_at());
        Ok(self.bet(bet_id).unwrap_or(bet))
    }

    /// Fetches and merges every bet the user created or accepted.
    pub async fn load_mine(&self) -> Result<MyBets> {
        let mine = self.inner.client.my_bets().await?;
        for bet in mine.created.iter().chain(mine.accepted.iter()) {
            self.reconcile(bet.clone(), bet.asserted_at());
        }
        debug!(
            created = mine.created.len(),
            accepted = mine.accepted.len(),
            "loaded bets"
        );
        Ok(mine)
    }

    /// Pending bets on a fight the user could accept.
    pub async fn available(&self, fight_id: &str) -> Result<Vec<Bet>> {
        let bets = self.inner.client.available_bets(fight_id).await?;
        for bet in &bets {
            self.reconcile(bet.clone(), bet.asserted_at());
        }
        Ok(bets)
    }

    /// Returns the fight, fetching it on first use.
    pub async fn fight(&self, fight_id: &str) -> Result<Fight> {
        if let Some(fight) = lock(&self.inner.state).fights.get(fight_id) {
            return Ok(fight.clone());
        }
        let fight = self.inner.client.fight(fight_id).await?;
        lock(&self.inner.state)
            .fights
            .insert(fight.id.clone(), fight.clone());
        Ok(fight)
    }

    pub fn bet(&self, bet_id: &str) -> Option<Bet> {
        lock(&self.inner.state)
            .bets
            .get(bet_id)
            .map(|entry| entry.bet.clone())
    }

    /// Mirrored bets, newest first.
    pub fn bets(&self) -> Vec<Bet> {
        let mut bets: Vec<Bet> = lock(&self.inner.state)
            .bets
            .values()
            .map(|entry| entry.bet.clone())
            .collect();
        bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bets
    }

    /// Open bets the user created, for the badge.
    pub fn pending_count(&self) -> usize {
        let user_id = self.user_id();
        lock(&self.inner.state)
            .bets
            .values()
            .filter(|entry| {
                entry.bet.status == BetStatus::Pending && entry.bet.creator_id == user_id
            })
            .count()
    }

    /// Whether the cancel button should be offered, by the local clock.
    ///
    /// Advisory only: the server has the final word.
    pub fn can_cancel(&self, bet_id: &str) -> bool {
        self.bet(bet_id)
            .map(|bet| {
                bet.check_cancel(self.user_id(), Some(self.inner.clock.now()))
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub fn outcome(&self, bet_id: &str) -> Option<Outcome> {
        self.bet(bet_id)?.outcome_for(self.user_id())
    }

    /// Countdown to the end of a bet's cancellation window.
    ///
    /// Only the creator may cancel, so anyone else gets an expired timer.
    pub fn countdown(&self, bet_id: &str) -> Option<CountdownTimer> {
        let bet = self.bet(bet_id)?;
        let deadline = match bet.status {
            BetStatus::Pending if bet.creator_id == self.user_id() => bet.can_cancel_until,
            _ => None,
        };
        Some(CountdownTimer::start(deadline, self.inner.clock.clone()))
    }

    /// Merges a record asserted at `at` into the mirror.
    pub fn reconcile(&self, bet: Bet, at: chrono::DateTime<chrono::Utc>) -> Reconciled {
        let bet_id = bet.id.clone();
        let status = bet.status;
        let outcome = {
            let mut state = lock(&self.inner.state);
            reconcile::apply(&mut state.bets, bet, at)
        };
        match outcome {
            Reconciled::Inserted | Reconciled::Updated => {
                debug!(bet_id, %status, ?outcome, "bet reconciled");
                if let Some(bet) = self.bet(&bet_id) {
                    let _ = self.inner.updates.send(bet);
                }
            }
            Reconciled::Duplicate | Reconciled::Stale => {
                debug!(bet_id, %status, ?outcome, "bet unchanged");
            }
            Reconciled::Frozen | Reconciled::Regressed => {
                warn!(bet_id, %status, ?outcome, "refused bet record");
            }
        }
        outcome
    }

    /// Applies bet and fight pushes.
    pub fn handle_event(&self, event: &RealtimeEvent) {
        if let Some(update) = event.bet_update() {
            self.reconcile(update.bet.clone(), update.timestamp);
            return;
        }
        let mut state = lock(&self.inner.state);
        match event {
            RealtimeEvent::FightStatusChanged(update) => {
                if let Some(fight) = state.fights.get_mut(&update.fight_id) {
                    debug!(fight_id = update.fight_id, status = ?update.status, "fight status changed");
                    fight.status = update.status;
                }
            }
            RealtimeEvent::FightResultRecorded(update) => {
                if let Some(fight) = state.fights.get_mut(&update.fight_id) {
                    debug!(fight_id = update.fight_id, winner = ?update.result.winner, "fight result recorded");
                    fight.status = FightStatus::Finished;
                    fight.result = Some(update.result.clone());
                }
            }
            _ => {}
        }
    }

    /// Keeps the mirror in sync with `channel`.
    pub fn attach(&self, channel: &Channel) -> HandlerId {
        let controller = self.clone();
        let mut kinds = EventKind::BETS.to_vec();
        kinds.extend([EventKind::FightStatusChanged, EventKind::FightResultRecorded]);
        channel.on_many(&kinds, move |event| controller.handle_event(event))
    }

    /// Merges a record returned for a command.
    fn confirmed(&self, bet: Bet) {
        let at = bet.asserted_at();
        self.reconcile(bet, at);
    }

    /// Reacts to a refused command. A lost race forces a fetch of the bet.
    async fn refused(&self, bet_id: &str, err: Error) -> Error {
        if let Some(conflict) = err.conflict() {
            warn!(bet_id, ?conflict, "command lost a race, reconciling");
            if let Err(fetch) = self.refresh(bet_id).await {
                warn!(bet_id, ?fetch, "failed to reconcile bet");
            }
        }
        err
    }

    async fn refresh_wallet(&self) {
        if let Err(err) = self.inner.wallet.refresh().await {
            warn!(?err, "failed to refresh wallet");
        }
    }

    /// Runs `command` unless the same action on the same bet is already in
    /// flight, in which case its result is shared.
    async fn join_or_send<T, F>(
        &self,
        in_flight: &Mutex<HashMap<String, SharedCommand<T>>>,
        bet_id: &str,
        action: Action,
        command: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let key = bet_id.to_string();
        let shared = {
            let mut in_flight = lock(in_flight);
            match in_flight.get(&key) {
                Some(shared) => {
                    debug!(bet_id, ?action, "joining command in flight");
                    shared.clone()
                }
                None => {
                    let shared = command.map(|result| result.map_err(Arc::new)).boxed().shared();
                    in_flight.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;
        {
            let mut in_flight = lock(in_flight);
            if in_flight
                .get(&key)
                .map(|current| current.ptr_eq(&shared))
                .unwrap_or(false)
            {
                in_flight.remove(&key);
            }
        }
        drop(shared);
        result.map_err(|err| Arc::try_unwrap(err).unwrap_or_else(Error::Shared))
    }
}

/// Error for a command refused before it was sent.
fn refusal(code: ErrorCode) -> Error {
    Error::from_code(code, code.message().to_string())
}
