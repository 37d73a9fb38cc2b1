//! In-memory backend that owns bets, fights, wallets and notifications.
//!
//! The [Simulator] is the authority clients mirror: it enforces the staking
//! rules, moves stakes between balance and locked balance, settles fights and
//! pushes every change to the connected users through [Api].

use chrono::{DateTime, Utc};
use ringside_types::{
    ApiError, Bet, BetStatus, BetUpdate, CreateBet, ErrorCode, EventKind, Fight,
    FightResult, FightResultUpdate, FightStatus, FightStatusUpdate, FighterRef, MyBets,
    Notification, NotificationType, RealtimeEvent, TransactionKind, TransactionUpdate,
    WalletSnapshot, WalletUpdate,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use uuid::Uuid;

mod api;
pub use api::Api;

/// How long after creation a pending bet may be cancelled.
pub const CANCELLATION_WINDOW: Duration = Duration::from_secs(20 * 60);

/// Share of the pot kept by the house, in basis points.
pub const DEFAULT_COMMISSION_BPS: u64 = 1_000;

/// Users a pushed event is delivered to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    All,
    Users(Vec<String>),
}

impl Audience {
    pub fn user(user_id: &str) -> Self {
        Audience::Users(vec![user_id.to_string()])
    }

    pub fn includes(&self, user_id: Option<&str>) -> bool {
        match (self, user_id) {
            (Audience::All, _) => true,
            (Audience::Users(users), Some(user_id)) => users.iter().any(|u| u == user_id),
            (Audience::Users(_), None) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum InternalUpdate {
    Event(Audience, RealtimeEvent),
    /// Closes every push connection.
    Disconnect,
}

#[derive(Default)]
pub struct State {
    /// Added to the wall clock, lets tests move time forward.
    offset: Duration,

    fights: BTreeMap<String, Fight>,
    bets: BTreeMap<String, Bet>,
    wallets: HashMap<String, WalletSnapshot>,
    /// Per user, oldest first.
    notifications: HashMap<String, Vec<Notification>>,
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        let offset =
            chrono::Duration::from_std(self.offset).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + offset
    }

    fn wallet(&mut self, user_id: &str) -> &mut WalletSnapshot {
        self.wallets.entry(user_id.to_string()).or_default()
    }

    fn bet_mut(&mut self, bet_id: &str) -> Result<&mut Bet, ApiError> {
        self.bets
            .get_mut(bet_id)
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))
    }

    fn notify(
        &mut self,
        user_id: &str,
        kind: NotificationType,
        title: &str,
        message: String,
        data: Option<serde_json::Value>,
    ) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.to_string(),
            message,
            data,
            is_read: false,
            priority: 0,
            created_at: self.now(),
            read_at: None,
        };
        self.notifications
            .entry(user_id.to_string())
            .or_default()
            .push(notification.clone());
        notification
    }
}

/// Changes produced by one mutation, published once the state lock is released.
#[derive(Default)]
struct Outbox {
    events: Vec<(Audience, RealtimeEvent)>,
}

impl Outbox {
    fn push(&mut self, audience: Audience, event: RealtimeEvent) {
        self.events.push((audience, event));
    }

    fn bet(&mut self, user_id: &str, kind: EventKind, bet: &Bet) {
        if let Some(event) = RealtimeEvent::for_bet(kind, BetUpdate::from(bet.clone())) {
            self.push(Audience::user(user_id), event);
        }
    }

    fn wallet(&mut self, state: &mut State, user_id: &str) {
        let snapshot = *state.wallet(user_id);
        let updated_at = Some(state.now());
        self.push(
            Audience::user(user_id),
            RealtimeEvent::WalletUpdated(WalletUpdate {
                snapshot,
                updated_at,
            }),
        );
    }

    fn notify(
        &mut self,
        state: &mut State,
        user_id: &str,
        kind: NotificationType,
        title: &str,
        message: String,
        bet: Option<&Bet>,
    ) {
        let data = bet.map(|bet| serde_json::json!({ "betId": bet.id, "fightId": bet.fight_id }));
        let notification = state.notify(user_id, kind, title, message, data);
        self.push(
            Audience::user(user_id),
            RealtimeEvent::Notification(notification),
        );
    }
}

#[derive(Clone)]
pub struct Simulator {
    state: Arc<RwLock<State>>,
    update_tx: broadcast::Sender<InternalUpdate>,
    connections: Arc<AtomicUsize>,
    commission_bps: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            update_tx,
            connections: Arc::new(AtomicUsize::new(0)),
            commission_bps: DEFAULT_COMMISSION_BPS,
        }
    }

    pub fn with_commission(mut self, commission_bps: u64) -> Self {
        self.commission_bps = commission_bps.min(10_000);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| {
            tracing::error!("state lock poisoned: {}", e);
            PoisonError::into_inner(e)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| {
            tracing::error!("state lock poisoned: {}", e);
            PoisonError::into_inner(e)
        })
    }

    /// Broadcasts collected events. Must be called without the state lock.
    fn flush(&self, outbox: Outbox) {
        for (audience, event) in outbox.events {
            self.publish(audience, event);
        }
    }

    /// Pushes `event` to every connection subscribed for one of `audience`.
    pub fn publish(&self, audience: Audience, event: RealtimeEvent) {
        tracing::debug!(kind = ?event.kind(), ?audience, "publishing event");
        if let Err(e) = self.update_tx.send(InternalUpdate::Event(audience, event)) {
            tracing::debug!("No push subscribers: {}", e);
        }
    }

    pub fn update_subscriber(&self) -> broadcast::Receiver<InternalUpdate> {
        self.update_tx.subscribe()
    }

    /// Drops every push connection, as a server restart would.
    pub fn disconnect_all(&self) {
        tracing::info!("disconnecting all push connections");
        let _ = self.update_tx.send(InternalUpdate::Disconnect);
    }

    /// Number of open push connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Current server time.
    pub fn now(&self) -> DateTime<Utc> {
        self.read().now()
    }

    /// Moves the server clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.write();
        state.offset = state.offset.saturating_add(by);
        tracing::info!(offset = ?state.offset, "clock advanced");
    }

    /// Payout to the winner of an accepted bet of `amount`.
    pub fn potential_win(&self, amount: u64) -> u64 {
        let pot = amount.saturating_mul(2);
        pot - pot.saturating_mul(self.commission_bps) / 10_000
    }

    pub fn add_fight(&self, fight: Fight) {
        tracing::info!(fight_id = fight.id, status = ?fight.status, "fight added");
        self.write().fights.insert(fight.id.clone(), fight);
    }

    pub fn fight(&self, fight_id: &str) -> Option<Fight> {
        self.read().fights.get(fight_id).cloned()
    }

    pub fn bet(&self, bet_id: &str) -> Option<Bet> {
        self.read().bets.get(bet_id).cloned()
    }

    pub fn wallet(&self, user_id: &str) -> WalletSnapshot {
        self.read()
            .wallets
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    /// Credits `amount` to a wallet.
    pub fn deposit(&self, user_id: &str, amount: u64) -> WalletSnapshot {
        let mut outbox = Outbox::default();
        let snapshot = {
            let mut state = self.write();
            let wallet = state.wallet(user_id);
            wallet.balance = wallet.balance.saturating_add(amount);
            let snapshot = *wallet;

            outbox.push(
                Audience::user(user_id),
                RealtimeEvent::TransactionConfirmed(TransactionUpdate {
                    id: Uuid::new_v4().to_string(),
                    kind: TransactionKind::Deposit,
                    amount,
                    reason: None,
                }),
            );
            outbox.wallet(&mut state, user_id);
            outbox.notify(
                &mut state,
                user_id,
                NotificationType::DepositSuccess,
                "Deposit received",
                format!("{amount} was credited to your wallet"),
                None,
            );
            snapshot
        };
        tracing::info!(user_id, amount, balance = snapshot.balance, "deposit");
        self.flush(outbox);
        snapshot
    }

    /// Opens a pending bet and locks the creator's stake.
    pub fn create_bet(&self, user_id: &str, request: &CreateBet) -> Result<Bet, ApiError> {
        let mut outbox = Outbox::default();
        let bet = {
            let mut state = self.write();
            let fight = state
                .fights
                .get(&request.fight_id)
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
            fight.validate_stake(user_id, request.amount)?;
            lock_stake(state.wallet(user_id), request.amount)?;

            let now = state.now();
            let bet = Bet {
                id: Uuid::new_v4().to_string(),
                fight_id: request.fight_id.clone(),
                amount: request.amount,
                chosen_fighter: request.chosen_fighter,
                status: BetStatus::Pending,
                creator_id: user_id.to_string(),
                acceptor_id: None,
                created_at: now,
                updated_at: None,
                accepted_at: None,
                settled_at: None,
                can_cancel_until: chrono::Duration::from_std(CANCELLATION_WINDOW)
                    .ok()
                    .map(|window| now + window),
                potential_win: Some(self.potential_win(request.amount)),
                actual_win: None,
            };
            state.bets.insert(bet.id.clone(), bet.clone());

            outbox.bet(user_id, EventKind::BetCreated, &bet);
            outbox.wallet(&mut state, user_id);
            outbox.notify(
                &mut state,
                user_id,
                NotificationType::BetPlaced,
                "Bet placed",
                format!("Your bet of {} is waiting for an opponent", bet.amount),
                Some(&bet),
            );
            bet
        };
        tracing::info!(bet_id = bet.id, user_id, amount = bet.amount, "bet created");
        self.flush(outbox);
        Ok(bet)
    }

    /// Takes the other side of a pending bet and locks the acceptor's stake.
    pub fn accept_bet(&self, user_id: &str, bet_id: &str) -> Result<Bet, ApiError> {
        let mut outbox = Outbox::default();
        let bet = {
            let mut state = self.write();
            let now = state.now();
            let bet = state
                .bets
                .get(bet_id)
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
            bet.check_accept(user_id)?;
            let amount = bet.amount;
            lock_stake(state.wallet(user_id), amount)?;

            let bet = state.bet_mut(bet_id)?;
            bet.status = BetStatus::Accepted;
            bet.acceptor_id = Some(user_id.to_string());
            bet.accepted_at = Some(now);
            bet.updated_at = Some(now);
            let bet = bet.clone();

            for participant in [bet.creator_id.as_str(), user_id] {
                outbox.bet(participant, EventKind::BetAccepted, &bet);
                outbox.wallet(&mut state, participant);
            }
            outbox.notify(
                &mut state,
                &bet.creator_id,
                NotificationType::BetAccepted,
                "Bet accepted",
                format!("{user_id} accepted your bet of {}", bet.amount),
                Some(&bet),
            );
            outbox.notify(
                &mut state,
                user_id,
                NotificationType::BetPlaced,
                "Bet placed",
                format!("You took the other side of a bet of {}", bet.amount),
                Some(&bet),
            );
            bet
        };
        tracing::info!(bet_id, user_id, "bet accepted");
        self.flush(outbox);
        Ok(bet)
    }

    /// Cancels a pending bet inside its window and releases the stake.
    pub fn cancel_bet(&self, user_id: &str, bet_id: &str) -> Result<Bet, ApiError> {
        let mut outbox = Outbox::default();
        let bet = {
            let mut state = self.write();
            let now = state.now();
            let bet = state.bet_mut(bet_id)?;
            bet.check_cancel(user_id, Some(now))?;
            bet.status = BetStatus::Cancelled;
            bet.updated_at = Some(now);
            let bet = bet.clone();
            release_stake(state.wallet(user_id), bet.amount);

            outbox.bet(user_id, EventKind::BetCancelled, &bet);
            outbox.wallet(&mut state, user_id);
            bet
        };
        tracing::info!(bet_id, user_id, "bet cancelled");
        self.flush(outbox);
        Ok(bet)
    }

    pub fn my_bets(&self, user_id: &str) -> MyBets {
        let state = self.read();
        let mut mine = MyBets::default();
        for bet in state.bets.values() {
            if bet.creator_id == user_id {
                mine.created.push(bet.clone());
            } else if bet.acceptor_id.as_deref() == Some(user_id) {
                mine.accepted.push(bet.clone());
            }
        }
        newest_first(&mut mine.created);
        newest_first(&mut mine.accepted);
        mine
    }

    /// Pending bets on `fight_id` that `user_id` could accept.
    pub fn available_bets(&self, user_id: &str, fight_id: &str) -> Result<Vec<Bet>, ApiError> {
        let state = self.read();
        if !state.fights.contains_key(fight_id) {
            return Err(ApiError::new(ErrorCode::NotFound));
        }
        let mut open: Vec<Bet> = state
            .bets
            .values()
            .filter(|bet| {
                bet.fight_id == fight_id
                    && bet.status == BetStatus::Pending
                    && bet.creator_id != user_id
            })
            .cloned()
            .collect();
        newest_first(&mut open);
        Ok(open)
    }

    /// Moves a fight to `status`, refunding bets that can no longer be decided.
    ///
    /// Starting or cancelling a fight refunds its pending bets, cancelling
    /// also refunds accepted ones. Postponing freezes open bets until the
    /// fight is scheduled again.
    pub fn set_fight_status(&self, fight_id: &str, status: FightStatus) -> Result<Fight, ApiError> {
        let mut outbox = Outbox::default();
        let fight = {
            let mut state = self.write();
            let now = state.now();
            let fight = state
                .fights
                .get_mut(fight_id)
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
            if matches!(fight.status, FightStatus::Finished | FightStatus::Cancelled) {
                return Err(ApiError::new(ErrorCode::AlreadySettled));
            }
            let previous = fight.status;
            fight.status = status;
            let fight = fight.clone();

            let bet_ids = bets_on(&state, fight_id);
            for bet_id in bet_ids {
                let bet = state.bet_mut(&bet_id)?;
                let next = match (status, bet.status, bet.acceptor_id.is_some()) {
                    (FightStatus::Ongoing | FightStatus::Cancelled, BetStatus::Pending, _) => {
                        BetStatus::Refunded
                    }
                    (FightStatus::Ongoing, BetStatus::Postponed, false) => BetStatus::Refunded,
                    (FightStatus::Ongoing, BetStatus::Postponed, true) => BetStatus::Accepted,
                    (FightStatus::Cancelled, BetStatus::Accepted | BetStatus::Postponed, _) => {
                        BetStatus::Refunded
                    }
                    (FightStatus::Postponed, BetStatus::Pending | BetStatus::Accepted, _) => {
                        BetStatus::Postponed
                    }
                    (FightStatus::Scheduled, BetStatus::Postponed, false) => BetStatus::Pending,
                    (FightStatus::Scheduled, BetStatus::Postponed, true) => BetStatus::Accepted,
                    _ => continue,
                };
                bet.status = next;
                bet.updated_at = Some(now);
                if next == BetStatus::Refunded {
                    bet.settled_at = Some(now);
                }
                let bet = bet.clone();
                if next == BetStatus::Refunded {
                    refund(&mut state, &mut outbox, &bet);
                } else {
                    let kind = match next {
                        BetStatus::Accepted => EventKind::BetAccepted,
                        _ => EventKind::BetCreated,
                    };
                    for participant in participants(&bet) {
                        outbox.bet(participant, kind, &bet);
                    }
                }
            }

            outbox.push(
                Audience::All,
                RealtimeEvent::FightStatusChanged(FightStatusUpdate {
                    fight_id: fight_id.to_string(),
                    status,
                    timestamp: Some(now),
                }),
            );
            tracing::info!(fight_id, ?previous, ?status, "fight status changed");
            fight
        };
        self.flush(outbox);
        Ok(fight)
    }

    /// Records the result of a fight and settles every bet on it.
    ///
    /// Accepted bets are decided (`WON`/`LOST` from the creator's side) unless
    /// the result has no winner, in which case they are refunded like every
    /// bet that was never matched.
    pub fn record_result(&self, fight_id: &str, result: FightResult) -> Result<Fight, ApiError> {
        let mut outbox = Outbox::default();
        let fight = {
            let mut state = self.write();
            let now = state.now();
            let fight = state
                .fights
                .get_mut(fight_id)
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
            if matches!(fight.status, FightStatus::Finished | FightStatus::Cancelled) {
                return Err(ApiError::new(ErrorCode::AlreadySettled));
            }
            fight.status = FightStatus::Finished;
            fight.result = Some(result.clone());
            let fight = fight.clone();

            for bet_id in bets_on(&state, fight_id) {
                let bet = state.bet_mut(&bet_id)?;
                if bet.status.is_terminal() {
                    continue;
                }
                bet.updated_at = Some(now);
                bet.settled_at = Some(now);

                let decided = match (&bet.acceptor_id, result.winner.side()) {
                    (Some(acceptor), Some(side)) if bet.status != BetStatus::Pending => {
                        Some((acceptor.clone(), bet.chosen_fighter == side))
                    }
                    _ => None,
                };
                let Some((acceptor, creator_won)) = decided else {
                    bet.status = BetStatus::Refunded;
                    let bet = bet.clone();
                    refund(&mut state, &mut outbox, &bet);
                    continue;
                };

                let payout = self.potential_win(bet.amount);
                bet.status = if creator_won {
                    BetStatus::Won
                } else {
                    BetStatus::Lost
                };
                bet.actual_win = Some(payout);
                let bet = bet.clone();
                let (winner, loser) = if creator_won {
                    (bet.creator_id.clone(), acceptor)
                } else {
                    (acceptor, bet.creator_id.clone())
                };
                settle(&mut state, &mut outbox, &bet, &winner, &loser, payout);
            }

            outbox.push(
                Audience::All,
                RealtimeEvent::FightResultRecorded(FightResultUpdate {
                    fight_id: fight_id.to_string(),
                    result: result.clone(),
                }),
            );
            tracing::info!(fight_id, winner = ?result.winner, "fight result recorded");
            fight
        };
        self.flush(outbox);
        Ok(fight)
    }

    /// Most recent notifications of `user_id`, newest first.
    pub fn notifications(&self, user_id: &str, limit: usize) -> Vec<Notification> {
        self.read()
            .notifications
            .get(user_id)
            .map(|held| held.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, user_id: &str) -> u64 {
        self.read()
            .notifications
            .get(user_id)
            .map(|held| held.iter().filter(|n| !n.is_read).count() as u64)
            .unwrap_or_default()
    }

    pub fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<Notification, ApiError> {
        let mut state = self.write();
        let now = state.now();
        let notification = state
            .notifications
            .get_mut(user_id)
            .and_then(|held| held.iter_mut().find(|n| n.id == notification_id))
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        notification.mark_read(now);
        Ok(notification.clone())
    }

    /// Returns how many notifications changed state.
    pub fn mark_all_read(&self, user_id: &str) -> u64 {
        let mut state = self.write();
        let now = state.now();
        let Some(held) = state.notifications.get_mut(user_id) else {
            return 0;
        };
        let mut updated = 0;
        for notification in held.iter_mut().filter(|n| !n.is_read) {
            notification.mark_read(now);
            updated += 1;
        }
        updated
    }

    pub fn delete_notification(&self, user_id: &str, notification_id: &str) -> Result<(), ApiError> {
        let mut state = self.write();
        let held = state
            .notifications
            .get_mut(user_id)
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        let index = held
            .iter()
            .position(|n| n.id == notification_id)
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound))?;
        held.remove(index);
        Ok(())
    }

    /// Seeds fights and funded users for local development.
    pub fn seed_demo(&self) {
        let now = self.now();
        let fights = [
            ("main-event", "Balla Gaye 2", "Modou Lo", None),
            ("co-main", "Eumeu Sene", "Boy Niang 2", None),
            ("promoter-card", "Ama Baldé", "Gris Bordeaux", Some("promoter")),
        ];
        for (hours, (id, a, b, operator)) in fights.into_iter().enumerate() {
            self.add_fight(Fight {
                id: id.to_string(),
                title: format!("{a} vs {b}"),
                status: FightStatus::Scheduled,
                fighter_a: FighterRef {
                    id: format!("{id}-a"),
                    name: a.to_string(),
                },
                fighter_b: FighterRef {
                    id: format!("{id}-b"),
                    name: b.to_string(),
                },
                scheduled_at: now + chrono::Duration::hours(hours as i64 + 1),
                min_bet_amount: 100,
                max_bet_amount: 1_000_000,
                operator_id: operator.map(str::to_string),
                result: None,
            });
        }
        for user in ["alice", "bob", "carol", "promoter"] {
            self.deposit(user, 100_000);
        }
    }
}

/// Moves `amount` from the spendable balances to the locked balance.
fn lock_stake(wallet: &mut WalletSnapshot, amount: u64) -> Result<(), ApiError> {
    if wallet.available() < amount {
        return Err(ApiError::new(ErrorCode::InsufficientFunds));
    }
    let from_balance = amount.min(wallet.balance);
    wallet.balance -= from_balance;
    wallet.bonus_balance -= amount - from_balance;
    wallet.locked_balance += amount;
    Ok(())
}

fn release_stake(wallet: &mut WalletSnapshot, amount: u64) {
    wallet.locked_balance = wallet.locked_balance.saturating_sub(amount);
    wallet.balance = wallet.balance.saturating_add(amount);
}

fn participants(bet: &Bet) -> impl Iterator<Item = &str> + '_ {
    std::iter::once(bet.creator_id.as_str()).chain(bet.acceptor_id.as_deref())
}

fn bets_on(state: &State, fight_id: &str) -> Vec<String> {
    state
        .bets
        .values()
        .filter(|bet| bet.fight_id == fight_id)
        .map(|bet| bet.id.clone())
        .collect()
}

fn newest_first(bets: &mut [Bet]) {
    bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Gives every participant of `bet` their stake back.
fn refund(state: &mut State, outbox: &mut Outbox, bet: &Bet) {
    for participant in participants(bet) {
        release_stake(state.wallet(participant), bet.amount);
        outbox.bet(participant, EventKind::BetCancelled, bet);
        outbox.wallet(state, participant);
        outbox.notify(
            state,
            participant,
            NotificationType::BetRefunded,
            "Bet refunded",
            format!("Your stake of {} was returned", bet.amount),
            Some(bet),
        );
    }
}

/// Pays `payout` to the winner of a decided bet and burns the loser's stake.
fn settle(
    state: &mut State,
    outbox: &mut Outbox,
    bet: &Bet,
    winner: &str,
    loser: &str,
    payout: u64,
) {
    let wallet = state.wallet(winner);
    wallet.locked_balance = wallet.locked_balance.saturating_sub(bet.amount);
    wallet.balance = wallet.balance.saturating_add(payout);
    let wallet = state.wallet(loser);
    wallet.locked_balance = wallet.locked_balance.saturating_sub(bet.amount);

    outbox.bet(winner, EventKind::BetWon, bet);
    outbox.bet(loser, EventKind::BetLost, bet);
    outbox.wallet(state, winner);
    outbox.wallet(state, loser);
    outbox.push(
        Audience::user(winner),
        RealtimeEvent::TransactionConfirmed(TransactionUpdate {
            id: Uuid::new_v4().to_string(),
            kind: TransactionKind::BetPayout,
            amount: payout,
            reason: None,
        }),
    );
    outbox.notify(
        state,
        winner,
        NotificationType::BetWon,
        "You won",
        format!("{payout} was credited to your wallet"),
        Some(bet),
    );
    outbox.notify(
        state,
        loser,
        NotificationType::BetLost,
        "You lost",
        format!("Your stake of {} is gone", bet.amount),
        Some(bet),
    );
}
