use crate::api::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of a fight a stake is placed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Status of a bet record as asserted by the remote store.
///
/// `Won` and `Lost` are expressed from the creator's side of the pair. The
/// acceptor's outcome is always the opposite one, see [Bet::outcome_for].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    Pending,
    Accepted,
    Postponed,
    Cancelled,
    Won,
    Lost,
    Refunded,
    CreatorWon,
    AcceptorWon,
}

impl BetStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BetStatus::Cancelled
                | BetStatus::Won
                | BetStatus::Lost
                | BetStatus::Refunded
                | BetStatus::CreatorWon
                | BetStatus::AcceptorWon
        )
    }

    /// Whether the record has been decided by a fight result.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            BetStatus::Won | BetStatus::Lost | BetStatus::CreatorWon | BetStatus::AcceptorWon
        )
    }

    /// Whether a record in this status must name an acceptor.
    pub fn requires_acceptor(self) -> bool {
        matches!(self, BetStatus::Accepted) || self.is_settled()
    }

    /// Whether a mirrored record may move from `self` to `next`.
    ///
    /// Pending records may skip ahead (intermediate push events can be lost),
    /// but nothing leaves a terminal status and an accepted bet never goes
    /// back to pending or becomes a plain cancellation.
    pub fn can_advance_to(self, next: BetStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            BetStatus::Pending | BetStatus::Postponed => true,
            BetStatus::Accepted => !matches!(next, BetStatus::Pending | BetStatus::Cancelled),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BetStatus::Pending => "PENDING",
            BetStatus::Accepted => "ACCEPTED",
            BetStatus::Postponed => "POSTPONED",
            BetStatus::Cancelled => "CANCELLED",
            BetStatus::Won => "WON",
            BetStatus::Lost => "LOST",
            BetStatus::Refunded => "REFUNDED",
            BetStatus::CreatorWon => "CREATOR_WON",
            BetStatus::AcceptorWon => "ACCEPTOR_WON",
        }
    }
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a bet from one participant's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    Refunded,
    Cancelled,
}

/// A wager matching one creator against at most one acceptor on one fight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: String,
    pub fight_id: String,
    /// Stake in minor currency units.
    pub amount: u64,
    pub chosen_fighter: Side,
    pub status: BetStatus,
    pub creator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_cancel_until: Option<DateTime<Utc>>,
    /// Payout if the bet is won, computed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_win: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_win: Option<u64>,
}

impl Bet {
    /// Latest instant the record itself claims to describe.
    pub fn asserted_at(&self) -> DateTime<Utc> {
        [self.updated_at, self.accepted_at, self.settled_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, |latest, at| latest.max(at))
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.creator_id == user_id || self.acceptor_id.as_deref() == Some(user_id)
    }

    /// Side held by `user_id`, if they take part in the bet.
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if self.creator_id == user_id {
            Some(self.chosen_fighter)
        } else if self.acceptor_id.as_deref() == Some(user_id) {
            Some(self.chosen_fighter.opposite())
        } else {
            None
        }
    }

    /// Outcome of a terminal bet for one of its participants.
    pub fn outcome_for(&self, user_id: &str) -> Option<Outcome> {
        let creator = if self.creator_id == user_id {
            true
        } else if self.acceptor_id.as_deref() == Some(user_id) {
            false
        } else {
            return None;
        };
        let creator_won = match self.status {
            BetStatus::Won | BetStatus::CreatorWon => true,
            BetStatus::Lost | BetStatus::AcceptorWon => false,
            BetStatus::Refunded => return Some(Outcome::Refunded),
            BetStatus::Cancelled => return Some(Outcome::Cancelled),
            BetStatus::Pending | BetStatus::Accepted | BetStatus::Postponed => return None,
        };
        if creator == creator_won {
            Some(Outcome::Won)
        } else {
            Some(Outcome::Lost)
        }
    }

    /// Checks the structural invariants of a record.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.amount == 0 {
            return Err("amount must be positive");
        }
        match (self.status.requires_acceptor(), self.acceptor_id.is_some()) {
            (true, false) => return Err("accepted or settled bet without acceptor"),
            (false, true) if matches!(self.status, BetStatus::Pending | BetStatus::Cancelled) => {
                return Err("unaccepted bet with acceptor")
            }
            _ => {}
        }
        if self.acceptor_id.as_deref() == Some(self.creator_id.as_str()) {
            return Err("creator accepted own bet");
        }
        Ok(())
    }

    /// Whether `user_id` may take the other side of this bet.
    pub fn check_accept(&self, user_id: &str) -> Result<(), ErrorCode> {
        if self.creator_id == user_id {
            return Err(ErrorCode::SelfAcceptance);
        }
        self.require_pending()
    }

    /// Whether `user_id` may cancel this bet.
    ///
    /// With `now` the cancellation window is checked as well. Clients leave it
    /// out: the window is enforced by the store when the command arrives.
    pub fn check_cancel(&self, user_id: &str, now: Option<DateTime<Utc>>) -> Result<(), ErrorCode> {
        if self.creator_id != user_id {
            return Err(ErrorCode::NotCreator);
        }
        self.require_pending()?;
        let Some(now) = now else {
            return Ok(());
        };
        match self.can_cancel_until {
            Some(deadline) if now < deadline => Ok(()),
            _ => Err(ErrorCode::WindowExpired),
        }
    }

    fn require_pending(&self) -> Result<(), ErrorCode> {
        match self.status {
            BetStatus::Pending => Ok(()),
            BetStatus::Accepted => Err(ErrorCode::AlreadyAccepted),
            BetStatus::Postponed => Err(ErrorCode::FightNotOpen),
            BetStatus::Cancelled => Err(ErrorCode::AlreadyCancelled),
            _ => Err(ErrorCode::AlreadySettled),
        }
    }
}

/// Body of a stake command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBet {
    pub fight_id: String,
    pub chosen_fighter: Side,
    pub amount: u64,
}

/// Bets of the current user, split by role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyBets {
    #[serde(default)]
    pub created: Vec<Bet>,
    #[serde(default)]
    pub accepted: Vec<Bet>,
}
