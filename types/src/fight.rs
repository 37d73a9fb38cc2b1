use crate::{api::ErrorCode, bet::Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default lower stake bound when the event does not configure one.
pub const DEFAULT_MIN_BET: u64 = 100;

/// Default upper stake bound when the event does not configure one.
pub const DEFAULT_MAX_BET: u64 = 1_000_000;

fn default_min_bet() -> u64 {
    DEFAULT_MIN_BET
}

fn default_max_bet() -> u64 {
    DEFAULT_MAX_BET
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FightStatus {
    Scheduled,
    Ongoing,
    Finished,
    Cancelled,
    Postponed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    A,
    B,
    Draw,
    Cancelled,
}

impl Winner {
    /// Winning side, if the result has one.
    pub fn side(self) -> Option<Side> {
        match self {
            Winner::A => Some(Side::A),
            Winner::B => Some(Side::B),
            Winner::Draw | Winner::Cancelled => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FightResult {
    pub winner: Winner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victory_method: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterRef {
    pub id: String,
    pub name: String,
}

/// Stake bounds configured for a fight's event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetLimits {
    pub min: u64,
    pub max: u64,
}

impl BetLimits {
    pub fn contains(&self, amount: u64) -> bool {
        amount > 0 && amount >= self.min && amount <= self.max
    }
}

/// A scheduled bout bets are placed on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fight {
    pub id: String,
    pub title: String,
    pub status: FightStatus,
    pub fighter_a: FighterRef,
    pub fighter_b: FighterRef,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default = "default_min_bet")]
    pub min_bet_amount: u64,
    #[serde(default = "default_max_bet")]
    pub max_bet_amount: u64,
    /// User running the fight, who may not bet on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FightResult>,
}

impl Fight {
    pub fn limits(&self) -> BetLimits {
        BetLimits {
            min: self.min_bet_amount,
            max: self.max_bet_amount,
        }
    }

    pub fn accepts_bets(&self) -> bool {
        self.status == FightStatus::Scheduled
    }

    /// Whether `user_id` may open a bet of `amount` on this fight.
    pub fn validate_stake(&self, user_id: &str, amount: u64) -> Result<(), ErrorCode> {
        if !self.accepts_bets() {
            return Err(ErrorCode::FightNotOpen);
        }
        if self.operator_id.as_deref() == Some(user_id) {
            return Err(ErrorCode::OperatorBet);
        }
        if !self.limits().contains(amount) {
            return Err(ErrorCode::InvalidAmount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fight(status: FightStatus) -> Fight {
        Fight {
            id: "F1".to_string(),
            title: "Main event".to_string(),
            status,
            fighter_a: FighterRef {
                id: "fa".to_string(),
                name: "Balla Gaye".to_string(),
            },
            fighter_b: FighterRef {
                id: "fb".to_string(),
                name: "Modou Lo".to_string(),
            },
            scheduled_at: Utc::now(),
            min_bet_amount: 100,
            max_bet_amount: 10_000,
            operator_id: Some("promoter".to_string()),
            result: None,
        }
    }

    #[test]
    fn test_validate_stake() {
        let open = fight(FightStatus::Scheduled);
        assert_eq!(open.validate_stake("alice", 5000), Ok(()));
        assert_eq!(open.validate_stake("alice", 100), Ok(()));
        assert_eq!(open.validate_stake("alice", 10_000), Ok(()));
        assert_eq!(
            open.validate_stake("alice", 99),
            Err(ErrorCode::InvalidAmount)
        );
        assert_eq!(
            open.validate_stake("alice", 10_001),
            Err(ErrorCode::InvalidAmount)
        );
        assert_eq!(
            open.validate_stake("promoter", 5000),
            Err(ErrorCode::OperatorBet)
        );

        for status in [
            FightStatus::Ongoing,
            FightStatus::Finished,
            FightStatus::Cancelled,
            FightStatus::Postponed,
        ] {
            assert_eq!(
                fight(status).validate_stake("alice", 5000),
                Err(ErrorCode::FightNotOpen)
            );
        }
    }

    #[test]
    fn test_zero_is_never_a_stake() {
        let limits = BetLimits { min: 0, max: 10 };
        assert!(!limits.contains(0));
        assert!(limits.contains(1));
    }

    #[test]
    fn test_default_limits() {
        let json = serde_json::json!({
            "id": "F2",
            "title": "Undercard",
            "status": "SCHEDULED",
            "fighterA": { "id": "a", "name": "A" },
            "fighterB": { "id": "b", "name": "B" },
            "scheduledAt": "2026-03-01T20:00:00Z",
        });
        let fight: Fight = serde_json::from_value(json).unwrap();
        assert_eq!(
            fight.limits(),
            BetLimits {
                min: DEFAULT_MIN_BET,
                max: DEFAULT_MAX_BET
            }
        );
        assert_eq!(Winner::Draw.side(), None);
    }
}
