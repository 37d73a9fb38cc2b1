use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-confirmed wallet balances, in minor currency units.
///
/// Stakes of pending and accepted bets sit in `locked_balance` until the bet
/// is cancelled or settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub balance: u64,
    #[serde(default)]
    pub locked_balance: u64,
    #[serde(default)]
    pub bonus_balance: u64,
}

impl WalletSnapshot {
    /// Funds the user may stake right now.
    pub fn available(&self) -> u64 {
        self.balance.saturating_add(self.bonus_balance)
    }
}

/// Payload of a wallet push event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletUpdate {
    #[serde(flatten)]
    pub snapshot: WalletSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    BetStake,
    BetPayout,
    BetRefund,
    #[serde(other)]
    Other,
}

/// Payload of the transaction confirmed/failed push events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
