//! Frames exchanged on the push channel.
//!
//! Inbound frames look like `{"type": ..., "payload": ...}`. Some servers put
//! the body under `message` instead, and a few send it inline next to `type`;
//! decoding accepts all three. Frames with a type this crate does not know are
//! skipped rather than rejected.

use crate::{
    bet::Bet,
    fight::{FightResult, FightStatus},
    notification::Notification,
    wallet::{TransactionUpdate, WalletUpdate},
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no type")]
    MissingType,
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw frame as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl Frame {
    pub fn to_text(&self) -> String {
        // A frame is a string and two JSON values, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Dispatch key of a [RealtimeEvent].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ConnectionStatus,
    AuthError,
    FightStatusChanged,
    FightResultRecorded,
    BetCreated,
    BetAccepted,
    BetCancelled,
    BetWon,
    BetLost,
    TransactionConfirmed,
    TransactionFailed,
    WalletUpdated,
    Notification,
    SystemAlert,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::ConnectionStatus,
        EventKind::AuthError,
        EventKind::FightStatusChanged,
        EventKind::FightResultRecorded,
        EventKind::BetCreated,
        EventKind::BetAccepted,
        EventKind::BetCancelled,
        EventKind::BetWon,
        EventKind::BetLost,
        EventKind::TransactionConfirmed,
        EventKind::TransactionFailed,
        EventKind::WalletUpdated,
        EventKind::Notification,
        EventKind::SystemAlert,
    ];

    pub const BETS: [EventKind; 5] = [
        EventKind::BetCreated,
        EventKind::BetAccepted,
        EventKind::BetCancelled,
        EventKind::BetWon,
        EventKind::BetLost,
    ];

    /// Canonical wire type used when encoding.
    pub fn wire_type(self) -> &'static str {
        match self {
            EventKind::ConnectionStatus => "CONNECTION_STATUS",
            EventKind::AuthError => "AUTH_ERROR",
            EventKind::FightStatusChanged => "FIGHT_STATUS_UPDATE",
            EventKind::FightResultRecorded => "FIGHT_RESULT",
            EventKind::BetCreated => "BET_CREATED",
            EventKind::BetAccepted => "BET_ACCEPTED",
            EventKind::BetCancelled => "BET_CANCELLED",
            EventKind::BetWon => "BET_WON",
            EventKind::BetLost => "BET_LOST",
            EventKind::TransactionConfirmed => "TRANSACTION_CONFIRMED",
            EventKind::TransactionFailed => "TRANSACTION_FAILED",
            EventKind::WalletUpdated => "WALLET_UPDATE",
            EventKind::Notification => "NOTIFICATION",
            EventKind::SystemAlert => "SYSTEM_ALERT",
        }
    }
}

/// A bet record pushed by the server, stamped with the time it was asserted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetUpdate {
    pub bet: Bet,
    pub timestamp: DateTime<Utc>,
}

impl From<Bet> for BetUpdate {
    fn from(bet: Bet) -> Self {
        let timestamp = bet.asserted_at();
        Self { bet, timestamp }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BetPayload {
    Stamped(BetUpdate),
    Bare(Bet),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FightStatusUpdate {
    pub fight_id: String,
    pub status: FightStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FightStatusBody {
    fight_id: String,
    #[serde(default)]
    status: Option<FightStatus>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FightResultUpdate {
    pub fight_id: String,
    #[serde(flatten)]
    pub result: FightResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
}

/// A decoded server push.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    ConnectionStatus { message: String },
    AuthError { message: String },
    FightStatusChanged(FightStatusUpdate),
    FightResultRecorded(FightResultUpdate),
    BetCreated(BetUpdate),
    BetAccepted(BetUpdate),
    BetCancelled(BetUpdate),
    BetWon(BetUpdate),
    BetLost(BetUpdate),
    TransactionConfirmed(TransactionUpdate),
    TransactionFailed(TransactionUpdate),
    WalletUpdated(WalletUpdate),
    Notification(Notification),
    SystemAlert(SystemAlert),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::ConnectionStatus { .. } => EventKind::ConnectionStatus,
            RealtimeEvent::AuthError { .. } => EventKind::AuthError,
            RealtimeEvent::FightStatusChanged(_) => EventKind::FightStatusChanged,
            RealtimeEvent::FightResultRecorded(_) => EventKind::FightResultRecorded,
            RealtimeEvent::BetCreated(_) => EventKind::BetCreated,
            RealtimeEvent::BetAccepted(_) => EventKind::BetAccepted,
            RealtimeEvent::BetCancelled(_) => EventKind::BetCancelled,
            RealtimeEvent::BetWon(_) => EventKind::BetWon,
            RealtimeEvent::BetLost(_) => EventKind::BetLost,
            RealtimeEvent::TransactionConfirmed(_) => EventKind::TransactionConfirmed,
            RealtimeEvent::TransactionFailed(_) => EventKind::TransactionFailed,
            RealtimeEvent::WalletUpdated(_) => EventKind::WalletUpdated,
            RealtimeEvent::Notification(_) => EventKind::Notification,
            RealtimeEvent::SystemAlert(_) => EventKind::SystemAlert,
        }
    }

    /// Bet record carried by the event, if any.
    pub fn bet_update(&self) -> Option<&BetUpdate> {
        match self {
            RealtimeEvent::BetCreated(update)
            | RealtimeEvent::BetAccepted(update)
            | RealtimeEvent::BetCancelled(update)
            | RealtimeEvent::BetWon(update)
            | RealtimeEvent::BetLost(update) => Some(update),
            _ => None,
        }
    }

    /// Builds the bet event matching the status of `bet`.
    pub fn for_bet(kind: EventKind, update: BetUpdate) -> Option<Self> {
        Some(match kind {
            EventKind::BetCreated => RealtimeEvent::BetCreated(update),
            EventKind::BetAccepted => RealtimeEvent::BetAccepted(update),
            EventKind::BetCancelled => RealtimeEvent::BetCancelled(update),
            EventKind::BetWon => RealtimeEvent::BetWon(update),
            EventKind::BetLost => RealtimeEvent::BetLost(update),
            _ => return None,
        })
    }

    /// Decodes a text frame.
    ///
    /// Returns `Ok(None)` for frames of an unrecognized type.
    pub fn decode(text: &str) -> Result<Option<Self>, DecodeError> {
        let mut value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();
        let nested = value.as_object_mut().and_then(|object| {
            let payload = object.remove("payload").filter(|v| !v.is_null());
            let message = object.remove("message").filter(|v| !v.is_null());
            payload.or(message)
        });
        let body = nested.unwrap_or(value);

        let event = match kind.as_str() {
            "CONNECTION_STATUS" => RealtimeEvent::ConnectionStatus {
                message: message_of(&body),
            },
            "AUTH_ERROR" => RealtimeEvent::AuthError {
                message: message_of(&body),
            },
            "FIGHT_STATUS_UPDATE" => fight_status(body, None)?,
            "FIGHT_STARTED" => fight_status(body, Some(FightStatus::Ongoing))?,
            "FIGHT_FINISHED" => fight_status(body, Some(FightStatus::Finished))?,
            "FIGHT_CANCELLED" => fight_status(body, Some(FightStatus::Cancelled))?,
            "FIGHT_RESULT" => RealtimeEvent::FightResultRecorded(parse("FIGHT_RESULT", body)?),
            "BET_CREATED" => RealtimeEvent::BetCreated(bet_update("BET_CREATED", body)?),
            "BET_ACCEPTED" => RealtimeEvent::BetAccepted(bet_update("BET_ACCEPTED", body)?),
            "BET_CANCELLED" => RealtimeEvent::BetCancelled(bet_update("BET_CANCELLED", body)?),
            "BET_WON" => RealtimeEvent::BetWon(bet_update("BET_WON", body)?),
            "BET_LOST" => RealtimeEvent::BetLost(bet_update("BET_LOST", body)?),
            "TRANSACTION_CONFIRMED" => {
                RealtimeEvent::TransactionConfirmed(parse("TRANSACTION_CONFIRMED", body)?)
            }
            "TRANSACTION_FAILED" => {
                RealtimeEvent::TransactionFailed(parse("TRANSACTION_FAILED", body)?)
            }
            "WALLET_UPDATE" => RealtimeEvent::WalletUpdated(parse("WALLET_UPDATE", body)?),
            "NOTIFICATION" => RealtimeEvent::Notification(parse("NOTIFICATION", body)?),
            "SYSTEM_ALERT" => RealtimeEvent::SystemAlert(match body {
                Value::String(message) => SystemAlert {
                    title: None,
                    message,
                },
                body => parse("SYSTEM_ALERT", body)?,
            }),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Encodes the event using its canonical wire type.
    pub fn to_frame(&self) -> Frame {
        let kind = self.kind().wire_type().to_string();
        let payload = match self {
            RealtimeEvent::ConnectionStatus { message } | RealtimeEvent::AuthError { message } => {
                return Frame {
                    kind,
                    payload: None,
                    message: Some(Value::String(message.clone())),
                };
            }
            RealtimeEvent::FightStatusChanged(update) => serde_json::to_value(update),
            RealtimeEvent::FightResultRecorded(update) => serde_json::to_value(update),
            RealtimeEvent::BetCreated(update)
            | RealtimeEvent::BetAccepted(update)
            | RealtimeEvent::BetCancelled(update)
            | RealtimeEvent::BetWon(update)
            | RealtimeEvent::BetLost(update) => serde_json::to_value(update),
            RealtimeEvent::TransactionConfirmed(update)
            | RealtimeEvent::TransactionFailed(update) => serde_json::to_value(update),
            RealtimeEvent::WalletUpdated(update) => serde_json::to_value(update),
            RealtimeEvent::Notification(notification) => serde_json::to_value(notification),
            RealtimeEvent::SystemAlert(alert) => serde_json::to_value(alert),
        };
        Frame {
            kind,
            payload: payload.ok(),
            message: None,
        }
    }
}

fn parse<T: DeserializeOwned>(kind: &'static str, body: Value) -> Result<T, DecodeError> {
    serde_json::from_value(body).map_err(|source| DecodeError::Payload { kind, source })
}

fn bet_update(kind: &'static str, body: Value) -> Result<BetUpdate, DecodeError> {
    Ok(match parse::<BetPayload>(kind, body)? {
        BetPayload::Stamped(update) => update,
        BetPayload::Bare(bet) => bet.into(),
    })
}

fn fight_status(body: Value, implied: Option<FightStatus>) -> Result<RealtimeEvent, DecodeError> {
    let kind = "FIGHT_STATUS_UPDATE";
    let body: FightStatusBody = parse(kind, body)?;
    let status = body.status.or(implied).ok_or_else(|| DecodeError::Payload {
        kind,
        source: serde::de::Error::missing_field("status"),
    })?;
    Ok(RealtimeEvent::FightStatusChanged(FightStatusUpdate {
        fight_id: body.fight_id,
        status,
        timestamp: body.timestamp,
    }))
}

fn message_of(body: &Value) -> String {
    match body {
        Value::String(message) => message.clone(),
        Value::Object(object) => object
            .get("message")
            .or_else(|| object.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    }
}

/// Commands a client sends on the push channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    SubscribeBets { user_id: String },
    UnsubscribeBets { user_id: String },
    Ping,
}

impl Command {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bet::{BetStatus, Side};
    use chrono::TimeZone;

    fn bet() -> Bet {
        Bet {
            id: "bet-1".to_string(),
            fight_id: "F1".to_string(),
            amount: 5000,
            chosen_fighter: Side::B,
            status: BetStatus::Accepted,
            creator_id: "alice".to_string(),
            acceptor_id: Some("bob".to_string()),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap(),
            updated_at: None,
            accepted_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 20, 5, 0).unwrap()),
            settled_at: None,
            can_cancel_until: None,
            potential_win: Some(9000),
            actual_win: None,
        }
    }

    #[test]
    fn test_unknown_types_are_skipped() {
        let decoded = RealtimeEvent::decode(r#"{"type":"LEADERBOARD","payload":{}}"#).unwrap();
        assert!(decoded.is_none());
        assert!(matches!(
            RealtimeEvent::decode(r#"{"payload":{}}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            RealtimeEvent::decode("not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_connection_status_from_message() {
        let decoded =
            RealtimeEvent::decode(r#"{"type":"CONNECTION_STATUS","message":"Connected"}"#)
                .unwrap()
                .unwrap();
        assert_eq!(
            decoded,
            RealtimeEvent::ConnectionStatus {
                message: "Connected".to_string()
            }
        );
        assert_eq!(decoded.kind(), EventKind::ConnectionStatus);
    }

    #[test]
    fn test_bare_bet_payload_uses_record_time() {
        let frame = serde_json::json!({ "type": "BET_ACCEPTED", "payload": bet() });
        let decoded = RealtimeEvent::decode(&frame.to_string()).unwrap().unwrap();
        let update = decoded.bet_update().unwrap();
        assert_eq!(update.bet, bet());
        assert_eq!(update.timestamp, bet().accepted_at.unwrap());
    }

    #[test]
    fn test_bet_event_roundtrip() {
        let update = BetUpdate {
            bet: bet(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 20, 6, 0).unwrap(),
        };
        let event = RealtimeEvent::BetAccepted(update);
        let frame = event.to_frame();
        assert_eq!(frame.kind, "BET_ACCEPTED");
        let decoded = RealtimeEvent::decode(&frame.to_text()).unwrap().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_fight_aliases_imply_status() {
        let decoded = RealtimeEvent::decode(r#"{"type":"FIGHT_STARTED","payload":{"fightId":"F1"}}"#)
            .unwrap()
            .unwrap();
        let RealtimeEvent::FightStatusChanged(update) = decoded else {
            panic!("expected fight status");
        };
        assert_eq!(update.status, FightStatus::Ongoing);

        let missing = RealtimeEvent::decode(r#"{"type":"FIGHT_STATUS_UPDATE","payload":{"fightId":"F1"}}"#);
        assert!(matches!(missing, Err(DecodeError::Payload { .. })));
    }

    #[test]
    fn test_inline_body() {
        let decoded = RealtimeEvent::decode(
            r#"{"type":"WALLET_UPDATE","balance":100,"lockedBalance":50,"bonusBalance":0}"#,
        )
        .unwrap()
        .unwrap();
        let RealtimeEvent::WalletUpdated(update) = decoded else {
            panic!("expected wallet update");
        };
        assert_eq!(update.snapshot.locked_balance, 50);
    }

    #[test]
    fn test_command_wire_format() {
        let command = Command::SubscribeBets {
            user_id: "alice".to_string(),
        };
        let text = command.to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "SUBSCRIBE_BETS");
        assert_eq!(value["payload"]["userId"], "alice");
        assert_eq!(Command::decode(&text).unwrap(), command);
        assert_eq!(Command::decode(r#"{"type":"PING"}"#).unwrap(), Command::Ping);
    }
}
