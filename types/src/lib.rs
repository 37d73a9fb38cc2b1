//! Data model shared by ringside clients and the backends they talk to.
//!
//! Everything in this crate is plain data plus the eligibility rules that both
//! sides of the wire must agree on (who may stake, accept or cancel a bet).
//! Records are owned by the remote store: clients only ever mirror them.

pub mod api;
pub mod bet;
pub mod fight;
pub mod notification;
pub mod realtime;
pub mod wallet;

pub use api::{ApiError, Envelope, ErrorCode};
pub use bet::{Bet, BetStatus, CreateBet, MyBets, Outcome, Side};
pub use fight::{BetLimits, Fight, FightResult, FightStatus, FighterRef, Winner};
pub use notification::{Notification, NotificationType};
pub use realtime::{
    BetUpdate, Command, DecodeError, EventKind, FightResultUpdate, FightStatusUpdate, Frame,
    RealtimeEvent, SystemAlert,
};
pub use wallet::{TransactionKind, TransactionUpdate, WalletSnapshot, WalletUpdate};
