use serde::{Deserialize, Serialize};

/// Machine-readable reason a command was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidAmount,
    FightNotOpen,
    OperatorBet,
    SelfAcceptance,
    InsufficientFunds,
    NotCreator,
    AlreadyAccepted,
    WindowExpired,
    AlreadySettled,
    AlreadyCancelled,
    NotFound,
    Unauthorized,
}

impl ErrorCode {
    /// HTTP status the code is served with.
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::InvalidAmount
            | ErrorCode::FightNotOpen
            | ErrorCode::SelfAcceptance
            | ErrorCode::InsufficientFunds => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::OperatorBet | ErrorCode::NotCreator => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyAccepted
            | ErrorCode::WindowExpired
            | ErrorCode::AlreadySettled
            | ErrorCode::AlreadyCancelled => 409,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::InvalidAmount => "amount is outside the fight's bet limits",
            ErrorCode::FightNotOpen => "fight is not open for betting",
            ErrorCode::OperatorBet => "fight operators may not bet on their own fight",
            ErrorCode::SelfAcceptance => "you cannot accept your own bet",
            ErrorCode::InsufficientFunds => "insufficient balance",
            ErrorCode::NotCreator => "only the creator may cancel a bet",
            ErrorCode::AlreadyAccepted => "bet was already accepted",
            ErrorCode::WindowExpired => "the 20 minute cancellation window has expired",
            ErrorCode::AlreadySettled => "bet is already settled",
            ErrorCode::AlreadyCancelled => "bet was cancelled",
            ErrorCode::NotFound => "not found",
            ErrorCode::Unauthorized => "authentication required",
        }
    }
}

/// Error body returned by the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub success: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            success: false,
            status: code.status(),
            code: Some(code),
            message: code.message().to_string(),
        }
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for ApiError {}

/// Success body returned by the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedRead {
    pub updated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body() {
        let body = serde_json::to_value(ApiError::new(ErrorCode::WindowExpired)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], 409);
        assert_eq!(body["code"], "WINDOW_EXPIRED");

        // Bodies without a code still parse.
        let parsed: ApiError =
            serde_json::from_str(r#"{"status":500,"message":"boom"}"#).unwrap();
        assert_eq!(parsed.code, None);
        assert_eq!(parsed.to_string(), "boom (500)");
    }
}
