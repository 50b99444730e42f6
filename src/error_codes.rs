//! Error codes for structured error handling in the Voidline REST API.
//!
//! The backend attaches an `error_code` to non-success responses, serialized
//! as `SCREAMING_SNAKE_CASE` strings (e.g. `"INVALID_CREDENTIALS"`). Codes the
//! client does not know about decode to [`ErrorCode::Unknown`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the Voidline backend.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    InvalidCredentials,
    AccountLocked,
    TokenExpired,
    InvalidToken,
    RefreshTokenReused,
    RefreshTokenRevoked,
    Unauthorized,

    // Registration errors
    UsernameTaken,
    InvalidInput,

    // Stream errors
    SubscriberNotFound,
    InvalidChannel,

    // Rate limiting
    RateLimitExceeded,

    // Server errors
    InternalError,
    ServiceUnavailable,

    /// A code this client version does not recognize.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "The username or password is incorrect.",
            Self::AccountLocked => "The account is locked. Contact support to unlock it.",
            Self::TokenExpired => "The access token has expired and must be renewed.",
            Self::InvalidToken => "The access token is malformed or was not issued by this server.",
            Self::RefreshTokenReused => {
                "The refresh token was already used. The session has been revoked."
            }
            Self::RefreshTokenRevoked => "The refresh token was revoked. Log in again.",
            Self::Unauthorized => "Authentication is required for this endpoint.",
            Self::UsernameTaken => "That username is already registered.",
            Self::InvalidInput => "The request payload failed validation.",
            Self::SubscriberNotFound => {
                "The stream subscriber is unknown. Reconnect to obtain a new subscriber ID."
            }
            Self::InvalidChannel => "One or more requested channels do not exist.",
            Self::RateLimitExceeded => "Too many requests. Slow down and retry later.",
            Self::InternalError => "The server hit an internal error.",
            Self::ServiceUnavailable => "The service is temporarily unavailable.",
            Self::Unknown => "Unrecognized error code.",
        }
    }

    /// Returns `true` for codes that mean the presented credentials are unusable.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::AccountLocked
                | Self::TokenExpired
                | Self::InvalidToken
                | Self::RefreshTokenReused
                | Self::RefreshTokenRevoked
                | Self::Unauthorized
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde representation so Display matches the wire format.
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// JSON body the backend sends alongside non-success status codes.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default, alias = "message")]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
}

/// Extract a message and optional [`ErrorCode`] from a response body.
///
/// Bodies that are not the expected JSON shape are returned verbatim as the
/// message.
pub(crate) fn parse_error_body(body: &str) -> (String, Option<ErrorCode>) {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => (
            parsed.error.unwrap_or_else(|| body.to_string()),
            parsed.error_code,
        ),
        Err(_) => (body.to_string(), None),
    }
}
