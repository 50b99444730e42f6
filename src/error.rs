//! Error types for the Voidline client.

use thiserror::Error;

use crate::error_codes::ErrorCode;

/// Errors that can occur in the session, gateway, and stream layers.
#[derive(Debug, Error)]
pub enum VoidlineError {
    /// The login or signup endpoint rejected the supplied credentials.
    #[error("invalid credentials")]
    AuthInvalidCredentials,

    /// Token renewal failed or a retried request was rejected again.
    #[error("session expired")]
    SessionExpired,

    /// A request without a bearer token was rejected with 401.
    #[error("unauthorized")]
    Unauthorized,

    /// The stream did not follow the expected handshake or framing.
    #[error("stream protocol error: {0}")]
    StreamProtocol(String),

    /// The subscribe endpoint answered with a tolerated failure status.
    ///
    /// Only logged, never returned to callers.
    #[error("channel subscription soft failure (status {status})")]
    SubscriptionSoftFail {
        /// HTTP status returned by the subscribe endpoint.
        status: u16,
    },

    /// A registered event listener panicked.
    ///
    /// Only logged, never returned to callers.
    #[error("listener for {event_type} panicked: {message}")]
    ListenerFault {
        /// The event type being dispatched.
        event_type: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("http error {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Human-readable error message from the server.
        message: String,
        /// Structured error code, if provided by the server.
        error_code: Option<ErrorCode>,
    },

    /// Failed to send a request through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive data from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stream is not open.
    #[error("not connected to the event stream")]
    NotConnected,

    /// The operation is not valid in the current session state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoidlineError {
    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::SubscriptionSoftFail { status } => Some(*status),
            _ => None,
        }
    }
}

/// A specialized [`Result`] type for Voidline client operations.
pub type Result<T> = std::result::Result<T, VoidlineError>;
