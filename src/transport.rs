//! Transport abstraction for the realtime event stream.
//!
//! The [`Transport`] trait is a server-to-client channel of JSON text frames.
//! Each frame is one complete `{"type": ..., "data": ...}` envelope; the
//! transport handles framing internally (WebSocket frames, SSE records,
//! length-prefixed TCP, ...).
//!
//! # Connection Setup
//!
//! Unlike a plain client, the stream manager must be able to *re*-open the
//! connection after transport errors, with a fresh bearer token each time.
//! Connection setup is therefore delegated to a [`Connector`], which the
//! [`StreamManager`](crate::StreamManager) calls once per connection attempt.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use voidline_client::error::VoidlineError;
//! use voidline_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn recv(&mut self) -> Option<Result<String, VoidlineError>> {
//!         // Receive the next JSON text frame.
//!         // Return None when the connection is closed cleanly.
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), VoidlineError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn open(&self, bearer_token: &str) -> Result<Box<dyn Transport>, VoidlineError> {
//!         // Open the stream with `Authorization: Bearer <bearer_token>`.
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::VoidlineError;

/// A server-to-client stream of JSON text frames.
///
/// # Object Safety
///
/// This trait is object-safe; connectors hand out `Box<dyn Transport>`.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations (e.g.,
/// wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred (e.g., [`VoidlineError::TransportReceive`])
    /// - `None`: the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, VoidlineError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`recv`](Transport::recv)
    /// may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), VoidlineError>;
}

/// Opens authorized [`Transport`]s to the streaming endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream authorized by `bearer_token`.
    ///
    /// Resolving `Ok` is the transport's "open" signal. The application-level
    /// `connected` frame is read afterwards by the stream manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be established or the
    /// server refused the token.
    async fn open(&self, bearer_token: &str) -> Result<Box<dyn Transport>, VoidlineError>;
}
