//! Concrete transports for the stream and the REST backend.
//!
//! Each implementation sits behind a Cargo feature:
//!
//! | Feature                | Provides                                     |
//! |------------------------|----------------------------------------------|
//! | `transport-websocket`  | [`WebSocketConnector`], [`WebSocketTransport`] |
//! | `http-reqwest`         | [`ReqwestHttpClient`]                        |
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voidline_client::transports::{ReqwestHttpClient, WebSocketConnector};
//!
//! let http = Arc::new(ReqwestHttpClient::new("https://api.example.com")?);
//! let connector = Arc::new(WebSocketConnector::new("wss://api.example.com/stream"));
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};

#[cfg(feature = "http-reqwest")]
pub mod http_reqwest;

#[cfg(feature = "http-reqwest")]
pub use http_reqwest::ReqwestHttpClient;
