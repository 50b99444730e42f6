//! # Voidline Client
//!
//! Session and realtime-stream lifecycle layer for the Voidline game client.
//!
//! The crate keeps a bearer-token session valid across time and concurrent
//! requests, and owns the single streaming connection that fans server
//! events out to feature listeners.
//!
//! ## Features
//!
//! - **Coalesced renewal**: concurrent callers share one refresh call; both
//!   rotated tokens are persisted together
//! - **401 retry**: [`RequestGateway`] renews and retries once, then forces a
//!   debounced logout
//! - **Typed events**: stream frames are decoded once into [`GameEvent`]
//! - **Wildcard listeners**: `game.movement.*` receives every movement event
//! - **Reconnect with backoff**: listeners survive transient disconnects
//! - **Pluggable I/O**: implement [`HttpClient`], [`Connector`] and
//!   [`CredentialStore`], or use the default `reqwest` and WebSocket backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), voidline_client::VoidlineError> {
//! use voidline_client::{ClientConfig, Credentials, GameClient};
//! use voidline_client::protocol::GameEvent;
//!
//! let config = ClientConfig::new("https://api.voidline.example", "wss://api.voidline.example/stream");
//! let (client, _events) = GameClient::connect_default(config)?;
//!
//! client.stream().add_event_listener("game.movement.*", |event| {
//!     if let GameEvent::Jump(jump) = &event.event {
//!         println!("{} jumped to {}", jump.ship_id, jump.to_sector);
//!     }
//! });
//! client.session().login(&Credentials::new("ann", "hunter2")).await?;
//!
//! let cargo = client.gateway().get("/ships/current/cargo").await?;
//! println!("{cargo}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod error_codes;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod stream;
mod sync;
pub mod timer;
pub mod token;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use auth::{AuthApi, Credentials, Registration, TokenPair};
pub use client::GameClient;
pub use config::{ClientConfig, Endpoints, GatewayConfig, SessionConfig, StreamConfig};
pub use credentials::{CredentialKey, CredentialStore, MemoryCredentialStore};
pub use error::{Result, VoidlineError};
pub use error_codes::ErrorCode;
pub use gateway::RequestGateway;
pub use http::{HttpClient, HttpRequest, HttpResponse, Method};
pub use protocol::{ChannelSet, GameEvent, StreamEvent};
pub use registry::ListenerHandle;
pub use session::{
    LogoutReason, Session, SessionEvent, SessionManager, SessionState, StreamControl,
};
pub use stream::{ConnectionState, StreamManager};
pub use transport::{Connector, Transport};
