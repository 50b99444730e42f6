//! Composition root wiring the session, gateway, and stream together.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), voidline_client::VoidlineError> {
//! use voidline_client::{ClientConfig, Credentials, GameClient, SessionEvent};
//!
//! let config = ClientConfig::new("https://api.voidline.example", "wss://api.voidline.example/stream");
//! let (client, mut events) = GameClient::connect_default(config)?;
//!
//! client.session().login(&Credentials::new("ann", "hunter2")).await?;
//! client.stream().add_event_listener("game.chat.message", |event| {
//!     println!("{:?}", event.event);
//! });
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::LoggedOut { forced: true, .. } = event {
//!         // back to the login screen
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::auth::AuthApi;
use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::gateway::RequestGateway;
use crate::http::HttpClient;
use crate::session::{SessionEvent, SessionManager};
use crate::stream::StreamManager;
use crate::timer::{Clock, SystemClock};
use crate::transport::Connector;

/// One fully wired client instance.
///
/// Built once at application start and handed to features by reference or
/// clone. Tests build as many isolated instances as they like.
#[derive(Clone)]
pub struct GameClient {
    session: SessionManager,
    gateway: RequestGateway,
    stream: StreamManager,
    config: ClientConfig,
}

impl GameClient {
    /// Wire a client from its external collaborators.
    ///
    /// Returns the client and the receiving end of the session event
    /// channel. The receiver should be drained; [`SessionEvent::LoggedOut`]
    /// waits for channel capacity.
    pub fn new(
        config: ClientConfig,
        http: Arc<dyn HttpClient>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::with_clock(config, http, connector, store, Arc::new(SystemClock))
    }

    /// As [`new`](Self::new), reading wall-clock time from `clock`.
    pub fn with_clock(
        config: ClientConfig,
        http: Arc<dyn HttpClient>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let api = AuthApi::new(Arc::clone(&http), config.endpoints.clone());
        let (session, events) = SessionManager::with_clock(
            api,
            store,
            config.session.clone(),
            Arc::clone(&clock),
        );
        let gateway = RequestGateway::new(
            session.clone(),
            http,
            config.gateway.clone(),
            config.endpoints.clone(),
        );
        let stream = StreamManager::with_clock(
            config.stream.clone(),
            connector,
            gateway.clone(),
            config.endpoints.subscribe.clone(),
            clock,
        );
        session.attach_stream(stream.control());

        (
            Self {
                session,
                gateway,
                stream,
                config,
            },
            events,
        )
    }

    /// Wire a client using the bundled reqwest and WebSocket backends and
    /// in-memory credential storage.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Io`](crate::VoidlineError::Io) if the HTTP
    /// client cannot be built.
    #[cfg(all(feature = "http-reqwest", feature = "transport-websocket"))]
    pub fn connect_default(
        config: ClientConfig,
    ) -> crate::Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let http = Arc::new(crate::transports::ReqwestHttpClient::new(
            config.api_base_url.clone(),
        )?);
        let connector = Arc::new(crate::transports::WebSocketConnector::new(
            config.stream_url.clone(),
        ));
        let store = Arc::new(crate::credentials::MemoryCredentialStore::new());
        Ok(Self::new(config, http, connector, store))
    }

    /// Session lifecycle and tokens.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Authenticated REST requests.
    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    /// Realtime events.
    pub fn stream(&self) -> &StreamManager {
        &self.stream
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop timers and close the stream without touching stored credentials,
    /// so the session can be restored on next launch.
    pub fn shutdown(&self) {
        self.session.cancel_timers();
        self.stream.disconnect();
        info!("client shut down");
    }
}

impl fmt::Debug for GameClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameClient")
            .field("session", &self.session)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}
