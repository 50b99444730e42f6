#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Voidline client integration tests.
//!
//! Provides an in-process [`FakeBackend`] that speaks the auth and subscribe
//! endpoints, a channel-based [`MockConnector`] for the event stream, and
//! helpers for building stream frames.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::mpsc;
use tokio::time::Instant;

use voidline_client::timer::{Clock, ManualClock};
use voidline_client::{
    ClientConfig, Connector, GameClient, HttpClient, HttpRequest, HttpResponse,
    MemoryCredentialStore, Method, SessionEvent, Transport, VoidlineError,
};

/// Wall-clock start time of every test, 2023-11-14.
pub const START_MS: u64 = 1_700_000_000_000;

/// The only password [`FakeBackend`] accepts.
pub const PASSWORD: &str = "hunter2";

/// Player ID issued on login.
pub const PLAYER_ID: &str = "player-1";

// ── Tokens ──────────────────────────────────────────────────────────

/// Build an unsigned JWT carrying `exp`, `sub` and a unique `jti`.
pub fn make_jwt(exp_secs: u64, sub: &str, jti: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD
        .encode(format!(r#"{{"exp":{exp_secs},"sub":"{sub}","jti":{jti}}}"#));
    format!("{header}.{body}.signature")
}

// ── Frames ──────────────────────────────────────────────────────────

/// The handshake frame.
pub fn connected_json(subscriber_id: &str) -> String {
    serde_json::json!({"type": "connected", "data": {"subscriber_id": subscriber_id}}).to_string()
}

/// A keep-alive frame.
pub fn heartbeat_json() -> String {
    serde_json::json!({"type": "heartbeat", "data": {"server_time": START_MS}}).to_string()
}

/// An arbitrary event frame.
pub fn event_json(event_type: &str, data: serde_json::Value) -> String {
    serde_json::json!({"type": event_type, "data": data}).to_string()
}

/// A valid `game.movement.jump` frame.
pub fn jump_json(ship_id: &str) -> String {
    event_json(
        "game.movement.jump",
        serde_json::json!({"ship_id": ship_id, "from_sector": "sol", "to_sector": "vega"}),
    )
}

// ── FakeBackend ─────────────────────────────────────────────────────

struct BackendState {
    valid_access: HashSet<String>,
    valid_refresh: HashSet<String>,
    /// access token -> refresh token issued alongside it
    pairs: HashMap<String, String>,
    token_ttl: Duration,
    fail_refresh: bool,
    refresh_latency: Duration,
    subscribe_status: u16,
    reject_all: bool,
}

/// In-process stand-in for the REST backend.
///
/// Issues real (unsigned) JWTs whose `exp` is derived from the shared
/// [`ManualClock`], rotates refresh tokens on every refresh, and records
/// every request it sees.
pub struct FakeBackend {
    pub clock: ManualClock,
    state: StdMutex<BackendState>,
    requests: StdMutex<Vec<HttpRequest>>,
    refresh_calls: AtomicUsize,
    serial: AtomicU64,
}

impl FakeBackend {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: StdMutex::new(BackendState {
                valid_access: HashSet::new(),
                valid_refresh: HashSet::new(),
                pairs: HashMap::new(),
                token_ttl: Duration::from_secs(3600),
                fail_refresh: false,
                refresh_latency: Duration::from_millis(50),
                subscribe_status: 200,
                reject_all: false,
            }),
            requests: StdMutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            serial: AtomicU64::new(1),
        }
    }

    /// Mint a valid token pair for `player_id`.
    pub fn issue(&self, player_id: &str) -> (String, String) {
        let jti = self.serial.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let exp = (self.clock.now_epoch_ms() + state.token_ttl.as_millis() as u64) / 1000;
        let access = make_jwt(exp, player_id, jti);
        let refresh = format!("refresh-{jti}");
        state.valid_access.insert(access.clone());
        state.valid_refresh.insert(refresh.clone());
        state.pairs.insert(access.clone(), refresh.clone());
        (access, refresh)
    }

    /// The refresh token minted together with `access`.
    pub fn paired_refresh(&self, access: &str) -> Option<String> {
        self.state.lock().unwrap().pairs.get(access).cloned()
    }

    /// Make the server reject `access` from now on.
    pub fn expire_access(&self, access: &str) {
        self.state.lock().unwrap().valid_access.remove(access);
    }

    pub fn set_token_ttl(&self, ttl: Duration) {
        self.state.lock().unwrap().token_ttl = ttl;
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.state.lock().unwrap().fail_refresh = fail;
    }

    pub fn set_refresh_latency(&self, latency: Duration) {
        self.state.lock().unwrap().refresh_latency = latency;
    }

    pub fn set_subscribe_status(&self, status: u16) {
        self.state.lock().unwrap().subscribe_status = status;
    }

    /// Answer 401 to every game request, even with a valid token.
    pub fn set_reject_all(&self, reject: bool) {
        self.state.lock().unwrap().reject_all = reject;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    fn authorized(&self, request: &HttpRequest) -> bool {
        let state = self.state.lock().unwrap();
        request
            .bearer
            .as_ref()
            .is_some_and(|token| state.valid_access.contains(token))
    }

    fn tokens_response(&self, player_id: &str, include_player: bool) -> HttpResponse {
        let (access, refresh) = self.issue(player_id);
        let mut body = serde_json::json!({"access_token": access, "refresh_token": refresh});
        if include_player {
            body["player_id"] = serde_json::Value::from(player_id);
        }
        HttpResponse::json(200, &body)
    }

    async fn refresh(&self, request: &HttpRequest) -> HttpResponse {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let (latency, fail) = {
            let state = self.state.lock().unwrap();
            (state.refresh_latency, state.fail_refresh)
        };
        tokio::time::sleep(latency).await;

        if fail {
            return HttpResponse::json(
                401,
                &serde_json::json!({"error": "revoked", "error_code": "REFRESH_TOKEN_REVOKED"}),
            );
        }
        let presented = request
            .body
            .as_ref()
            .and_then(|b| b["refresh_token"].as_str())
            .unwrap_or_default()
            .to_string();
        if !self.state.lock().unwrap().valid_refresh.remove(&presented) {
            return HttpResponse::json(
                401,
                &serde_json::json!({"error": "reused", "error_code": "REFRESH_TOKEN_REUSED"}),
            );
        }
        self.tokens_response(PLAYER_ID, false)
    }
}

#[async_trait]
impl HttpClient for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, VoidlineError> {
        self.requests.lock().unwrap().push(request.clone());
        let body = request.body.clone().unwrap_or(serde_json::Value::Null);

        let response = match (request.method, request.path.as_str()) {
            (Method::Post, "/auth/login") => {
                if body["password"] == PASSWORD {
                    self.tokens_response(PLAYER_ID, true)
                } else {
                    HttpResponse::json(
                        401,
                        &serde_json::json!({"error": "bad credentials", "error_code": "INVALID_CREDENTIALS"}),
                    )
                }
            }
            (Method::Post, "/auth/signup") => {
                if body["username"] == "taken" {
                    HttpResponse::json(
                        409,
                        &serde_json::json!({"error": "username taken", "error_code": "USERNAME_TAKEN"}),
                    )
                } else {
                    let player = format!("player-{}", body["username"].as_str().unwrap_or("new"));
                    self.tokens_response(&player, true)
                }
            }
            (Method::Post, "/auth/refresh") => self.refresh(&request).await,
            (Method::Post, "/auth/logout") => HttpResponse::new(204, ""),
            (Method::Post, "/stream/subscribe") => {
                if !self.authorized(&request) {
                    HttpResponse::new(401, "")
                } else {
                    let status = self.state.lock().unwrap().subscribe_status;
                    if status == 200 {
                        HttpResponse::json(200, &serde_json::json!({"subscribed": true}))
                    } else {
                        HttpResponse::json(status, &serde_json::json!({"error": "nope"}))
                    }
                }
            }
            (_, "/fail/500") => HttpResponse::json(500, &serde_json::json!({"error": "boom"})),
            (_, path) => {
                let reject_all = self.state.lock().unwrap().reject_all;
                if reject_all || !self.authorized(&request) {
                    HttpResponse::json(401, &serde_json::json!({"error": "unauthorized"}))
                } else {
                    HttpResponse::json(200, &serde_json::json!({"path": path, "ok": true}))
                }
            }
        };
        Ok(response)
    }
}

// ── MockConnector / MockTransport ───────────────────────────────────

struct ServerInner {
    tx: StdMutex<Option<mpsc::UnboundedSender<Result<String, VoidlineError>>>>,
    closed: AtomicBool,
    bearer: String,
    opened_at: Instant,
}

/// The server end of one mock stream connection.
#[derive(Clone)]
pub struct ServerSide {
    inner: Arc<ServerInner>,
}

impl ServerSide {
    /// Send a text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(tx) = self.inner.tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(frame.into()));
        }
    }

    /// Deliver a transport error to the client.
    pub fn fail(&self, message: &str) {
        if let Some(tx) = self.inner.tx.lock().unwrap().as_ref() {
            let _ = tx.send(Err(VoidlineError::TransportReceive(message.to_string())));
        }
    }

    /// Close the connection cleanly from the server side.
    pub fn hang_up(&self) {
        self.inner.tx.lock().unwrap().take();
    }

    /// Whether the client called `close()` on its end.
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The bearer token the connection was opened with.
    pub fn bearer(&self) -> &str {
        &self.inner.bearer
    }

    pub fn opened_at(&self) -> Instant {
        self.inner.opened_at
    }
}

/// A channel-backed [`Transport`]. `recv` is cancel-safe.
pub struct MockTransport {
    rx: mpsc::UnboundedReceiver<Result<String, VoidlineError>>,
    server: Arc<ServerInner>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> Option<Result<String, VoidlineError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<(), VoidlineError> {
        self.server.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ConnectorState {
    fail_opens: bool,
    auto_handshake: bool,
    servers: Vec<ServerSide>,
    failed_at: Vec<Instant>,
}

/// Hands out [`MockTransport`]s and keeps their [`ServerSide`]s.
///
/// With auto-handshake enabled (the default) each new connection
/// immediately receives `connected { subscriber_id: "sub-N" }`, N counting
/// from 1.
pub struct MockConnector {
    state: StdMutex<ConnectorState>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(ConnectorState {
                fail_opens: false,
                auto_handshake: true,
                servers: Vec::new(),
                failed_at: Vec::new(),
            }),
        }
    }

    /// Refuse every open while `fail` is set.
    pub fn set_fail_opens(&self, fail: bool) {
        self.state.lock().unwrap().fail_opens = fail;
    }

    pub fn set_auto_handshake(&self, auto: bool) {
        self.state.lock().unwrap().auto_handshake = auto;
    }

    /// Successful connections, oldest first.
    pub fn servers(&self) -> Vec<ServerSide> {
        self.state.lock().unwrap().servers.clone()
    }

    /// The most recent successful connection.
    pub fn latest(&self) -> ServerSide {
        self.servers().pop().expect("no connection opened yet")
    }

    /// Times at which opens were refused.
    pub fn failed_at(&self) -> Vec<Instant> {
        self.state.lock().unwrap().failed_at.clone()
    }

    /// Total number of open attempts, successful or not.
    pub fn open_attempts(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.servers.len() + state.failed_at.len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, bearer_token: &str) -> Result<Box<dyn Transport>, VoidlineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_opens {
            state.failed_at.push(Instant::now());
            return Err(VoidlineError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let server = Arc::new(ServerInner {
            tx: StdMutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            bearer: bearer_token.to_string(),
            opened_at: Instant::now(),
        });
        let side = ServerSide {
            inner: Arc::clone(&server),
        };
        state.servers.push(side.clone());
        if state.auto_handshake {
            side.push(connected_json(&format!("sub-{}", state.servers.len())));
        }
        Ok(Box::new(MockTransport { rx, server }))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// A fully wired client over fakes.
pub struct Harness {
    pub client: GameClient,
    pub events: mpsc::Receiver<SessionEvent>,
    pub backend: Arc<FakeBackend>,
    pub connector: Arc<MockConnector>,
    pub store: Arc<MemoryCredentialStore>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryCredentialStore::new()))
    }

    pub fn with_store(config: ClientConfig, store: Arc<MemoryCredentialStore>) -> Self {
        let clock = ManualClock::new(START_MS);
        Self::build(config, store, clock)
    }

    pub fn build(config: ClientConfig, store: Arc<MemoryCredentialStore>, clock: ManualClock) -> Self {
        let backend = Arc::new(FakeBackend::new(clock.clone()));
        let connector = Arc::new(MockConnector::new());
        let (client, events) = GameClient::with_clock(
            config,
            backend.clone(),
            connector.clone(),
            store.clone(),
            Arc::new(clock.clone()),
        );
        Self {
            client,
            events,
            backend,
            connector,
            store,
            clock,
        }
    }

    /// Log in with the accepted password.
    pub async fn login(&self) -> voidline_client::Session {
        self.client
            .session()
            .login(&voidline_client::Credentials::new("ann", PASSWORD))
            .await
            .expect("login should succeed")
    }

    /// Every session event received so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Poll `condition` once per virtual millisecond until it holds.
///
/// Panics after `limit` of virtual time.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("condition not met within {limit:?}");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Let spawned tasks run without advancing virtual time.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
