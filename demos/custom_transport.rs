//! # Custom Transport Example
//!
//! Shows how to plug your own I/O into the client by implementing
//! [`HttpClient`], [`Connector`] and [`Transport`]. Everything here runs in
//! process:
//!
//! - an in-memory REST backend that issues unsigned JWTs and accepts
//!   subscriptions
//! - a loopback stream whose "server" task sends the handshake and a few
//!   game events
//!
//! The same approach adapts the client to any I/O layer (TCP, QUIC, a
//! platform HTTP stack) or to an offline test harness.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::mpsc;
use voidline_client::protocol::GameEvent;
use voidline_client::timer::{Clock, SystemClock};
use voidline_client::{
    ClientConfig, Connector, Credentials, GameClient, HttpClient, HttpRequest, HttpResponse,
    MemoryCredentialStore, SessionEvent, Transport, VoidlineError,
};

// ─────────────────────────────────────────────────────────────────────
// Step 1: An in-memory REST backend
// ─────────────────────────────────────────────────────────────────────

/// Answers the auth and subscribe endpoints; everything else echoes its
/// path.
struct InMemoryBackend {
    serial: AtomicU64,
}

impl InMemoryBackend {
    fn token_pair(&self) -> serde_json::Value {
        let n = self.serial.fetch_add(1, Ordering::SeqCst);
        let exp = SystemClock.now_epoch_ms() / 1000 + 3600;
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"sub":"pilot-7"}}"#));
        serde_json::json!({
            "access_token": format!("{header}.{claims}.{n}"),
            "refresh_token": format!("refresh-{n}"),
            "player_id": "pilot-7",
        })
    }
}

#[async_trait]
impl HttpClient for InMemoryBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, VoidlineError> {
        tracing::info!(method = request.method.as_str(), path = %request.path, "backend request");
        let response = match request.path.as_str() {
            "/auth/login" | "/auth/refresh" => HttpResponse::json(200, &self.token_pair()),
            "/auth/logout" => HttpResponse::new(204, ""),
            _ if request.bearer.is_none() => HttpResponse::new(401, ""),
            "/stream/subscribe" => HttpResponse::json(200, &serde_json::json!({"ok": true})),
            path => HttpResponse::json(200, &serde_json::json!({"path": path})),
        };
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A loopback stream
// ─────────────────────────────────────────────────────────────────────

/// The client half of a loopback connection.
struct LoopbackTransport {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    /// Cancel-safe because `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, VoidlineError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), VoidlineError> {
        self.rx.close();
        Ok(())
    }
}

/// Opens loopback connections, each driven by a scripted server task.
struct LoopbackConnector;

fn frame(event_type: &str, data: serde_json::Value) -> String {
    serde_json::json!({"type": event_type, "data": data}).to_string()
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, bearer_token: &str) -> Result<Box<dyn Transport>, VoidlineError> {
        if bearer_token.is_empty() {
            return Err(VoidlineError::Unauthorized);
        }
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let script = [
                frame("connected", serde_json::json!({"subscriber_id": "loopback-1"})),
                frame(
                    "game.movement.jump",
                    serde_json::json!({"ship_id": "ship-1", "from_sector": "sol", "to_sector": "vega"}),
                ),
                frame(
                    "game.economy.price_update",
                    serde_json::json!({"market_id": "vega-station", "commodity": "ore", "price": 14.2}),
                ),
                frame("heartbeat", serde_json::json!({})),
                frame(
                    "game.chat.message",
                    serde_json::json!({"channel": "global", "sender_id": "p2", "text": "o7"}),
                ),
            ];
            for text in script {
                if tx.send(text).is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            // Keep the connection open until the client closes it.
            tx.closed().await;
        });

        Ok(Box::new(LoopbackTransport { rx }))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire it together
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (client, mut session_events) = GameClient::new(
        ClientConfig::default(),
        Arc::new(InMemoryBackend {
            serial: AtomicU64::new(1),
        }),
        Arc::new(LoopbackConnector),
        Arc::new(MemoryCredentialStore::new()),
    );

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    for key in ["game.movement.*", "game.economy.*", "game.chat.message"] {
        let seen_tx = seen_tx.clone();
        client.stream().add_event_listener(key, move |event| {
            let line = match &event.event {
                GameEvent::Jump(jump) => format!("{} jumped to {}", jump.ship_id, jump.to_sector),
                GameEvent::PriceUpdate(p) => format!("{} at {}: {}", p.commodity, p.market_id, p.price),
                GameEvent::ChatMessage(m) => format!("[{}] {}: {}", m.channel, m.sender_id, m.text),
                other => format!("{other:?}"),
            };
            let _ = seen_tx.send(line);
        });
    }

    client
        .session()
        .login(&Credentials::new("pilot", "correct horse"))
        .await?;

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(5), seen_rx.recv()).await {
            Ok(Some(line)) => tracing::info!("event: {line}"),
            _ => return Err("loopback stream stopped early".into()),
        }
    }

    let cargo = client.gateway().get("/ships/ship-1/cargo").await?;
    tracing::info!(%cargo, "gateway response");

    client.session().logout(false).await?;
    while let Ok(event) = session_events.try_recv() {
        if let SessionEvent::LoggedOut { reason, forced } = event {
            tracing::info!(%reason, forced, "logged out");
        }
    }
    Ok(())
}
