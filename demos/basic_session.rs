//! # Basic Session Example
//!
//! Demonstrates a complete Voidline client lifecycle against a real backend:
//!
//! 1. Restore a stored session, or log in with username and password
//! 2. Open the event stream and subscribe to a sector and the global chat
//! 3. React to movement, combat and chat events
//! 4. Call a REST endpoint through the renewing gateway
//! 5. Log out on Ctrl+C, or return to "login screen" on a forced logout
//!
//! ## Running
//!
//! ```sh
//! VOIDLINE_USER=ann VOIDLINE_PASSWORD=hunter2 cargo run --example basic_session
//!
//! # Override the backend:
//! VOIDLINE_API=https://api.example VOIDLINE_STREAM=wss://api.example/stream \
//!     cargo run --example basic_session
//! ```

use voidline_client::protocol::GameEvent;
use voidline_client::{ChannelSet, ClientConfig, Credentials, GameClient, SessionEvent};

/// Default backend when `VOIDLINE_API` is not set.
const DEFAULT_API: &str = "http://localhost:8080";
/// Default stream endpoint when `VOIDLINE_STREAM` is not set.
const DEFAULT_STREAM: &str = "ws://localhost:8080/stream";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=voidline_client=debug` for session and stream traces.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = ClientConfig::new(
        env_or("VOIDLINE_API", DEFAULT_API),
        env_or("VOIDLINE_STREAM", DEFAULT_STREAM),
    );
    tracing::info!(api = %config.api_base_url, stream = %config.stream_url, "starting");
    let (client, mut session_events) = GameClient::connect_default(config)?;

    // ── Listeners ───────────────────────────────────────────────────
    // Registered before login so nothing from the first connection is
    // missed. They survive reconnects; logout drops them.
    client.stream().add_event_listener("game.movement.*", |event| {
        if let GameEvent::Jump(jump) = &event.event {
            tracing::info!("{} jumped {} -> {}", jump.ship_id, jump.from_sector, jump.to_sector);
        }
    });
    client.stream().add_event_listener("game.combat.*", |event| match &event.event {
        GameEvent::CombatStart(start) => tracing::info!("combat {} started", start.combat_id),
        GameEvent::CombatRound(round) => {
            tracing::info!("combat {} round {}", round.combat_id, round.round);
        }
        GameEvent::CombatEnd(end) => tracing::info!(
            "combat {} won by {}",
            end.combat_id,
            end.winner.as_deref().unwrap_or("nobody")
        ),
        _ => {}
    });
    client.stream().add_event_listener("game.chat.message", |event| {
        if let GameEvent::ChatMessage(msg) = &event.event {
            tracing::info!("[{}] {}: {}", msg.channel, msg.sender_id, msg.text);
        }
    });

    // ── Login ───────────────────────────────────────────────────────
    let session = match client.session().restore() {
        Some(session) => session,
        None => {
            let credentials = Credentials::new(
                env_or("VOIDLINE_USER", "ann"),
                env_or("VOIDLINE_PASSWORD", "hunter2"),
            );
            client.session().login(&credentials).await?
        }
    };
    tracing::info!(player_id = %session.player_id, "logged in");

    let channels = ChannelSet::for_player(&session.player_id)
        .with_sector("sol")
        .with_chat("global");
    // If the stream is still handshaking this fails with `NotConnected`, but
    // the list is kept and sent once the connection opens.
    if let Err(e) = client.stream().subscribe_to_channels(channels).await {
        tracing::debug!("channel subscription deferred: {e}");
    }

    match client.gateway().get("/ships/current").await {
        Ok(ship) => tracing::info!(%ship, "current ship"),
        Err(e) => tracing::warn!("could not load ship: {e}"),
    }

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = session_events.recv() => match event {
                Some(SessionEvent::LoggedOut { reason, forced: true }) => {
                    tracing::warn!(%reason, "session ended; back to login screen");
                    break;
                }
                Some(other) => tracing::info!(?other, "session event"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; logging out");
                client.session().logout(false).await?;
                break;
            }
        }
    }

    client.shutdown();
    Ok(())
}
