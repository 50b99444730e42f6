//! Wire types for the realtime event stream.
//!
//! Every frame on the stream is a JSON envelope:
//!
//! ```json
//! {"type": "game.combat.start", "data": {"combat_id": "c1", ...}}
//! ```
//!
//! Frames are decoded once, at the transport boundary, into the closed
//! [`GameEvent`] union so listeners receive typed payloads. Event types this
//! client does not know are preserved as [`GameEvent::Unknown`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoidlineError};

/// Event type of the handshake frame that carries the subscriber ID.
pub const CONNECTED_EVENT: &str = "connected";

/// Event type of the periodic keep-alive frame.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

// ── Envelope ────────────────────────────────────────────────────────

/// A raw stream frame before payload validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Dot-namespaced event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload. Missing payloads decode as `null`.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl StreamFrame {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] if `text` is not an envelope.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build a frame, serializing `data`.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] if `data` cannot be serialized.
    pub fn new<T: Serialize>(event_type: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self {
            event_type: event_type.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Serialize this frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] on serializer failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validate the payload against the event catalog.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] if a known event type carries
    /// a payload of the wrong shape.
    pub fn decode(self) -> Result<GameEvent> {
        GameEvent::decode(&self.event_type, self.data)
    }
}

// ── Handshake ───────────────────────────────────────────────────────

/// Payload of the `connected` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Server-issued handle required by the subscribe endpoint.
    pub subscriber_id: String,
}

/// Read the subscriber ID out of the first frame of a connection.
///
/// # Errors
///
/// Returns [`VoidlineError::StreamProtocol`] if the frame is not a
/// well-formed `connected` event.
pub fn parse_connected(text: &str) -> Result<ConnectedPayload> {
    let frame = StreamFrame::parse(text)
        .map_err(|e| VoidlineError::StreamProtocol(format!("malformed handshake frame: {e}")))?;
    if frame.event_type != CONNECTED_EVENT {
        return Err(VoidlineError::StreamProtocol(format!(
            "expected `{CONNECTED_EVENT}` event, got `{}`",
            frame.event_type
        )));
    }
    let payload: ConnectedPayload = serde_json::from_value(frame.data)
        .map_err(|e| VoidlineError::StreamProtocol(format!("malformed connected payload: {e}")))?;
    if payload.subscriber_id.is_empty() {
        return Err(VoidlineError::StreamProtocol(
            "connected event carried an empty subscriber_id".into(),
        ));
    }
    Ok(payload)
}

/// Payload of the `heartbeat` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Server time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<u64>,
}

// ── Channels ────────────────────────────────────────────────────────

/// The topics a client wants events for.
///
/// Sent verbatim in the subscribe request; the stream manager never derives
/// or rewrites topics.
///
/// ```
/// use voidline_client::protocol::ChannelSet;
///
/// let channels = ChannelSet::for_player("p1")
///     .with_sector("sol-3")
///     .with_chat("global");
/// assert_eq!(channels.as_slice(), ["player:p1", "sector:sol-3", "chat:global"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet(Vec<String>);

impl ChannelSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set containing the player-scoped topic.
    pub fn for_player(player_id: &str) -> Self {
        Self(vec![format!("player:{player_id}")])
    }

    /// Add a raw topic. Duplicates are ignored.
    pub fn push(&mut self, channel: impl Into<String>) {
        let channel = channel.into();
        if !self.0.contains(&channel) {
            self.0.push(channel);
        }
    }

    /// Add a raw topic.
    #[must_use]
    pub fn with(mut self, channel: impl Into<String>) -> Self {
        self.push(channel);
        self
    }

    /// Add the topic for a sector.
    #[must_use]
    pub fn with_sector(self, sector_id: &str) -> Self {
        self.with(format!("sector:{sector_id}"))
    }

    /// Add the topic for a combat encounter.
    #[must_use]
    pub fn with_combat(self, combat_id: &str) -> Self {
        self.with(format!("combat:{combat_id}"))
    }

    /// Add the topic for a market.
    #[must_use]
    pub fn with_market(self, market_id: &str) -> Self {
        self.with(format!("market:{market_id}"))
    }

    /// Add the topic for a chat room.
    #[must_use]
    pub fn with_chat(self, room: &str) -> Self {
        self.with(format!("chat:{room}"))
    }

    /// The topics, in insertion order.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Number of topics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no topics.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::new();
        for channel in iter {
            set.push(channel);
        }
        set
    }
}

/// Body of `POST subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Handle from the `connected` frame.
    pub subscriber_id: String,
    /// Requested topics.
    pub channels: ChannelSet,
}

// ── Event payloads ──────────────────────────────────────────────────

/// A ship jumped between sectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpPayload {
    pub ship_id: String,
    pub from_sector: String,
    pub to_sector: String,
}

/// A ship's position inside a sector changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPayload {
    pub ship_id: String,
    pub sector_id: String,
    pub x: f64,
    pub y: f64,
}

/// Long-distance travel started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelStartedPayload {
    pub ship_id: String,
    pub destination: String,
    /// Estimated arrival, milliseconds since the Unix epoch.
    pub eta_epoch_ms: u64,
}

/// Long-distance travel finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelArrivedPayload {
    pub ship_id: String,
    pub destination: String,
}

/// A combat encounter began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatStartPayload {
    pub combat_id: String,
    pub sector_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// One round of combat resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatRoundPayload {
    pub combat_id: String,
    pub round: u32,
    /// Per-action results; shapes vary by weapon and are left untyped.
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
}

/// A combat encounter ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatEndPayload {
    pub combat_id: String,
    #[serde(default)]
    pub winner: Option<String>,
}

/// A commodity price changed at a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdatePayload {
    pub market_id: String,
    pub commodity: String,
    pub price: f64,
}

/// A buy or sell order filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCompletedPayload {
    pub trade_id: String,
    pub commodity: String,
    pub quantity: u64,
    /// Credit delta for the player; negative for purchases.
    pub credits: i64,
}

/// A mining cycle produced resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningYieldPayload {
    pub ship_id: String,
    pub resource: String,
    pub amount: u64,
}

/// Mission progress changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionUpdatePayload {
    pub mission_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
}

/// A station service (repair, refuel, refit) finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCompletedPayload {
    pub service: String,
    pub ship_id: String,
    pub cost: i64,
}

/// Another player's presence changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub player_id: String,
    pub online: bool,
}

/// A chat message was posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub channel: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub sent_at: Option<String>,
}

// ── Event union ─────────────────────────────────────────────────────

/// A validated stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// `connected`
    Connected(ConnectedPayload),
    /// `heartbeat`
    Heartbeat(HeartbeatPayload),
    /// `game.movement.jump`
    Jump(JumpPayload),
    /// `game.movement.position`
    Position(PositionPayload),
    /// `game.travel.started`
    TravelStarted(TravelStartedPayload),
    /// `game.travel.arrived`
    TravelArrived(TravelArrivedPayload),
    /// `game.combat.start`
    CombatStart(CombatStartPayload),
    /// `game.combat.round`
    CombatRound(CombatRoundPayload),
    /// `game.combat.end`
    CombatEnd(CombatEndPayload),
    /// `game.economy.price_update`
    PriceUpdate(PriceUpdatePayload),
    /// `game.economy.trade_completed`
    TradeCompleted(TradeCompletedPayload),
    /// `game.mining.yield`
    MiningYield(MiningYieldPayload),
    /// `game.missions.updated`
    MissionUpdated(MissionUpdatePayload),
    /// `game.services.completed`
    ServiceCompleted(ServiceCompletedPayload),
    /// `game.social.presence`
    Presence(PresencePayload),
    /// `game.chat.message`
    ChatMessage(ChatMessagePayload),
    /// Any event type not in the catalog, payload untouched.
    Unknown(serde_json::Value),
}

fn payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(data)?)
}

impl GameEvent {
    /// Validate `data` for `event_type` and narrow it to a typed variant.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] if a catalogued type carries
    /// a payload of the wrong shape. Unknown types never fail.
    pub fn decode(event_type: &str, data: serde_json::Value) -> Result<Self> {
        // Payload-less frames are treated as empty objects.
        let data = if data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            data
        };

        let event = match event_type {
            CONNECTED_EVENT => Self::Connected(payload(data)?),
            HEARTBEAT_EVENT => Self::Heartbeat(payload(data)?),
            "game.movement.jump" => Self::Jump(payload(data)?),
            "game.movement.position" => Self::Position(payload(data)?),
            "game.travel.started" => Self::TravelStarted(payload(data)?),
            "game.travel.arrived" => Self::TravelArrived(payload(data)?),
            "game.combat.start" => Self::CombatStart(payload(data)?),
            "game.combat.round" => Self::CombatRound(payload(data)?),
            "game.combat.end" => Self::CombatEnd(payload(data)?),
            "game.economy.price_update" => Self::PriceUpdate(payload(data)?),
            "game.economy.trade_completed" => Self::TradeCompleted(payload(data)?),
            "game.mining.yield" => Self::MiningYield(payload(data)?),
            "game.missions.updated" => Self::MissionUpdated(payload(data)?),
            "game.services.completed" => Self::ServiceCompleted(payload(data)?),
            "game.social.presence" => Self::Presence(payload(data)?),
            "game.chat.message" => Self::ChatMessage(payload(data)?),
            _ => Self::Unknown(data),
        };
        Ok(event)
    }

    /// Returns `true` for the keep-alive event.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat(_))
    }
}

/// A decoded event as handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// The dot-namespaced type string from the frame.
    pub event_type: String,
    /// The validated payload.
    pub event: GameEvent,
    /// Local receive time, milliseconds since the Unix epoch.
    pub received_at_epoch_ms: u64,
}

impl StreamEvent {
    /// Decode a text frame into an event stamped with `received_at_epoch_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`VoidlineError::Serialization`] for malformed envelopes or
    /// mistyped payloads of catalogued events.
    pub fn from_text(text: &str, received_at_epoch_ms: u64) -> Result<Self> {
        let frame = StreamFrame::parse(text)?;
        let event_type = frame.event_type.clone();
        let event = frame.decode()?;
        Ok(Self {
            event_type,
            event,
            received_at_epoch_ms,
        })
    }
}
