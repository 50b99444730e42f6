//! Client configuration.
//!
//! Every timing value here is a tuning knob rather than part of the backend
//! contract. Each config struct has sensible defaults, `#[must_use]` builder
//! setters, and a serde representation with durations in milliseconds so a
//! host application can ship them in a TOML or JSON file:
//!
//! ```toml
//! api_base_url = "https://api.voidline.example"
//! stream_url = "wss://api.voidline.example/stream"
//!
//! [session]
//! renewal_margin_ms = 90000
//!
//! [stream]
//! max_reconnect_attempts = 8
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lead time before access-token expiry at which renewal starts.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Default minimum spacing between two forced logouts.
pub const DEFAULT_LOGOUT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Default capacity of the bounded session event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default wait before renewing after a 401.
pub const DEFAULT_RETRY_GRACE: Duration = Duration::from_millis(100);

/// Default wait before re-reading the token after a failed renewal.
pub const DEFAULT_FALLBACK_GRACE: Duration = Duration::from_millis(500);

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default number of consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default time allowed between transport open and the `connected` frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ── Endpoints ───────────────────────────────────────────────────────

/// REST paths used by the session and stream layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// `POST` with username and password.
    pub login: String,
    /// `POST` with username, email and password.
    pub signup: String,
    /// `POST` with the refresh token.
    pub refresh: String,
    /// `POST` with `all_sessions`.
    pub logout: String,
    /// `POST` with subscriber ID and channels.
    pub subscribe: String,
    /// Requests under this prefix bypass the 401-retry protocol.
    pub auth_prefix: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            signup: "/auth/signup".into(),
            refresh: "/auth/refresh".into(),
            logout: "/auth/logout".into(),
            subscribe: "/stream/subscribe".into(),
            auth_prefix: "/auth/".into(),
        }
    }
}

impl Endpoints {
    /// Returns `true` if `path` is an auth endpoint.
    pub fn is_auth_path(&self, path: &str) -> bool {
        path.starts_with(&self.auth_prefix)
            || [&self.login, &self.signup, &self.refresh, &self.logout]
                .iter()
                .any(|endpoint| endpoint.as_str() == path)
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Timing for the [`SessionManager`](crate::SessionManager).
///
/// ```
/// use std::time::Duration;
/// use voidline_client::config::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_renewal_margin(Duration::from_secs(90))
///     .with_logout_debounce(Duration::from_secs(5));
/// assert_eq!(config.renewal_margin, Duration::from_secs(90));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long before access-token expiry the proactive timer fires.
    ///
    /// Defaults to **60 seconds**.
    #[serde(rename = "renewal_margin_ms", with = "duration_ms")]
    pub renewal_margin: Duration,
    /// Forced logouts closer together than this are suppressed.
    ///
    /// Defaults to **2000 ms**.
    #[serde(rename = "logout_debounce_ms", with = "duration_ms")]
    pub logout_debounce: Duration,
    /// Capacity of the [`SessionEvent`](crate::SessionEvent) channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            logout_debounce: DEFAULT_LOGOUT_DEBOUNCE,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Set the proactive renewal lead time.
    #[must_use]
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Set the forced-logout debounce window.
    #[must_use]
    pub fn with_logout_debounce(mut self, window: Duration) -> Self {
        self.logout_debounce = window;
        self
    }

    /// Set the session event channel capacity. Values below 1 are clamped.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Grace periods of the 401-retry protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Wait after a 401 before renewing, so a renewal started elsewhere can
    /// land first. Defaults to **100 ms**.
    #[serde(rename = "retry_grace_ms", with = "duration_ms")]
    pub retry_grace: Duration,
    /// Wait after a failed renewal before re-reading the stored token.
    /// Defaults to **500 ms**.
    #[serde(rename = "fallback_grace_ms", with = "duration_ms")]
    pub fallback_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry_grace: DEFAULT_RETRY_GRACE,
            fallback_grace: DEFAULT_FALLBACK_GRACE,
        }
    }
}

impl GatewayConfig {
    /// Set the post-401 grace period.
    #[must_use]
    pub fn with_retry_grace(mut self, grace: Duration) -> Self {
        self.retry_grace = grace;
        self
    }

    /// Set the post-failed-renewal grace period.
    #[must_use]
    pub fn with_fallback_grace(mut self, grace: Duration) -> Self {
        self.fallback_grace = grace;
        self
    }
}

// ── Stream ──────────────────────────────────────────────────────────

/// Reconnect and handshake tuning for the [`StreamManager`](crate::StreamManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay before the first reconnect; doubles on each further attempt.
    ///
    /// Defaults to **1000 ms**.
    #[serde(rename = "reconnect_base_delay_ms", with = "duration_ms")]
    pub reconnect_base_delay: Duration,
    /// Consecutive failed attempts after which reconnecting stops.
    ///
    /// Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Time allowed between transport open and the `connected` frame.
    ///
    /// Defaults to **10 seconds**.
    #[serde(rename = "handshake_timeout_ms", with = "duration_ms")]
    pub handshake_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl StreamConfig {
    /// Set the base reconnect delay.
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the maximum number of consecutive reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Delay before reconnect attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use voidline_client::config::StreamConfig;
    ///
    /// let config = StreamConfig::default();
    /// assert_eq!(config.backoff_delay(1), Duration::from_millis(1000));
    /// assert_eq!(config.backoff_delay(5), Duration::from_millis(16000));
    /// ```
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.reconnect_base_delay.saturating_mul(1u32 << exponent)
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// Everything [`GameClient`](crate::GameClient) needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST backend.
    pub api_base_url: String,
    /// URL of the streaming endpoint.
    pub stream_url: String,
    pub endpoints: Endpoints,
    pub session: SessionConfig,
    pub gateway: GatewayConfig,
    pub stream: StreamConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".into(),
            stream_url: "ws://localhost:8080/stream".into(),
            endpoints: Endpoints::default(),
            session: SessionConfig::default(),
            gateway: GatewayConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a backend at `api_base_url` streaming from
    /// `stream_url`, with default tuning.
    pub fn new(api_base_url: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            stream_url: stream_url.into(),
            ..Self::default()
        }
    }

    /// Replace the endpoint paths.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Replace the session tuning.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Replace the gateway tuning.
    #[must_use]
    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replace the stream tuning.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }
}
