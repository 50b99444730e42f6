//! The realtime event stream.
//!
//! [`StreamManager`] owns one multiplexed server-to-client connection per
//! client. A connection goes through:
//!
//! 1. **Connecting**: a bearer token is fetched from the session and the
//!    [`Connector`] opens a transport.
//! 2. **Open**: the server's first frame, `connected { subscriber_id }`, has
//!    arrived within the handshake timeout.
//! 3. **Subscribed**: the channel list was posted to the subscribe endpoint
//!    (a 404 counts as success; the server may broadcast without explicit
//!    subscriptions).
//!
//! Every later frame is decoded into a [`StreamEvent`] and fanned out to the
//! listeners registered with [`add_event_listener`](StreamManager::add_event_listener).
//!
//! A transport error drops back to **Disconnected** and schedules a
//! reconnect after `base * 2^(attempt - 1)`, up to `max_reconnect_attempts`
//! in a row. Listeners survive reconnects. An explicit
//! [`disconnect`](StreamManager::disconnect) cancels reconnecting and clears
//! every listener.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::StreamConfig;
use crate::error::{Result, VoidlineError};
use crate::gateway::RequestGateway;
use crate::http::Method;
use crate::protocol::{parse_connected, ChannelSet, StreamEvent, SubscribeRequest};
use crate::registry::{ListenerHandle, ListenerRegistry};
use crate::session::StreamControl;
use crate::sync::lock;
use crate::timer::{Clock, SystemClock, TimerSlot};
use crate::transport::{Connector, Transport};

/// Lifecycle of the stream connection. Ordered, so `state >= Open` reads
/// as "has a subscriber ID".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Subscribed,
}

struct StreamSlot {
    state: ConnectionState,
    subscriber_id: Option<String>,
    reconnect_attempts: u32,
    /// Set by `connect`, cleared by `disconnect`. Reconnects only happen
    /// while it is set.
    player_id: Option<String>,
    /// Caller-supplied topics; `None` means the player topic only.
    channels: Option<ChannelSet>,
    /// Bumped for every new connection and by `disconnect`, so tasks and
    /// timers belonging to an older connection can tell they are stale.
    generation: u64,
    last_heartbeat_ms: Option<u64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl StreamSlot {
    fn effective_channels(&self) -> ChannelSet {
        match (&self.channels, &self.player_id) {
            (Some(channels), _) => channels.clone(),
            (None, Some(player_id)) => ChannelSet::for_player(player_id),
            (None, None) => ChannelSet::new(),
        }
    }
}

/// Why a connection task stopped.
enum Exit {
    Shutdown,
    Failed(VoidlineError),
}

struct StreamInner {
    self_ref: Weak<StreamInner>,
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    gateway: RequestGateway,
    clock: Arc<dyn Clock>,
    subscribe_path: String,
    slot: Mutex<StreamSlot>,
    registry: Arc<ListenerRegistry>,
    reconnect_timer: TimerSlot,
    state_tx: watch::Sender<ConnectionState>,
}

/// Handle to the event stream. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<StreamInner>,
}

impl StreamManager {
    /// Create a disconnected manager.
    ///
    /// `gateway` supplies both the bearer token (through its session) and
    /// the authenticated subscribe call to `subscribe_path`.
    pub fn new(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        gateway: RequestGateway,
        subscribe_path: impl Into<String>,
    ) -> Self {
        Self::with_clock(
            config,
            connector,
            gateway,
            subscribe_path,
            Arc::new(SystemClock),
        )
    }

    /// Create a manager stamping events with time from `clock`.
    pub fn with_clock(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        gateway: RequestGateway,
        subscribe_path: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let subscribe_path = subscribe_path.into();
        let inner = Arc::new_cyclic(|self_ref| StreamInner {
            self_ref: self_ref.clone(),
            config,
            connector,
            gateway,
            clock,
            subscribe_path,
            slot: Mutex::new(StreamSlot {
                state: ConnectionState::Disconnected,
                subscriber_id: None,
                reconnect_attempts: 0,
                player_id: None,
                channels: None,
                generation: 0,
                last_heartbeat_ms: None,
                shutdown_tx: None,
            }),
            registry: Arc::new(ListenerRegistry::new()),
            reconnect_timer: TimerSlot::new("stream_reconnect"),
            state_tx,
        });
        Self { inner }
    }

    /// Open the stream for `player_id`.
    ///
    /// Does nothing if a connection is already connecting or open. Resets
    /// the reconnect counter, so this also restarts a stream that gave up
    /// after too many failures.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; the connection is driven
    /// by a spawned task.
    pub fn connect(&self, player_id: &str) {
        self.inner.start_connection(player_id.to_string(), true);
    }

    /// Close the stream, stop reconnecting, and drop every listener.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Replace the channel list and post it to the subscribe endpoint.
    ///
    /// A 404 counts as success. The list is remembered and re-sent after
    /// every reconnect.
    ///
    /// # Errors
    ///
    /// - [`VoidlineError::NotConnected`] before the stream is open. The list
    ///   is still stored and sent once the handshake completes.
    /// - Any other subscribe failure. The connection stays open.
    pub async fn subscribe_to_channels(&self, channels: ChannelSet) -> Result<()> {
        let (generation, subscriber_id) = {
            let mut slot = lock(&self.inner.slot);
            slot.channels = Some(channels.clone());
            match (&slot.subscriber_id, slot.state >= ConnectionState::Open) {
                (Some(id), true) => (slot.generation, id.clone()),
                _ => return Err(VoidlineError::NotConnected),
            }
        };
        self.inner
            .subscribe(generation, subscriber_id, channels)
            .await
    }

    /// Store the channel list for the next handshake without sending it.
    pub fn set_channels(&self, channels: ChannelSet) {
        lock(&self.inner.slot).channels = Some(channels);
    }

    /// The channel list the next subscribe call will send.
    pub fn channels(&self) -> ChannelSet {
        lock(&self.inner.slot).effective_channels()
    }

    /// Register `callback` for an exact event type or a `seg1.seg2.*`
    /// wildcard.
    ///
    /// ```no_run
    /// # fn demo(stream: &voidline_client::StreamManager) {
    /// use voidline_client::protocol::GameEvent;
    ///
    /// let handle = stream.add_event_listener("game.combat.*", |event| {
    ///     if let GameEvent::CombatRound(round) = &event.event {
    ///         println!("round {} of {}", round.round, round.combat_id);
    ///     }
    /// });
    /// // later
    /// handle.unregister();
    /// # }
    /// ```
    pub fn add_event_listener<F>(&self, key: impl Into<String>, callback: F) -> ListenerHandle
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.registry.register(key.clone(), Arc::new(callback));
        ListenerHandle::new(key, id, &self.inner.registry)
    }

    /// Deliver `event` to its listeners as if it came from the server.
    /// Returns how many listeners ran without panicking.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        self.inner.registry.dispatch(event)
    }

    /// A weak command handle for the session manager.
    pub fn control(&self) -> Weak<dyn StreamControl> {
        let weak: Weak<StreamInner> = Arc::downgrade(&self.inner);
        weak
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.slot).state
    }

    /// Watch connection state changes, e.g. for a connectivity indicator.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The server-issued subscriber ID; only set while open.
    pub fn subscriber_id(&self) -> Option<String> {
        lock(&self.inner.slot).subscriber_id.clone()
    }

    /// The player the stream is connected (or reconnecting) for.
    pub fn player_id(&self) -> Option<String> {
        lock(&self.inner.slot).player_id.clone()
    }

    /// Reconnects scheduled since the last successful handshake or explicit
    /// [`connect`](Self::connect). Never exceeds
    /// [`StreamConfig::max_reconnect_attempts`](crate::StreamConfig).
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.inner.slot).reconnect_attempts
    }

    /// Returns `true` while a reconnect is waiting to fire.
    pub fn is_reconnect_scheduled(&self) -> bool {
        self.inner.reconnect_timer.is_armed()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Local time the last `heartbeat` arrived.
    pub fn last_heartbeat(&self) -> Option<u64> {
        lock(&self.inner.slot).last_heartbeat_ms
    }
}

impl fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = lock(&self.inner.slot);
        f.debug_struct("StreamManager")
            .field("state", &slot.state)
            .field("subscriber_id", &slot.subscriber_id)
            .field("reconnect_attempts", &slot.reconnect_attempts)
            .field("listeners", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl StreamControl for StreamInner {
    fn connect(&self, player_id: &str) {
        if let Some(inner) = self.self_ref.upgrade() {
            inner.start_connection(player_id.to_string(), true);
        }
    }

    fn disconnect(&self) {
        StreamInner::disconnect(self);
    }
}

// ── Connection lifecycle ────────────────────────────────────────────

impl StreamInner {
    fn set_state(&self, slot: &mut StreamSlot, state: ConnectionState) {
        if slot.state != state {
            debug!(from = ?slot.state, to = ?state, "stream state changed");
            slot.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn start_connection(self: &Arc<Self>, player_id: String, explicit: bool) {
        let (generation, shutdown_rx) = {
            let mut slot = lock(&self.slot);
            if slot.state >= ConnectionState::Connecting {
                debug!(state = ?slot.state, "stream already connecting; ignoring connect");
                return;
            }
            slot.player_id = Some(player_id);
            if explicit {
                slot.reconnect_attempts = 0;
            }
            slot.generation += 1;
            let (tx, rx) = oneshot::channel();
            slot.shutdown_tx = Some(tx);
            self.set_state(&mut slot, ConnectionState::Connecting);
            (slot.generation, rx)
        };
        if explicit {
            self.reconnect_timer.cancel();
        }
        tokio::spawn(Arc::clone(self).run_connection(generation, shutdown_rx));
    }

    fn disconnect(&self) {
        let shutdown = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.player_id = None;
            slot.subscriber_id = None;
            slot.channels = None;
            slot.reconnect_attempts = 0;
            slot.last_heartbeat_ms = None;
            self.set_state(&mut slot, ConnectionState::Disconnected);
            slot.shutdown_tx.take()
        };
        self.reconnect_timer.cancel();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        let dropped = self.registry.len();
        self.registry.clear();
        info!(listeners_dropped = dropped, "stream disconnected");
    }

    async fn run_connection(
        self: Arc<Self>,
        generation: u64,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut transport = match self.open_transport(&mut shutdown).await {
            Ok(transport) => transport,
            Err(Exit::Shutdown) => return,
            Err(Exit::Failed(error)) => {
                self.handle_failure(generation, error);
                return;
            }
        };

        let exit = self
            .drive(generation, &mut transport, &mut shutdown)
            .await;
        if let Err(error) = transport.close().await {
            debug!(%error, "error closing stream transport");
        }
        match exit {
            Exit::Shutdown => debug!(generation, "stream connection task stopped"),
            Exit::Failed(error) => self.handle_failure(generation, error),
        }
    }

    async fn open_transport(
        &self,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> std::result::Result<Box<dyn Transport>, Exit> {
        let open = async {
            let token = self
                .gateway
                .session()
                .get_valid_token()
                .await
                .ok_or(VoidlineError::SessionExpired)?;
            self.connector.open(&token).await
        };
        tokio::select! {
            biased;
            _ = &mut *shutdown => Err(Exit::Shutdown),
            result = open => result.map_err(Exit::Failed),
        }
    }

    /// Handshake, subscribe, then pump frames until failure or shutdown.
    async fn drive(
        &self,
        generation: u64,
        transport: &mut Box<dyn Transport>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Exit {
        let handshake = tokio::time::timeout(self.config.handshake_timeout, transport.recv());
        let first = tokio::select! {
            biased;
            _ = &mut *shutdown => return Exit::Shutdown,
            first = handshake => first,
        };
        let text = match first {
            Err(_) => {
                return Exit::Failed(VoidlineError::StreamProtocol(format!(
                    "no connected event within {:?}",
                    self.config.handshake_timeout
                )))
            }
            Ok(None) => return Exit::Failed(VoidlineError::TransportClosed),
            Ok(Some(Err(error))) => return Exit::Failed(error),
            Ok(Some(Ok(text))) => text,
        };
        let subscriber_id = match parse_connected(&text) {
            Ok(payload) => payload.subscriber_id,
            Err(error) => return Exit::Failed(error),
        };

        let channels = {
            let mut slot = lock(&self.slot);
            if slot.generation != generation {
                return Exit::Shutdown;
            }
            slot.subscriber_id = Some(subscriber_id.clone());
            slot.reconnect_attempts = 0;
            self.set_state(&mut slot, ConnectionState::Open);
            slot.effective_channels()
        };
        info!(%subscriber_id, "stream open");
        self.handle_frame(&text);

        tokio::select! {
            biased;
            _ = &mut *shutdown => return Exit::Shutdown,
            // Failures are logged inside and never end the connection.
            _ = self.subscribe(generation, subscriber_id, channels) => {}
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown => return Exit::Shutdown,
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(error)) => return Exit::Failed(error),
                    None => return Exit::Failed(VoidlineError::TransportClosed),
                },
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let now = self.clock.now_epoch_ms();
        let event = match StreamEvent::from_text(text, now) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "dropping undecodable stream frame");
                return;
            }
        };
        if event.event.is_heartbeat() {
            lock(&self.slot).last_heartbeat_ms = Some(now);
        }
        let delivered = self.registry.dispatch(&event);
        trace!(event_type = %event.event_type, delivered, "stream event dispatched");
    }

    async fn subscribe(
        &self,
        generation: u64,
        subscriber_id: String,
        channels: ChannelSet,
    ) -> Result<()> {
        let body = serde_json::to_value(SubscribeRequest {
            subscriber_id,
            channels,
        })?;
        let result = self
            .gateway
            .request(Method::Post, &self.subscribe_path, Some(body))
            .await;

        let outcome = match result {
            Ok(_) => Ok(()),
            Err(error) if error.status() == Some(404) => {
                let soft = VoidlineError::SubscriptionSoftFail { status: 404 };
                warn!(error = %soft, "subscribe endpoint missing; assuming broadcast mode");
                Ok(())
            }
            Err(error) => {
                warn!(%error, "channel subscription failed; stream stays open");
                Err(error)
            }
        };

        if outcome.is_ok() {
            let mut slot = lock(&self.slot);
            if slot.generation == generation && slot.state == ConnectionState::Open {
                self.set_state(&mut slot, ConnectionState::Subscribed);
            }
        }
        outcome
    }

    fn handle_failure(self: &Arc<Self>, generation: u64, error: VoidlineError) {
        let retry = {
            let mut slot = lock(&self.slot);
            if slot.generation != generation {
                return;
            }
            slot.subscriber_id = None;
            slot.shutdown_tx = None;
            self.set_state(&mut slot, ConnectionState::Disconnected);
            if slot.player_id.is_none() {
                None
            } else if slot.reconnect_attempts >= self.config.max_reconnect_attempts {
                Some(Err(slot.reconnect_attempts))
            } else {
                slot.reconnect_attempts += 1;
                Some(Ok(slot.reconnect_attempts))
            }
        };

        warn!(%error, "stream connection lost");
        match retry {
            Some(Ok(attempt)) => {
                let delay = self.config.backoff_delay(attempt);
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "stream reconnect scheduled"
                );
                let weak = Weak::clone(&self.self_ref);
                self.reconnect_timer.arm(delay, async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.reconnect(generation);
                    }
                });
            }
            Some(Err(attempt)) => {
                warn!(
                    attempts = attempt,
                    "stream reconnect attempts exhausted; waiting for explicit connect"
                );
            }
            None => {}
        }
    }

    fn reconnect(self: &Arc<Self>, failed_generation: u64) {
        let player_id = {
            let slot = lock(&self.slot);
            if slot.generation != failed_generation || slot.state != ConnectionState::Disconnected
            {
                debug!("stale reconnect timer ignored");
                return;
            }
            slot.player_id.clone()
        };
        match player_id {
            Some(player_id) => self.start_connection(player_id, false),
            None => debug!("stream was disconnected; reconnect cancelled"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_by_progress() {
        assert!(ConnectionState::Disconnected < ConnectionState::Connecting);
        assert!(ConnectionState::Connecting < ConnectionState::Open);
        assert!(ConnectionState::Open < ConnectionState::Subscribed);
    }

    #[test]
    fn effective_channels_default_to_player_topic() {
        let mut slot = StreamSlot {
            state: ConnectionState::Disconnected,
            subscriber_id: None,
            reconnect_attempts: 0,
            player_id: Some("p9".into()),
            channels: None,
            generation: 0,
            last_heartbeat_ms: None,
            shutdown_tx: None,
        };
        assert_eq!(slot.effective_channels().as_slice(), ["player:p9"]);

        slot.channels = Some(ChannelSet::new().with_chat("global"));
        assert_eq!(slot.effective_channels().as_slice(), ["chat:global"]);
    }
}
