//! Session lifecycle: login, token renewal, and logout.
//!
//! [`SessionManager`] owns the token pair. It is the only writer of the
//! [`CredentialStore`], keeps a proactive renewal timer armed shortly before
//! the access token expires, and coalesces concurrent renewals into a single
//! refresh call whose result every caller shares.
//!
//! # State machine
//!
//! ```text
//! LoggedOut ──▶ Authenticating ──▶ Authenticated ◀──▶ Refreshing
//!    ▲  ▲             │                  │                 │
//!    │  └─(failure)───┘                  ▼                 │
//!    └──────────────────────────── LoggingOut ◀────────────┘
//! ```
//!
//! The in-flight refresh lives *inside* the `Refreshing` state, so there is no
//! separate "is refreshing" flag to fall out of sync with it.
//!
//! # Forced logout
//!
//! [`SessionManager::force_logout`] runs its side effects (clear credentials,
//! tear down the stream, emit [`SessionEvent::LoggedOut`]) at most once per
//! debounce window, never while another logout is running, and never while a
//! renewal is still in flight.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::{AuthApi, Credentials, Registration, TokenPair};
use crate::config::SessionConfig;
use crate::credentials::{CredentialKey, CredentialStore};
use crate::error::{Result, VoidlineError};
use crate::sync::lock;
use crate::timer::{Clock, SystemClock, TimerSlot};
use crate::token;

// ── Public types ────────────────────────────────────────────────────

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No credentials.
    LoggedOut,
    /// A login, signup or restore is in progress.
    Authenticating,
    /// Holding a token pair.
    Authenticated,
    /// Holding a token pair while a refresh call is in flight.
    Refreshing,
    /// Tearing the session down.
    LoggingOut,
}

impl SessionState {
    /// Returns `true` if the state machine allows `self -> next`.
    ///
    /// ```
    /// use voidline_client::SessionState::*;
    ///
    /// assert!(Authenticated.can_transition_to(Refreshing));
    /// assert!(Refreshing.can_transition_to(LoggingOut));
    /// assert!(!LoggedOut.can_transition_to(Refreshing));
    /// ```
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (LoggedOut, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticating, LoggedOut)
                | (Authenticated, Refreshing)
                | (Authenticated, LoggingOut)
                | (Refreshing, Authenticated)
                | (Refreshing, LoggingOut)
                | (LoggingOut, LoggedOut)
        )
    }

    /// Returns `true` while a token pair is held.
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Refreshing)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogoutReason {
    /// The refresh call failed.
    RefreshFailed,
    /// A request was rejected again after renewal.
    Retry401,
    /// A request without a token was rejected.
    Unauthorized,
    /// [`SessionManager::logout`] was called.
    UserInitiated,
}

impl LogoutReason {
    /// Stable identifier for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshFailed => "refresh_failed",
            Self::Retry401 => "retry_401",
            Self::Unauthorized => "unauthorized",
            Self::UserInitiated => "user_initiated",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of the authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub player_id: String,
    /// Access-token expiry decoded from its `exp` claim.
    pub access_expiry_epoch_ms: Option<u64>,
    /// State at the time the snapshot was taken.
    pub state: SessionState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("player_id", &self.player_id)
            .field("access_expiry_epoch_ms", &self.access_expiry_epoch_ms)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was established.
    LoggedIn {
        player_id: String,
        /// `true` when rebuilt from stored credentials.
        restored: bool,
    },
    /// The token pair was rotated.
    TokensRenewed { player_id: String },
    /// The session ended. Forced logouts should send the user back to the
    /// login screen.
    LoggedOut { reason: LogoutReason, forced: bool },
}

/// Commands the session issues to the realtime stream.
///
/// Implemented by [`StreamManager`](crate::StreamManager); the session holds
/// it weakly.
pub trait StreamControl: Send + Sync {
    /// Open the stream for `player_id`.
    fn connect(&self, player_id: &str);
    /// Close the stream and drop every listener.
    fn disconnect(&self);
}

// ── Internal state ──────────────────────────────────────────────────

type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

/// The single in-flight refresh.
struct RefreshOperation {
    id: u64,
    started_at_ms: u64,
    shared: RefreshFuture,
}

enum Phase {
    LoggedOut,
    Authenticating,
    Authenticated,
    Refreshing(RefreshOperation),
    LoggingOut,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::LoggedOut => SessionState::LoggedOut,
            Self::Authenticating => SessionState::Authenticating,
            Self::Authenticated => SessionState::Authenticated,
            Self::Refreshing(_) => SessionState::Refreshing,
            Self::LoggingOut => SessionState::LoggingOut,
        }
    }
}

struct SessionSlot {
    phase: Phase,
    session: Option<Session>,
    /// When the last logout finished.
    last_logout_ms: Option<u64>,
    /// Set by a forced logout, cleared by the next login.
    expired: bool,
    next_refresh_id: u64,
}

impl SessionSlot {
    fn transition(&mut self, next: Phase) -> bool {
        let from = self.phase.state();
        let to = next.state();
        if !from.can_transition_to(to) {
            warn!(?from, ?to, "refusing illegal session transition");
            return false;
        }
        debug!(?from, ?to, "session transition");
        self.phase = next;
        true
    }

    fn snapshot(&self) -> Option<Session> {
        let mut session = self.session.clone()?;
        session.state = self.phase.state();
        Some(session)
    }
}

struct SessionInner {
    api: AuthApi,
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    slot: Mutex<SessionSlot>,
    renewal_timer: TimerSlot,
    stream: Mutex<Option<Weak<dyn StreamControl>>>,
    events: mpsc::Sender<SessionEvent>,
}

// ── SessionManager ──────────────────────────────────────────────────

/// Owns the authenticated session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a manager using the system clock.
    ///
    /// Returns the manager and the receiving end of its event channel.
    pub fn new(
        api: AuthApi,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::with_clock(api, store, config, Arc::new(SystemClock))
    }

    /// Create a manager reading wall-clock time from `clock`.
    pub fn with_clock(
        api: AuthApi,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let inner = SessionInner {
            api,
            store,
            config,
            clock,
            slot: Mutex::new(SessionSlot {
                phase: Phase::LoggedOut,
                session: None,
                last_logout_ms: None,
                expired: false,
                next_refresh_id: 1,
            }),
            renewal_timer: TimerSlot::new("proactive_renewal"),
            stream: Mutex::new(None),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Route stream commands to `stream`. Held weakly.
    pub fn attach_stream(&self, stream: Weak<dyn StreamControl>) {
        *lock(&self.inner.stream) = Some(stream);
    }

    /// Log in with username and password.
    ///
    /// On success the token pair is persisted, proactive renewal is armed and
    /// the stream is told to connect.
    ///
    /// # Errors
    ///
    /// - [`VoidlineError::InvalidState`] unless currently logged out.
    /// - [`VoidlineError::AuthInvalidCredentials`] if the server rejects the
    ///   credentials. No session state changes.
    /// - Transport errors from the auth call.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let attempt = AuthAttempt::begin(&self.inner)?;
        info!(username = %credentials.username, "logging in");
        let pair = self.inner.api.login(credentials).await?;
        attempt.complete(pair, false)
    }

    /// Create an account and log into it.
    ///
    /// # Errors
    ///
    /// As [`login`](Self::login); a taken username surfaces as
    /// [`VoidlineError::Http`] with status 409.
    pub async fn signup(&self, registration: &Registration) -> Result<Session> {
        let attempt = AuthAttempt::begin(&self.inner)?;
        info!(username = %registration.username, "signing up");
        let pair = self.inner.api.signup(registration).await?;
        attempt.complete(pair, false)
    }

    /// Rebuild the session from stored credentials, typically at startup.
    ///
    /// Returns `None` (and stays logged out) unless all three credentials are
    /// present. Returns the current session unchanged if already logged in.
    /// A stored token that is already inside the renewal margin is renewed
    /// right away.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while a session is found,
    /// since restoring arms the renewal timer and starts the stream.
    pub fn restore(&self) -> Option<Session> {
        let inner = &self.inner;
        {
            let slot = lock(&inner.slot);
            if !matches!(slot.phase, Phase::LoggedOut) {
                return slot.snapshot();
            }
        }
        let access_token = inner.store.get(CredentialKey::AccessToken);
        let refresh_token = inner.store.get(CredentialKey::RefreshToken);
        let player_id = inner.store.get(CredentialKey::PlayerId);
        let (Some(access_token), Some(refresh_token), Some(player_id)) =
            (access_token, refresh_token, player_id)
        else {
            debug!("no stored session to restore");
            return None;
        };

        let attempt = AuthAttempt::begin(inner).ok()?;
        let pair = TokenPair {
            access_token,
            refresh_token,
            player_id: Some(player_id),
        };
        match attempt.complete(pair, true) {
            Ok(session) => Some(session),
            Err(error) => {
                warn!(%error, "could not restore stored session");
                None
            }
        }
    }

    /// Arm the proactive renewal timer for the current access token.
    ///
    /// Fires `renewal_margin` before expiry; renews immediately if that point
    /// has already passed. Replaces any previously armed timer. Tokens
    /// without an `exp` claim are never renewed proactively.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn schedule_proactive_renewal(&self) {
        self.inner.schedule_renewal(false);
    }

    /// Rotate the token pair, sharing an in-flight rotation if one exists.
    ///
    /// Returns the new access token, or `None` if renewal failed (which
    /// forces a logout) or there is no session to renew.
    pub async fn renew(&self) -> Option<String> {
        self.inner.renew().await
    }

    /// The current access token, renewed first if it is within the renewal
    /// margin of expiry.
    pub async fn get_valid_token(&self) -> Option<String> {
        let current = {
            let slot = lock(&self.inner.slot);
            match &slot.phase {
                Phase::Authenticated => {
                    let session = slot.session.as_ref()?;
                    Ok((session.access_token.clone(), session.access_expiry_epoch_ms))
                }
                Phase::Refreshing(op) => Err(op.shared.clone()),
                _ => return None,
            }
        };
        let (token, expiry) = match current {
            Ok(current) => current,
            Err(in_flight) => return in_flight.await,
        };
        match expiry {
            Some(expiry) if self.inner.renewal_delay_ms(expiry) <= 0 => self.inner.renew().await,
            _ => Some(token),
        }
    }

    /// End the session because of a failure.
    ///
    /// Silently does nothing (returning `false`) if a logout is running, one
    /// finished within the debounce window, a renewal is in flight, or there
    /// is no session.
    pub async fn force_logout(&self, reason: LogoutReason) -> bool {
        self.inner.force_logout(reason)
    }

    /// End the session at the user's request.
    ///
    /// Not debounced. The server-side revoke is best-effort: its failure is
    /// logged and local state is cleared regardless. Logging out while logged
    /// out just clears the store.
    ///
    /// # Errors
    ///
    /// [`VoidlineError::InvalidState`] while a login is in progress.
    pub async fn logout(&self, all_sessions: bool) -> Result<()> {
        let inner = &self.inner;
        let access_token = {
            let mut slot = lock(&inner.slot);
            match slot.phase.state() {
                SessionState::LoggingOut => {
                    debug!("logout already in progress");
                    return Ok(());
                }
                SessionState::LoggedOut => {
                    drop(slot);
                    inner.renewal_timer.cancel();
                    inner.store.clear();
                    return Ok(());
                }
                SessionState::Authenticating => {
                    return Err(VoidlineError::InvalidState(
                        "cannot log out while a login is in progress".into(),
                    ));
                }
                SessionState::Authenticated | SessionState::Refreshing => {
                    let token = slot.session.as_ref().map(|s| s.access_token.clone());
                    slot.transition(Phase::LoggingOut);
                    token
                }
            }
        };

        inner.renewal_timer.cancel();
        if let Some(access_token) = access_token {
            if let Err(error) = inner.api.logout(&access_token, all_sessions).await {
                warn!(%error, "server-side logout failed; clearing local session anyway");
            }
        }
        inner.finish_logout(LogoutReason::UserInitiated, false);
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        lock(&self.inner.slot).phase.state()
    }

    /// Snapshot of the current session, if any.
    pub fn current_session(&self) -> Option<Session> {
        lock(&self.inner.slot).snapshot()
    }

    /// The stored access token, without renewing.
    pub fn access_token(&self) -> Option<String> {
        lock(&self.inner.slot)
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// The logged-in player.
    pub fn player_id(&self) -> Option<String> {
        lock(&self.inner.slot)
            .session
            .as_ref()
            .map(|s| s.player_id.clone())
    }

    /// Returns `true` after a forced logout until the next login.
    pub fn is_session_expired(&self) -> bool {
        lock(&self.inner.slot).expired
    }

    /// Returns `true` while the proactive renewal timer is armed.
    pub fn is_renewal_scheduled(&self) -> bool {
        self.inner.renewal_timer.is_armed()
    }

    /// When the in-flight refresh started, if one is running.
    pub fn refresh_started_at(&self) -> Option<u64> {
        match &lock(&self.inner.slot).phase {
            Phase::Refreshing(op) => Some(op.started_at_ms),
            _ => None,
        }
    }

    /// Disarm the proactive renewal timer without touching the session.
    pub fn cancel_timers(&self) {
        self.inner.renewal_timer.cancel();
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = lock(&self.inner.slot);
        f.debug_struct("SessionManager")
            .field("state", &slot.phase.state())
            .field(
                "player_id",
                &slot.session.as_ref().map(|s| s.player_id.as_str()),
            )
            .field("expired", &slot.expired)
            .finish_non_exhaustive()
    }
}

// ── Authentication attempts ─────────────────────────────────────────

/// Holds the `Authenticating` state for one login, signup or restore.
///
/// Dropping it without completing (an error, or the caller's future being
/// cancelled) returns the session to `LoggedOut`.
struct AuthAttempt<'a> {
    inner: &'a Arc<SessionInner>,
    completed: bool,
}

impl<'a> AuthAttempt<'a> {
    fn begin(inner: &'a Arc<SessionInner>) -> Result<Self> {
        let mut slot = lock(&inner.slot);
        if !matches!(slot.phase, Phase::LoggedOut) {
            return Err(VoidlineError::InvalidState(format!(
                "cannot authenticate while {:?}",
                slot.phase.state()
            )));
        }
        slot.transition(Phase::Authenticating);
        Ok(Self {
            inner,
            completed: false,
        })
    }

    fn complete(mut self, pair: TokenPair, restored: bool) -> Result<Session> {
        let inner = self.inner;
        let claims = token::decode_claims(&pair.access_token);
        let player_id = pair
            .player_id
            .or_else(|| claims.as_ref().and_then(|c| c.sub.clone()))
            .ok_or_else(|| {
                VoidlineError::InvalidState("auth response did not identify the player".into())
            })?;
        let session = Session {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            player_id: player_id.clone(),
            access_expiry_epoch_ms: claims.and_then(|c| c.expiry_epoch_ms()),
            state: SessionState::Authenticated,
        };

        {
            let mut slot = lock(&inner.slot);
            inner.persist(&session);
            slot.session = Some(session.clone());
            slot.expired = false;
            slot.transition(Phase::Authenticated);
        }
        self.completed = true;

        info!(%player_id, restored, "session established");
        inner.schedule_renewal(false);
        inner.with_stream(|stream| stream.connect(&player_id));
        inner.emit(SessionEvent::LoggedIn {
            player_id,
            restored,
        });
        Ok(session)
    }
}

impl Drop for AuthAttempt<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut slot = lock(&self.inner.slot);
        if matches!(slot.phase, Phase::Authenticating) {
            slot.transition(Phase::LoggedOut);
        }
    }
}

// ── Internals ───────────────────────────────────────────────────────

impl SessionInner {
    /// Write all three credentials. Called with the slot lock held so the
    /// pair is never observed half-rotated.
    fn persist(&self, session: &Session) {
        self.store
            .set(CredentialKey::AccessToken, &session.access_token);
        self.store
            .set(CredentialKey::RefreshToken, &session.refresh_token);
        self.store.set(CredentialKey::PlayerId, &session.player_id);
    }

    fn with_stream(&self, f: impl FnOnce(&dyn StreamControl)) {
        let stream = lock(&self.stream).as_ref().and_then(Weak::upgrade);
        if let Some(stream) = stream {
            f(stream.as_ref());
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            warn!(?event, "session event channel full, dropping event");
        }
    }

    /// Milliseconds until the proactive renewal point of a token expiring at
    /// `expiry_ms`. Zero or negative means renewal is due.
    fn renewal_delay_ms(&self, expiry_ms: u64) -> i128 {
        let margin = i128::try_from(self.config.renewal_margin.as_millis()).unwrap_or(i128::MAX);
        i128::from(expiry_ms) - i128::from(self.clock.now_epoch_ms()) - margin
    }

    fn schedule_renewal(self: &Arc<Self>, after_renewal: bool) {
        let expiry = lock(&self.slot)
            .session
            .as_ref()
            .and_then(|s| s.access_expiry_epoch_ms);
        let Some(expiry) = expiry else {
            self.renewal_timer.cancel();
            debug!("access token carries no expiry; proactive renewal disabled");
            return;
        };

        let delay_ms = self.renewal_delay_ms(expiry);
        let weak = Arc::downgrade(self);
        match u64::try_from(delay_ms) {
            Ok(delay_ms) if delay_ms > 0 => {
                self.renewal_timer
                    .arm(Duration::from_millis(delay_ms), async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.renew().await;
                        }
                    });
            }
            _ => {
                self.renewal_timer.cancel();
                if after_renewal {
                    // A freshly issued token inside the margin would renew in
                    // a loop.
                    warn!(
                        delay_ms = delay_ms as i64,
                        "renewed token already inside renewal margin; not renewing again"
                    );
                    return;
                }
                debug!("access token inside renewal margin; renewing now");
                tokio::spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.renew().await;
                    }
                });
            }
        }
    }

    async fn renew(self: &Arc<Self>) -> Option<String> {
        let shared = {
            let mut guard = lock(&self.slot);
            let slot = &mut *guard;
            match &slot.phase {
                Phase::Refreshing(op) => {
                    debug!(refresh_id = op.id, "joining in-flight renewal");
                    op.shared.clone()
                }
                Phase::Authenticated => {
                    let refresh_token = slot.session.as_ref()?.refresh_token.clone();
                    let id = slot.next_refresh_id;
                    slot.next_refresh_id += 1;

                    // The network call runs in its own task so it completes
                    // even if every waiter is dropped.
                    let task = tokio::spawn(Arc::clone(self).run_refresh(id, refresh_token));
                    let shared = async move { task.await.ok().flatten() }.boxed().shared();
                    slot.transition(Phase::Refreshing(RefreshOperation {
                        id,
                        started_at_ms: self.clock.now_epoch_ms(),
                        shared: shared.clone(),
                    }));
                    debug!(refresh_id = id, "renewal started");
                    shared
                }
                _ => {
                    debug!(state = ?slot.phase.state(), "no session to renew");
                    return None;
                }
            }
        };
        shared.await
    }

    async fn run_refresh(self: Arc<Self>, id: u64, refresh_token: String) -> Option<String> {
        match self.api.refresh(&refresh_token).await {
            Ok(pair) => self.complete_refresh(id, pair),
            Err(error) => {
                warn!(%error, refresh_id = id, "token renewal failed");
                self.fail_refresh(id);
                None
            }
        }
    }

    fn complete_refresh(self: &Arc<Self>, id: u64, pair: TokenPair) -> Option<String> {
        let player_id = {
            let mut slot = lock(&self.slot);
            if !matches!(&slot.phase, Phase::Refreshing(op) if op.id == id) {
                debug!(refresh_id = id, "discarding renewal that finished after logout");
                return None;
            }
            let player_id = slot.session.as_ref()?.player_id.clone();
            let session = Session {
                access_expiry_epoch_ms: token::expiry_epoch_ms(&pair.access_token),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
                player_id: player_id.clone(),
                state: SessionState::Authenticated,
            };
            self.persist(&session);
            slot.session = Some(session);
            slot.transition(Phase::Authenticated);
            player_id
        };

        debug!(refresh_id = id, "token pair rotated");
        self.schedule_renewal(true);
        self.emit(SessionEvent::TokensRenewed { player_id });
        lock(&self.slot)
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    fn fail_refresh(self: &Arc<Self>, id: u64) {
        let proceed = {
            let mut slot = lock(&self.slot);
            if !matches!(&slot.phase, Phase::Refreshing(op) if op.id == id) {
                return;
            }
            slot.transition(Phase::Authenticated);
            self.enter_forced_logout(&mut slot, LogoutReason::RefreshFailed)
        };
        if proceed {
            self.renewal_timer.cancel();
            self.finish_logout(LogoutReason::RefreshFailed, true);
        }
    }

    fn force_logout(self: &Arc<Self>, reason: LogoutReason) -> bool {
        let proceed = {
            let mut slot = lock(&self.slot);
            self.enter_forced_logout(&mut slot, reason)
        };
        if proceed {
            self.renewal_timer.cancel();
            self.finish_logout(reason, true);
        }
        proceed
    }

    /// Apply the logout guard and, if it allows, move to `LoggingOut`.
    fn enter_forced_logout(&self, slot: &mut SessionSlot, reason: LogoutReason) -> bool {
        let skip = match slot.phase {
            Phase::LoggingOut => Some("logout already in progress"),
            Phase::Refreshing(_) => Some("renewal in flight"),
            Phase::LoggedOut | Phase::Authenticating => Some("no active session"),
            Phase::Authenticated => {
                let now = self.clock.now_epoch_ms();
                let window = u64::try_from(self.config.logout_debounce.as_millis())
                    .unwrap_or(u64::MAX);
                slot.last_logout_ms
                    .filter(|last| now.saturating_sub(*last) < window)
                    .map(|_| "debounced")
            }
        };
        if let Some(why) = skip {
            debug!(%reason, why, "forced logout suppressed");
            return false;
        }
        slot.transition(Phase::LoggingOut)
    }

    /// Side effects shared by every logout path, run after entering
    /// `LoggingOut`.
    fn finish_logout(&self, reason: LogoutReason, forced: bool) {
        self.store.clear();
        self.with_stream(|stream| stream.disconnect());
        {
            let mut slot = lock(&self.slot);
            slot.session = None;
            slot.expired = forced;
            slot.last_logout_ms = Some(self.clock.now_epoch_ms());
            slot.transition(Phase::LoggedOut);
        }
        info!(%reason, forced, "session ended");

        // Always delivered. A full channel must not hold up the caller, which
        // may be a renewal that every waiting request depends on.
        let event = SessionEvent::LoggedOut { reason, forced };
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("session event channel full; delivering logout in background");
                let events = self.events.clone();
                tokio::spawn(async move {
                    let _ = events.send(event).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    use crate::config::Endpoints;
    use crate::credentials::MemoryCredentialStore;
    use crate::http::{HttpClient, HttpRequest, HttpResponse};
    use crate::timer::ManualClock;

    fn jwt(exp_secs: u64, sub: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp_secs},"sub":"{sub}"}}"#));
        format!("{header}.{body}.sig")
    }

    /// Login always succeeds; refresh succeeds unless `fail_refresh`.
    struct Backend {
        clock: ManualClock,
        refreshes: AtomicUsize,
        fail_refresh: bool,
    }

    #[async_trait]
    impl HttpClient for Backend {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            let exp = self.clock.now_epoch_ms() / 1000 + 3600;
            match request.path.as_str() {
                "/auth/login" => Ok(HttpResponse::json(
                    200,
                    &serde_json::json!({
                        "access_token": jwt(exp, "p1"),
                        "refresh_token": "r0",
                    }),
                )),
                "/auth/refresh" if self.fail_refresh => Ok(HttpResponse::new(401, "")),
                "/auth/refresh" => {
                    let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(HttpResponse::json(
                        200,
                        &serde_json::json!({
                            "access_token": format!("{}-{n}", jwt(exp, "p1")),
                            "refresh_token": format!("r{n}"),
                        }),
                    ))
                }
                _ => Ok(HttpResponse::new(204, "")),
            }
        }
    }

    fn manager(fail_refresh: bool) -> (SessionManager, mpsc::Receiver<SessionEvent>, Arc<Backend>) {
        let clock = ManualClock::new(1_700_000_000_000);
        let backend = Arc::new(Backend {
            clock: clock.clone(),
            refreshes: AtomicUsize::new(0),
            fail_refresh,
        });
        let http: Arc<dyn HttpClient> = backend.clone();
        let (manager, rx) = SessionManager::with_clock(
            AuthApi::new(http, Endpoints::default()),
            Arc::new(MemoryCredentialStore::new()),
            SessionConfig::default(),
            Arc::new(clock),
        );
        (manager, rx, backend)
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use SessionState::*;
        assert!(LoggedOut.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(LoggedOut));
        assert!(LoggingOut.can_transition_to(LoggedOut));
        assert!(!LoggedOut.can_transition_to(Authenticated));
        assert!(!LoggingOut.can_transition_to(Authenticated));
        assert!(!Refreshing.can_transition_to(Refreshing));
    }

    #[tokio::test(start_paused = true)]
    async fn login_takes_player_id_from_sub_claim() {
        let (manager, mut rx, _) = manager(false);
        let session = manager
            .login(&Credentials::new("ann", "pw"))
            .await
            .unwrap();
        assert_eq!(session.player_id, "p1");
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(manager.is_renewal_scheduled());
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::LoggedIn {
                player_id: "p1".into(),
                restored: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_renewals_share_one_refresh() {
        let (manager, _rx, backend) = manager(false);
        manager.login(&Credentials::new("ann", "pw")).await.unwrap();

        let (a, b, c) = tokio::join!(manager.renew(), manager.renew(), manager.renew());
        assert_eq!(backend.refreshes.load(Ordering::SeqCst), 1);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(manager.current_session().unwrap().refresh_token, "r1");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_renewal_forces_one_logout() {
        let (manager, mut rx, _) = manager(true);
        manager.login(&Credentials::new("ann", "pw")).await.unwrap();
        let _ = rx.recv().await;

        assert!(manager.renew().await.is_none());
        assert_eq!(manager.state(), SessionState::LoggedOut);
        assert!(manager.is_session_expired());
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::RefreshFailed,
                forced: true
            }
        );
        assert!(!manager.force_logout(LogoutReason::Retry401).await);
    }

    #[tokio::test(start_paused = true)]
    async fn second_login_is_rejected() {
        let (manager, _rx, _) = manager(false);
        manager.login(&Credentials::new("ann", "pw")).await.unwrap();
        let err = manager
            .login(&Credentials::new("ann", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, VoidlineError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_logout_is_not_marked_expired() {
        let (manager, _rx, _) = manager(false);
        manager.login(&Credentials::new("ann", "pw")).await.unwrap();
        manager.logout(false).await.unwrap();
        assert_eq!(manager.state(), SessionState::LoggedOut);
        assert!(!manager.is_session_expired());
        assert!(!manager.is_renewal_scheduled());
        assert!(manager.access_token().is_none());
    }

    #[test]
    fn session_debug_hides_tokens() {
        let session = Session {
            access_token: "secret-a".into(),
            refresh_token: "secret-r".into(),
            player_id: "p".into(),
            access_expiry_epoch_ms: None,
            state: SessionState::Authenticated,
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret"));
    }
}
