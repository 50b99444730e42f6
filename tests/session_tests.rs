#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Session lifecycle tests for the Voidline client.
//!
//! Drives a fully wired [`GameClient`] over the in-process `FakeBackend`
//! and `MockConnector` from `tests/common`, with Tokio time paused so
//! renewal timers and grace periods run instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use voidline_client::{
    ClientConfig, CredentialKey, CredentialStore, Credentials, LogoutReason,
    MemoryCredentialStore, Registration, SessionConfig, SessionEvent, SessionState,
    VoidlineError,
};

use common::{wait_until, Harness, PLAYER_ID};

// ════════════════════════════════════════════════════════════════════
// Login, signup, restore
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn login_persists_pair_and_emits_event() {
    let mut h = Harness::new();
    let session = h.login().await;

    assert_eq!(session.player_id, PLAYER_ID);
    assert_eq!(session.state, SessionState::Authenticated);
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
    assert_eq!(
        h.store.get(CredentialKey::AccessToken).as_deref(),
        Some(session.access_token.as_str())
    );
    assert_eq!(
        h.store.get(CredentialKey::RefreshToken).as_deref(),
        Some(session.refresh_token.as_str())
    );
    assert_eq!(h.store.get(CredentialKey::PlayerId).as_deref(), Some(PLAYER_ID));
    assert_eq!(
        session.access_expiry_epoch_ms,
        Some((common::START_MS + 3_600_000) / 1000 * 1000)
    );

    assert_eq!(
        h.drain_events(),
        vec![SessionEvent::LoggedIn {
            player_id: PLAYER_ID.into(),
            restored: false,
        }]
    );
    assert!(h.client.session().is_renewal_scheduled());
}

#[tokio::test(start_paused = true)]
async fn invalid_credentials_leave_session_untouched() {
    let mut h = Harness::new();
    let err = h
        .client
        .session()
        .login(&Credentials::new("ann", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, VoidlineError::AuthInvalidCredentials), "got {err:?}");
    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
    assert!(h.store.is_empty());
    assert!(h.drain_events().is_empty());
    assert_eq!(h.connector.open_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn signup_logs_into_new_account() {
    let h = Harness::new();
    let session = h
        .client
        .session()
        .signup(&Registration::new("bob", "bob@example.com", "pw"))
        .await
        .unwrap();
    assert_eq!(session.player_id, "player-bob");
    assert_eq!(h.client.session().player_id().as_deref(), Some("player-bob"));
}

#[tokio::test(start_paused = true)]
async fn signup_with_taken_username_is_http_conflict() {
    let h = Harness::new();
    let err = h
        .client
        .session()
        .signup(&Registration::new("taken", "t@example.com", "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
}

#[tokio::test(start_paused = true)]
async fn login_twice_is_invalid_state() {
    let h = Harness::new();
    h.login().await;
    let err = h
        .client
        .session()
        .login(&Credentials::new("ann", common::PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, VoidlineError::InvalidState(_)), "got {err:?}");
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn restore_rebuilds_session_from_store() {
    let mut h = Harness::new();
    let (access, refresh) = h.backend.issue(PLAYER_ID);
    h.store.set(CredentialKey::AccessToken, &access);
    h.store.set(CredentialKey::RefreshToken, &refresh);
    h.store.set(CredentialKey::PlayerId, PLAYER_ID);

    let session = h.client.session().restore().expect("restored session");

    assert_eq!(session.access_token, access);
    assert_eq!(session.refresh_token, refresh);
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
    assert_eq!(
        h.drain_events(),
        vec![SessionEvent::LoggedIn {
            player_id: PLAYER_ID.into(),
            restored: true,
        }]
    );
    assert!(h.client.session().is_renewal_scheduled());

    wait_until(Duration::from_secs(1), || {
        h.client.stream().state() == voidline_client::ConnectionState::Subscribed
    })
    .await;
    assert_eq!(h.connector.latest().bearer(), access);
}

#[tokio::test(start_paused = true)]
async fn restore_with_missing_key_stays_logged_out() {
    let store = Arc::new(MemoryCredentialStore::new());
    store.set(CredentialKey::AccessToken, "a");
    store.set(CredentialKey::PlayerId, PLAYER_ID);

    let h = Harness::with_store(ClientConfig::default(), store);
    assert!(h.client.session().restore().is_none());
    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
    assert_eq!(h.connector.open_attempts(), 0);
}

// ════════════════════════════════════════════════════════════════════
// Renewal
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn concurrent_renewals_share_one_refresh_call() {
    let h = Harness::new();
    h.login().await;

    let session = h.client.session();
    let (a, b, c) = tokio::join!(session.renew(), session.renew(), session.renew());

    assert_eq!(h.backend.refresh_calls(), 1);
    let a = a.expect("renewed token");
    assert_eq!(b.as_deref(), Some(a.as_str()));
    assert_eq!(c.as_deref(), Some(a.as_str()));
    assert_eq!(session.access_token().as_deref(), Some(a.as_str()));
}

#[tokio::test(start_paused = true)]
async fn late_renew_joins_in_flight_refresh() {
    let h = Harness::new();
    h.login().await;

    let mut first = tokio_test::task::spawn(h.client.session().renew());
    tokio_test::assert_pending!(first.poll());
    assert_eq!(h.client.session().state(), SessionState::Refreshing);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut second = tokio_test::task::spawn(h.client.session().renew());
    tokio_test::assert_pending!(second.poll());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let a = tokio_test::assert_ready!(first.poll());
    let b = tokio_test::assert_ready!(second.poll());
    assert!(a.is_some());
    assert_eq!(a, b);
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn renewal_persists_both_rotated_tokens_together() {
    let mut h = Harness::new();
    let before = h.login().await;

    let renewed = h.client.session().renew().await.expect("renewed");
    assert_ne!(renewed, before.access_token);

    let stored_access = h.store.get(CredentialKey::AccessToken).unwrap();
    let stored_refresh = h.store.get(CredentialKey::RefreshToken).unwrap();
    assert_eq!(stored_access, renewed);
    assert_eq!(h.backend.paired_refresh(&stored_access), Some(stored_refresh));

    let events = h.drain_events();
    assert_eq!(
        events.last(),
        Some(&SessionEvent::TokensRenewed {
            player_id: PLAYER_ID.into()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_state_is_visible_while_in_flight() {
    let h = Harness::new();
    h.login().await;
    h.backend.set_refresh_latency(Duration::from_secs(1));

    let session = h.client.session().clone();
    let task = tokio::spawn(async move { session.renew().await });
    wait_until(Duration::from_millis(100), || {
        h.client.session().state() == SessionState::Refreshing
    })
    .await;
    assert_eq!(
        h.client.session().refresh_started_at(),
        Some(common::START_MS)
    );

    assert!(task.await.unwrap().is_some());
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
    assert_eq!(h.client.session().refresh_started_at(), None);
}

#[tokio::test(start_paused = true)]
async fn proactive_timer_fires_margin_before_expiry() {
    let h = Harness::new();
    h.backend.set_token_ttl(Duration::from_secs(120));
    h.login().await;
    assert!(h.client.session().is_renewal_scheduled());

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(h.backend.refresh_calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.backend.refresh_calls(), 1);
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
    assert!(h.client.session().is_renewal_scheduled());
}

#[tokio::test(start_paused = true)]
async fn token_issued_inside_margin_renews_once_not_in_a_loop() {
    let h = Harness::new();
    h.backend.set_token_ttl(Duration::from_secs(30));
    h.login().await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.backend.refresh_calls(), 1);
    assert!(!h.client.session().is_renewal_scheduled());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn get_valid_token_renews_inside_margin() {
    let h = Harness::new();
    h.backend.set_token_ttl(Duration::from_secs(600));
    let session = h.login().await;

    let token = h.client.session().get_valid_token().await;
    assert_eq!(token.as_deref(), Some(session.access_token.as_str()));
    assert_eq!(h.backend.refresh_calls(), 0);

    // 9.5 minutes later the token is within a minute of expiry.
    h.clock.advance(Duration::from_secs(570));
    let token = h.client.session().get_valid_token().await.unwrap();
    assert_ne!(token, session.access_token);
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn relogin_replaces_renewal_timer() {
    let h = Harness::new();
    h.backend.set_token_ttl(Duration::from_secs(120));
    h.login().await;
    h.client.session().logout(false).await.unwrap();
    assert!(!h.client.session().is_renewal_scheduled());

    tokio::time::sleep(Duration::from_secs(30)).await;
    h.login().await;
    assert!(h.client.session().is_renewal_scheduled());

    // The first timer would have fired at t=60s; the replacement at t=90s.
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(h.backend.refresh_calls(), 0);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_completing_after_logout_is_discarded() {
    let h = Harness::new();
    h.login().await;
    h.backend.set_refresh_latency(Duration::from_secs(1));

    let session = h.client.session().clone();
    let renewal = tokio::spawn(async move { session.renew().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.client.session().state(), SessionState::Refreshing);

    h.client.session().logout(false).await.unwrap();
    assert_eq!(h.client.session().state(), SessionState::LoggedOut);

    assert_eq!(renewal.await.unwrap(), None);
    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
    assert!(h.client.session().current_session().is_none());
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_forces_logout() {
    let mut h = Harness::new();
    h.login().await;
    h.drain_events();
    h.backend.set_fail_refresh(true);

    assert_eq!(h.client.session().renew().await, None);

    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
    assert!(h.client.session().is_session_expired());
    assert!(h.store.is_empty());
    assert_eq!(
        h.drain_events(),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::RefreshFailed,
            forced: true,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_does_not_wait_on_full_event_channel() {
    let config = ClientConfig::default()
        .with_session(SessionConfig::default().with_event_channel_capacity(1));
    let mut h = Harness::with_config(config);
    // The LoggedIn event fills the channel and is left unread.
    h.login().await;
    h.backend.set_fail_refresh(true);

    let renewed = tokio::time::timeout(Duration::from_secs(5), h.client.session().renew()).await;
    assert_eq!(renewed.expect("renew must not block on event delivery"), None);
    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
    assert!(h.store.is_empty());

    assert!(matches!(h.events.recv().await, Some(SessionEvent::LoggedIn { .. })));
    assert_eq!(
        h.events.recv().await,
        Some(SessionEvent::LoggedOut {
            reason: LogoutReason::RefreshFailed,
            forced: true,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn renew_without_session_is_none() {
    let h = Harness::new();
    assert_eq!(h.client.session().renew().await, None);
    assert_eq!(h.backend.refresh_calls(), 0);
}

// ════════════════════════════════════════════════════════════════════
// Logout
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn explicit_logout_revokes_and_clears() {
    let mut h = Harness::new();
    let session = h.login().await;
    h.drain_events();

    h.client.session().logout(true).await.unwrap();

    let revokes = h.backend.requests_to("/auth/logout");
    assert_eq!(revokes.len(), 1);
    assert_eq!(revokes[0].bearer.as_deref(), Some(session.access_token.as_str()));
    assert_eq!(revokes[0].body.as_ref().unwrap()["all_sessions"], true);

    assert_eq!(h.client.session().state(), SessionState::LoggedOut);
    assert!(!h.client.session().is_session_expired());
    assert!(h.store.is_empty());
    assert_eq!(
        h.drain_events(),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::UserInitiated,
            forced: false,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn logout_while_logged_out_only_clears_store() {
    let store = Arc::new(MemoryCredentialStore::new());
    store.set(CredentialKey::PlayerId, PLAYER_ID);
    let mut h = Harness::with_store(ClientConfig::default(), store);

    h.client.session().logout(false).await.unwrap();
    assert!(h.store.is_empty());
    assert!(h.backend.requests_to("/auth/logout").is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn forced_logout_is_debounced() {
    let mut h = Harness::new();
    h.login().await;
    assert!(h.client.session().force_logout(LogoutReason::Unauthorized).await);

    h.clock.advance(Duration::from_millis(500));
    h.login().await;
    assert!(!h.client.session().force_logout(LogoutReason::Retry401).await);
    assert_eq!(h.client.session().state(), SessionState::Authenticated);

    h.clock.advance(Duration::from_millis(2000));
    assert!(h.client.session().force_logout(LogoutReason::Retry401).await);

    let logouts: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::LoggedOut { .. }))
        .collect();
    assert_eq!(
        logouts,
        vec![
            SessionEvent::LoggedOut {
                reason: LogoutReason::Unauthorized,
                forced: true,
            },
            SessionEvent::LoggedOut {
                reason: LogoutReason::Retry401,
                forced: true,
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn simultaneous_forced_logouts_run_once() {
    let mut h = Harness::new();
    h.login().await;
    h.drain_events();

    let session = h.client.session();
    let (a, b) = tokio::join!(
        session.force_logout(LogoutReason::Unauthorized),
        session.force_logout(LogoutReason::Retry401)
    );
    assert!(a ^ b, "exactly one forced logout should run");
    assert_eq!(h.drain_events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_logout_is_suppressed_while_refreshing() {
    let h = Harness::new();
    h.login().await;
    h.backend.set_refresh_latency(Duration::from_secs(1));

    let session = h.client.session().clone();
    let renewal = tokio::spawn(async move { session.renew().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!h.client.session().force_logout(LogoutReason::Retry401).await);
    assert!(renewal.await.unwrap().is_some());
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn logout_disconnects_stream() {
    let h = Harness::new();
    h.login().await;
    wait_until(Duration::from_secs(1), || {
        h.client.stream().state() == voidline_client::ConnectionState::Subscribed
    })
    .await;
    let server = h.connector.latest();

    h.client.session().logout(false).await.unwrap();
    wait_until(Duration::from_secs(1), || server.closed()).await;
    assert_eq!(
        h.client.stream().state(),
        voidline_client::ConnectionState::Disconnected
    );
    assert_eq!(h.client.stream().player_id(), None);
}

#[tokio::test(start_paused = true)]
async fn shutdown_keeps_credentials_for_next_launch() {
    let h = Harness::new();
    h.login().await;
    h.client.shutdown();

    assert!(!h.client.session().is_renewal_scheduled());
    assert_eq!(h.store.len(), 3);
    assert_eq!(h.client.session().state(), SessionState::Authenticated);
}
