#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Configuration loading tests and project manifest policy checks.
//!
//! Host applications ship client tuning as TOML; these tests pin the file
//! format and verify that loaded values actually drive the client.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use voidline_client::config::{
    DEFAULT_FALLBACK_GRACE, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_RENEWAL_MARGIN,
};
use voidline_client::{ClientConfig, ConnectionState, Endpoints};

use common::Harness;

// ════════════════════════════════════════════════════════════════════
// TOML loading
// ════════════════════════════════════════════════════════════════════

#[test]
fn empty_file_yields_defaults() {
    let config: ClientConfig = toml::from_str("").unwrap();
    assert_eq!(config, ClientConfig::default());
}

#[test]
fn partial_file_overrides_only_given_keys() {
    let config: ClientConfig = toml::from_str(
        r#"
        api_base_url = "https://api.voidline.example"
        stream_url = "wss://api.voidline.example/stream"

        [session]
        renewal_margin_ms = 90000
        logout_debounce_ms = 5000

        [gateway]
        retry_grace_ms = 250

        [stream]
        reconnect_base_delay_ms = 500
        max_reconnect_attempts = 8
        "#,
    )
    .unwrap();

    assert_eq!(config.api_base_url, "https://api.voidline.example");
    assert_eq!(config.session.renewal_margin, Duration::from_secs(90));
    assert_eq!(config.session.logout_debounce, Duration::from_secs(5));
    assert_eq!(config.gateway.retry_grace, Duration::from_millis(250));
    assert_eq!(config.gateway.fallback_grace, DEFAULT_FALLBACK_GRACE);
    assert_eq!(config.stream.max_reconnect_attempts, 8);
    assert_eq!(config.stream.backoff_delay(3), Duration::from_secs(2));
    assert_eq!(config.stream.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    assert_eq!(config.endpoints, Endpoints::default());
}

#[test]
fn endpoints_can_be_relocated() {
    let config: ClientConfig = toml::from_str(
        r#"
        [endpoints]
        refresh = "/v2/session/refresh"
        subscribe = "/v2/events/subscribe"
        "#,
    )
    .unwrap();
    assert!(config.endpoints.is_auth_path("/v2/session/refresh"));
    assert!(config.endpoints.is_auth_path("/auth/login"));
    assert_eq!(config.endpoints.subscribe, "/v2/events/subscribe");
}

#[test]
fn serialized_config_uses_millisecond_keys() {
    let text = toml::to_string(&ClientConfig::default()).unwrap();
    let table: toml::Table = toml::from_str(&text).unwrap();
    assert_eq!(
        table["session"]["renewal_margin_ms"].as_integer(),
        Some(DEFAULT_RENEWAL_MARGIN.as_millis() as i64)
    );
    assert!(table["stream"].get("handshake_timeout_ms").is_some());
}

#[test]
fn mistyped_value_is_rejected() {
    let result = toml::from_str::<ClientConfig>(
        r#"
        [stream]
        max_reconnect_attempts = "lots"
        "#,
    );
    assert!(result.is_err());
}

// ════════════════════════════════════════════════════════════════════
// Loaded values drive behaviour
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn configured_backoff_is_used_by_stream() {
    let config: ClientConfig = toml::from_str(
        r#"
        [stream]
        reconnect_base_delay_ms = 200
        max_reconnect_attempts = 2
        "#,
    )
    .unwrap();
    let h = Harness::with_config(config);
    h.connector.set_fail_opens(true);
    h.login().await;

    tokio::time::sleep(Duration::from_secs(10)).await;

    let failed = h.connector.failed_at();
    assert_eq!(failed.len(), 3);
    assert_eq!(failed[1] - failed[0], Duration::from_millis(200));
    assert_eq!(failed[2] - failed[1], Duration::from_millis(400));
    assert_eq!(h.client.stream().state(), ConnectionState::Disconnected);
    assert_eq!(h.client.stream().reconnect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn configured_renewal_margin_moves_proactive_timer() {
    let config: ClientConfig = toml::from_str(
        r#"
        [session]
        renewal_margin_ms = 600000
        "#,
    )
    .unwrap();
    let h = Harness::with_config(config);
    h.login().await;

    // One-hour token, ten-minute margin.
    tokio::time::sleep(Duration::from_secs(49 * 60)).await;
    assert_eq!(h.backend.refresh_calls(), 0);
    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert_eq!(h.backend.refresh_calls(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Manifest policy
// ════════════════════════════════════════════════════════════════════

fn manifest() -> toml::Table {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    toml::from_str(&text).unwrap()
}

#[test]
fn cargo_toml_denies_panicking_lints() {
    let manifest = manifest();
    let clippy = manifest["lints"]["clippy"]
        .as_table()
        .expect("[lints.clippy] section");
    for lint in [
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ] {
        assert_eq!(
            clippy.get(lint).and_then(|v| v.as_str()),
            Some("deny"),
            "clippy::{lint} must be denied"
        );
    }
}

#[test]
fn default_features_bundle_both_backends() {
    let manifest = manifest();
    let default: Vec<&str> = manifest["features"]["default"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(default.contains(&"transport-websocket"));
    assert!(default.contains(&"http-reqwest"));
}

#[test]
fn msrv_is_declared() {
    let manifest = manifest();
    let msrv = manifest["package"]["rust-version"].as_str().unwrap();
    let mut parts = msrv.split('.').map(|p| p.parse::<u32>().unwrap());
    assert_eq!(parts.next(), Some(1));
    assert!(parts.next().unwrap() >= 85, "rust-version {msrv} is older than 1.85");
}
