//! Reading claims out of access tokens.
//!
//! The client never verifies signatures; it only peeks at the JWT payload to
//! learn when the token expires and which player it belongs to.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// The subset of JWT claims the client cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccessClaims {
    /// Expiry, in seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<u64>,
    /// Subject; the backend puts the player ID here.
    #[serde(default)]
    pub sub: Option<String>,
    /// Issued-at, in seconds since the Unix epoch.
    #[serde(default)]
    pub iat: Option<u64>,
}

impl AccessClaims {
    /// Expiry in milliseconds since the Unix epoch.
    pub fn expiry_epoch_ms(&self) -> Option<u64> {
        self.exp.map(|secs| secs.saturating_mul(1000))
    }
}

/// Decode the payload segment of a JWT.
///
/// Returns `None` for anything that is not a three-segment token with a
/// base64url JSON payload.
pub fn decode_claims(token: &str) -> Option<AccessClaims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    // Some issuers pad; the URL-safe engine here expects no padding.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry of `token` in milliseconds since the Unix epoch, if it carries one.
pub fn expiry_epoch_ms(token: &str) -> Option<u64> {
    decode_claims(token)?.expiry_epoch_ms()
}
