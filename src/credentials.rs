//! Credential storage abstraction.
//!
//! The host application owns the secure storage (keychain, keystore,
//! encrypted preferences). This crate only needs get/set/remove of three
//! opaque strings, expressed by the [`CredentialStore`] trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::sync::lock;

/// The values the session layer persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    /// Short-lived bearer token.
    AccessToken,
    /// Long-lived, single-use renewal token.
    RefreshToken,
    /// Stable identifier of the logged-in player.
    PlayerId,
}

impl CredentialKey {
    /// Every key, in the order they are cleared.
    pub const ALL: [CredentialKey; 3] = [Self::AccessToken, Self::RefreshToken, Self::PlayerId];

    /// Storage key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::PlayerId => "player_id",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key-value storage for session credentials.
///
/// Implementations must be cheap enough to call while the session manager
/// holds its internal lock; the token pair is written inside a single
/// critical section so readers never observe a mismatched pair.
pub trait CredentialStore: Send + Sync + 'static {
    /// Read a stored value.
    fn get(&self, key: CredentialKey) -> Option<String>;

    /// Store a value, replacing any previous one.
    fn set(&self, key: CredentialKey, value: &str);

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: CredentialKey);

    /// Delete every session value.
    fn clear(&self) {
        for key in CredentialKey::ALL {
            self.remove(key);
        }
    }
}

/// In-memory [`CredentialStore`], useful for tests and headless tools.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a full session.
    pub fn with_session(access_token: &str, refresh_token: &str, player_id: &str) -> Self {
        let store = Self::new();
        store.set(CredentialKey::AccessToken, access_token);
        store.set(CredentialKey::RefreshToken, refresh_token);
        store.set(CredentialKey::PlayerId, player_id);
        store
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        lock(&self.values).is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        lock(&self.values).get(&key).cloned()
    }

    fn set(&self, key: CredentialKey, value: &str) {
        lock(&self.values).insert(key, value.to_string());
    }

    fn remove(&self, key: CredentialKey) {
        lock(&self.values).remove(&key);
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the tokens themselves.
        let keys: Vec<&'static str> = lock(&self.values).keys().map(|k| k.as_str()).collect();
        f.debug_struct("MemoryCredentialStore")
            .field("keys", &keys)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = MemoryCredentialStore::new();
        assert!(store.get(CredentialKey::AccessToken).is_none());

        store.set(CredentialKey::AccessToken, "abc");
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("abc"));

        store.set(CredentialKey::AccessToken, "def");
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("def"));

        store.remove(CredentialKey::AccessToken);
        assert!(store.is_empty());
    }

    #[test]
    fn clear_removes_every_key() {
        let store = MemoryCredentialStore::with_session("a", "r", "p");
        assert_eq!(store.len(), 3);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        let store = MemoryCredentialStore::with_session("secret-access", "secret-refresh", "p1");
        let rendered = format!("{store:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("access_token"));
    }
}
