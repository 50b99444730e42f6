//! Event listener registry with wildcard fan-out.
//!
//! Listeners register under an exact event type (`game.movement.jump`) or a
//! two-segment wildcard (`game.movement.*`). Dispatch offers each event to
//! the exact key first, then to the wildcard derived from the event's first
//! two segments. Nothing else matches: `game.combat.*` never sees movement
//! events, and there is no catch-all.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{trace, warn};

use crate::error::VoidlineError;
use crate::protocol::StreamEvent;
use crate::sync::lock;

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Unique identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Derive the wildcard key an event type is offered to.
///
/// Only types with at least three segments have one; the wildcard of a
/// two-segment type would be the type itself.
///
/// ```
/// use voidline_client::registry::wildcard_key;
///
/// assert_eq!(wildcard_key("game.movement.jump").as_deref(), Some("game.movement.*"));
/// assert_eq!(wildcard_key("game.combat.round.resolved").as_deref(), Some("game.combat.*"));
/// assert_eq!(wildcard_key("heartbeat"), None);
/// assert_eq!(wildcard_key("game.movement"), None);
/// ```
pub fn wildcard_key(event_type: &str) -> Option<String> {
    let mut segments = event_type.splitn(3, '.');
    let first = segments.next()?;
    let second = segments.next()?;
    segments.next()?;
    Some(format!("{first}.{second}.*"))
}

/// Map of listener key to callbacks in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `key` and return its identity.
    pub fn register(&self, key: impl Into<String>, listener: Listener) -> ListenerId {
        let key = key.into();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!(%key, id = id.0, "listener registered");
        lock(&self.listeners).entry(key).or_default().push((id, listener));
        id
    }

    /// Remove one registration. Returns `false` if it was already gone.
    ///
    /// The key is deleted together with its last listener.
    pub fn unregister(&self, key: &str, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(entries) = listeners.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    /// Drop every registration.
    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }

    /// Total number of registrations across all keys.
    pub fn len(&self) -> usize {
        lock(&self.listeners).values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        lock(&self.listeners).is_empty()
    }

    /// Number of distinct keys with at least one listener.
    pub fn key_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Snapshot of the listeners an event of `event_type` would reach, exact
    /// key first.
    fn listeners_for(&self, event_type: &str) -> Vec<Listener> {
        let listeners = lock(&self.listeners);
        let exact = listeners.get(event_type).into_iter().flatten();
        let wildcard = wildcard_key(event_type)
            .and_then(|key| listeners.get(&key))
            .into_iter()
            .flatten();
        exact
            .chain(wildcard)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Invoke every matching listener. Returns how many ran without
    /// panicking.
    ///
    /// Callbacks run after the registry lock is released, so a listener may
    /// register or unregister (itself included) without deadlocking; such
    /// changes take effect from the next dispatch.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let mut delivered = 0;
        for listener in self.listeners_for(&event.event_type) {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let fault = VoidlineError::ListenerFault {
                        event_type: event.event_type.clone(),
                        message: panic_message(panic.as_ref()),
                    };
                    warn!(error = %fault, "event listener failed");
                }
            }
        }
        delivered
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = lock(&self.listeners);
        let keys: Vec<(&str, usize)> = listeners
            .iter()
            .map(|(key, entries)| (key.as_str(), entries.len()))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("keys", &keys)
            .finish()
    }
}

/// Handle returned by
/// [`StreamManager::add_event_listener`](crate::StreamManager::add_event_listener).
///
/// Dropping the handle does **not** unregister the listener; call
/// [`unregister`](Self::unregister).
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    key: String,
    id: ListenerId,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub(crate) fn new(key: String, id: ListenerId, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            key,
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// The key this listener was registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The registration's identity.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already removed (for
    /// example by [`StreamManager::disconnect`](crate::StreamManager::disconnect)).
    pub fn unregister(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unregister(&self.key, self.id))
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
    use crate::protocol::GameEvent;

    fn event(event_type: &str) -> StreamEvent {
        StreamEvent {
            event_type: event_type.to_string(),
            event: GameEvent::Unknown(serde_json::json!({})),
            received_at_epoch_ms: 0,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Listener {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Arc::new(move |_event: &StreamEvent| log.lock().unwrap().push(tag.clone()))
    }

    #[test]
    fn wildcard_key_needs_three_segments() {
        assert_eq!(wildcard_key("a.b.c").as_deref(), Some("a.b.*"));
        assert_eq!(wildcard_key("a.b"), None);
        assert_eq!(wildcard_key("connected"), None);
    }

    #[test]
    fn exact_listeners_run_before_wildcard_in_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("game.movement.*", recorder(&log, "wild-1"));
        registry.register("game.movement.jump", recorder(&log, "exact-1"));
        registry.register("game.movement.*", recorder(&log, "wild-2"));
        registry.register("game.movement.jump", recorder(&log, "exact-2"));
        registry.register("game.combat.*", recorder(&log, "combat"));

        assert_eq!(registry.dispatch(&event("game.movement.jump")), 4);
        assert_eq!(
            *log.lock().unwrap(),
            ["exact-1", "exact-2", "wild-1", "wild-2"]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_dispatch() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("x.y.z", recorder(&log, "first"));
        registry.register("x.y.z", Arc::new(|_: &StreamEvent| panic!("boom")));
        registry.register("x.y.z", recorder(&log, "third"));

        assert_eq!(registry.dispatch(&event("x.y.z")), 2);
        assert_eq!(*log.lock().unwrap(), ["first", "third"]);
    }

    #[test]
    fn unregister_removes_empty_keys() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.register("a.b.c", recorder(&log, "one"));
        let handle = ListenerHandle::new("a.b.c".into(), id, &registry);
        assert_eq!(registry.key_count(), 1);

        assert!(handle.unregister());
        assert!(!handle.unregister());
        assert_eq!(registry.key_count(), 0);
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&event("a.b.c")), 0);
    }

    #[test]
    fn listener_may_unregister_itself_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let listener: Listener = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &StreamEvent| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot.lock().unwrap().take() {
                    handle.unregister();
                }
            })
        };
        let id = registry.register("a.b.c", listener);
        *slot.lock().unwrap() = Some(ListenerHandle::new("a.b.c".into(), id, &registry));

        registry.dispatch(&event("a.b.c"));
        registry.dispatch(&event("a.b.c"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_outliving_registry_is_inert() {
        let registry = Arc::new(ListenerRegistry::new());
        let id = registry.register("a.b.c", Arc::new(|_: &StreamEvent| {}));
        let handle = ListenerHandle::new("a.b.c".into(), id, &registry);
        drop(registry);
        assert!(!handle.unregister());
    }

    #[test]
    fn debug_lists_keys_not_callbacks() {
        let registry = ListenerRegistry::new();
        registry.register("a.b.c", Arc::new(|_: &StreamEvent| {}));
        let debug = format!("{registry:?}");
        assert!(debug.contains("a.b.c"));
    }
}
