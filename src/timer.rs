//! Clocks and single-shot timers.
//!
//! Wall-clock reads (token expiry, logout debounce) go through the [`Clock`]
//! trait so tests can substitute a [`ManualClock`]. Delays are driven by
//! `tokio::time`, which tests pause and advance virtually.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::sync::lock;

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the Unix epoch.
    fn now_epoch_ms(&self) -> u64;
}

/// [`Clock`] backed by the operating system's real-time clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// [`Clock`] that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// pass another to the client.
///
/// ```
/// use std::time::Duration;
/// use voidline_client::timer::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now_epoch_ms(), 1_250);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `epoch_ms`.
    pub fn new(epoch_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(epoch_ms)),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, epoch_ms: u64) {
        self.now.store(epoch_ms, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A slot holding at most one pending timer.
///
/// Arming the slot cancels whatever was armed before. Once the delay elapses
/// the task is spawned detached: it runs to completion even if the slot is
/// re-armed or cancelled from inside that task.
#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    /// Create an empty slot. `name` only appears in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Run `task` once after `delay`, replacing any pending timer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = self.name;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(timer = name, "timer fired");
            tokio::spawn(task);
        });
        if let Some(previous) = lock(&self.handle).replace(handle) {
            previous.abort();
        }
        debug!(timer = name, delay_ms = delay.as_millis() as u64, "timer armed");
    }

    /// Cancel the pending timer. Returns `true` if one was still waiting.
    pub fn cancel(&self) -> bool {
        match lock(&self.handle).take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!(timer = self.name, "timer cancelled");
                }
                pending
            }
            None => false,
        }
    }

    /// Returns `true` while a timer is waiting to fire.
    pub fn is_armed(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
    }
}
