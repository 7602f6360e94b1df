//! Named timer registry built on spawned Tokio tasks.
//!
//! Every timer is owned by a string key. Scheduling under a key that is
//! already live replaces the old timer (the old task is aborted and can no
//! longer fire). Cancelling an unknown key is a no-op. One-shot timers remove
//! their own registry entry when they fire, so `is_pending` goes false
//! without an explicit cancel.
//!
//! The registry never inspects what a callback does; verdict semantics live
//! entirely in the session layer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

struct Entry {
    handle: JoinHandle<()>,
    /// Distinguishes this scheduling from any later one under the same key.
    /// A fired one-shot only removes the entry if the generation still
    /// matches, so it can never tear down a replacement timer.
    generation: u64,
}

/// Named one-shot and periodic timers with replace-on-reschedule semantics.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct TimerRegistry {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    next_generation: Arc<AtomicU64>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn register(&self, key: &str, handle: JoinHandle<()>, generation: u64) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.insert(key.to_string(), Entry { handle, generation }) {
            trace!(key, "replacing live timer");
            old.handle.abort();
        }
    }

    /// Schedule `action` to run once after `delay`, replacing any live timer
    /// under `key`.
    pub fn schedule_once<F, Fut>(&self, key: &str, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = self.clone();
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deregister before running so the callback sees itself as no
            // longer pending, and only if we were not replaced meanwhile.
            {
                let mut inner = registry.inner.lock();
                match inner.get(&owned_key) {
                    Some(entry) if entry.generation == generation => {
                        inner.remove(&owned_key);
                    }
                    _ => return,
                }
            }
            action().await;
        });
        self.register(key, handle, generation);
    }

    /// Schedule `action` to run every `period`, starting one period from now,
    /// replacing any live timer under `key`. Runs until cancelled or replaced.
    pub fn schedule_periodic<F, Fut>(&self, key: &str, period: Duration, mut action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first interval tick completes immediately; consume it so
            // the first callback lands one full period out.
            interval.tick().await;
            loop {
                interval.tick().await;
                action().await;
            }
        });
        self.register(key, handle, generation);
    }

    /// Cancel the timer under `key`, if any. Unknown keys are a no-op.
    pub fn cancel(&self, key: &str) {
        if let Some(entry) = self.inner.lock().remove(key) {
            entry.handle.abort();
        }
    }

    /// True while a timer under `key` is live (scheduled and not yet fired,
    /// cancelled, or replaced-then-cancelled).
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Cancel every live timer.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for (_, entry) in inner.drain() {
            entry.handle.abort();
        }
    }

    /// Number of live timers. Useful for shutdown assertions.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_action(counter: Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_and_deregisters() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule_once("t", Duration::from_secs(5), counter_action(fired.clone()));

        assert!(timers.is_pending("t"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_pending("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_old_timer() {
        let timers = TimerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timers.schedule_once("t", Duration::from_secs(5), counter_action(first.clone()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        timers.schedule_once("t", Duration::from_secs(5), counter_action(second.clone()));

        // Past the first deadline; only the replacement may fire.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing_and_unknown_key_is_noop() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule_once("t", Duration::from_secs(5), counter_action(fired.clone()));

        timers.cancel("t");
        timers.cancel("never-existed");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timers.is_pending("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_repeatedly_until_cancelled() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule_periodic("tick", Duration::from_secs(1), counter_action(fired.clone()));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        timers.cancel("tick");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule_once("a", Duration::from_secs(1), counter_action(fired.clone()));
        timers.schedule_once("b", Duration::from_secs(2), counter_action(fired.clone()));
        timers.schedule_periodic("c", Duration::from_secs(1), counter_action(fired.clone()));
        assert_eq!(timers.pending_count(), 3);

        timers.cancel_all();
        assert_eq!(timers.pending_count(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_keys_do_not_interfere() {
        let timers = TimerRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        timers.schedule_once("a", Duration::from_secs(1), counter_action(a.clone()));
        timers.schedule_once("b", Duration::from_secs(3), counter_action(b.clone()));

        timers.cancel("a");
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }
}
