//! Last-value tick cache
//!
//! One reader/writer lock guards the whole map. Writers build the shared
//! `Arc<Tick>` before taking the lock, so the exclusive section is only a
//! handful of pointer swaps and readers always see a complete tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use types::tick::Tick;

#[derive(Debug, Default)]
pub struct TickCache {
    entries: RwLock<HashMap<String, Arc<Tick>>>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `tick` under every key in `keys`, replacing older entries.
    pub fn set<I, K>(&self, keys: I, tick: Tick)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let tick = Arc::new(tick);
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();

        let mut entries = self.entries.write();
        for key in keys {
            entries.insert(key, Arc::clone(&tick));
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Tick>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of keys (not distinct ticks) held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Poll for `key` every `poll_interval` until it appears, `timeout`
    /// elapses, or `cancel` fires.
    pub async fn wait_for(
        &self,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Option<Arc<Tick>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(tick) = self.get(key) {
                return Some(tick);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let nap = poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(nap) => {}
            }
        }
    }
}
