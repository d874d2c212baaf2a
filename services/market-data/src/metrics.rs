//! Observability counters for the ingestion engine
//!
//! Every task holds a cheap clone of [`EngineMetrics`]; counters are
//! relaxed atomics, so a [`MetricsSnapshot`] is a point-in-time view rather
//! than a consistent cut across counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct EngineMetricsInner {
    // Ingress
    messages_received: AtomicU64,
    ingress_dropped: AtomicU64,

    // Decoding
    packets_decoded: AtomicU64,
    packets_skipped: AtomicU64,
    messages_truncated: AtomicU64,

    // Cache
    ticks_cached: AtomicU64,

    // Storage
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    storage_failures: AtomicU64,

    // Rotation
    rotations: AtomicU64,
    subscribe_failures: AtomicU64,
    unsubscribe_failures: AtomicU64,
    on_demand_subscriptions: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<EngineMetricsInner>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub ingress_dropped: u64,
    pub packets_decoded: u64,
    pub packets_skipped: u64,
    pub messages_truncated: u64,
    pub ticks_cached: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub storage_failures: u64,
    pub rotations: u64,
    pub subscribe_failures: u64,
    pub unsubscribe_failures: u64,
    pub on_demand_subscriptions: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_messages_received(&self) {
        self.inner.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingress_dropped(&self) {
        self.inner.ingress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of decoding one message.
    pub fn record_decode(&self, decoded: u64, skipped: u64, truncated: bool) {
        if decoded > 0 {
            self.inner.packets_decoded.fetch_add(decoded, Ordering::Relaxed);
        }
        if skipped > 0 {
            self.inner.packets_skipped.fetch_add(skipped, Ordering::Relaxed);
        }
        if truncated {
            self.inner.messages_truncated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_ticks_cached(&self, delta: u64) {
        if delta > 0 {
            self.inner.ticks_cached.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn record_frame_written(&self, bytes: u64) {
        self.inner.frames_written.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_storage_failures(&self) {
        self.inner.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rotations(&self) {
        self.inner.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_subscribe_failures(&self) {
        self.inner.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unsubscribe_failures(&self) {
        self.inner.unsubscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_on_demand_subscriptions(&self) {
        self.inner
            .on_demand_subscriptions
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let i = &self.inner;
        MetricsSnapshot {
            messages_received: i.messages_received.load(Ordering::Relaxed),
            ingress_dropped: i.ingress_dropped.load(Ordering::Relaxed),
            packets_decoded: i.packets_decoded.load(Ordering::Relaxed),
            packets_skipped: i.packets_skipped.load(Ordering::Relaxed),
            messages_truncated: i.messages_truncated.load(Ordering::Relaxed),
            ticks_cached: i.ticks_cached.load(Ordering::Relaxed),
            frames_written: i.frames_written.load(Ordering::Relaxed),
            bytes_written: i.bytes_written.load(Ordering::Relaxed),
            storage_failures: i.storage_failures.load(Ordering::Relaxed),
            rotations: i.rotations.load(Ordering::Relaxed),
            subscribe_failures: i.subscribe_failures.load(Ordering::Relaxed),
            unsubscribe_failures: i.unsubscribe_failures.load(Ordering::Relaxed),
            on_demand_subscriptions: i.on_demand_subscriptions.load(Ordering::Relaxed),
        }
    }

    /// Export counters as a name → value map for text exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("messages_received".to_string(), s.messages_received);
        m.insert("ingress_dropped".to_string(), s.ingress_dropped);
        m.insert("packets_decoded".to_string(), s.packets_decoded);
        m.insert("packets_skipped".to_string(), s.packets_skipped);
        m.insert("messages_truncated".to_string(), s.messages_truncated);
        m.insert("ticks_cached".to_string(), s.ticks_cached);
        m.insert("frames_written".to_string(), s.frames_written);
        m.insert("bytes_written".to_string(), s.bytes_written);
        m.insert("storage_failures".to_string(), s.storage_failures);
        m.insert("rotations".to_string(), s.rotations);
        m.insert("subscribe_failures".to_string(), s.subscribe_failures);
        m.insert("unsubscribe_failures".to_string(), s.unsubscribe_failures);
        m.insert("on_demand_subscriptions".to_string(), s.on_demand_subscriptions);
        m
    }
}
