//! Streaming transport seam
//!
//! The socket handshake lives outside this crate. The engine only sees an
//! already-framed inbound event stream ([`FeedSource`]) and a control handle
//! that accepts subscribe/unsubscribe calls ([`FeedControl`]).
//!
//! In-process implementations backed by channels are provided for replaying
//! captured sessions and for tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Detail level requested for a subscribed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Ltp,
    Quote,
    Full,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Ltp => "ltp",
            StreamMode::Quote => "quote",
            StreamMode::Full => "full",
        }
    }
}

/// Inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Connected,
    Disconnected,
    /// One framed binary message.
    Message(Vec<u8>),
}

/// Connection status published by the feed reader.
///
/// `epoch` increases on every connect, so a disconnect followed by a
/// reconnect is visible even when only the latest value is observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub epoch: u64,
}

impl ConnectionState {
    /// A new live connection.
    pub fn connect(self) -> Self {
        Self {
            connected: true,
            epoch: self.epoch + 1,
        }
    }

    pub fn disconnect(self) -> Self {
        Self {
            connected: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport closed")]
    Closed,
}

/// Source of inbound events. `None` means the transport has shut down.
#[async_trait]
pub trait FeedSource: Send {
    async fn next_event(&mut self) -> Option<FeedEvent>;
}

/// Control channel for subscription changes.
#[async_trait]
pub trait FeedControl: Send + Sync {
    async fn subscribe(&self, tokens: &[u32], mode: StreamMode) -> Result<(), TransportError>;

    async fn unsubscribe(&self, tokens: &[u32]) -> Result<(), TransportError>;
}

// ── Channel-backed feed ─────────────────────────────────────────────

/// Feed source fed from an mpsc channel.
pub struct ChannelFeed {
    rx: mpsc::Receiver<FeedEvent>,
}

/// Create a channel feed and the sender that drives it.
pub fn channel_feed(capacity: usize) -> (mpsc::Sender<FeedEvent>, ChannelFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelFeed { rx })
}

#[async_trait]
impl FeedSource for ChannelFeed {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }
}

// ── Recording control ───────────────────────────────────────────────

/// A control call as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Subscribe { tokens: Vec<u32>, mode: StreamMode },
    Unsubscribe { tokens: Vec<u32> },
}

/// In-memory control handle that records every call and tracks the
/// resulting subscription set, including its high-water mark.
#[derive(Debug, Default)]
pub struct RecordingControl {
    calls: Mutex<Vec<ControlCall>>,
    subscribed: Mutex<BTreeSet<u32>>,
    peak_subscribed: Mutex<usize>,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
}

impl RecordingControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls received so far, in order.
    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().clone()
    }

    /// Drain the recorded calls.
    pub fn take_calls(&self) -> Vec<ControlCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Tokens currently subscribed.
    pub fn subscribed(&self) -> BTreeSet<u32> {
        self.subscribed.lock().clone()
    }

    /// Largest number of tokens ever subscribed at once.
    pub fn peak_subscribed(&self) -> usize {
        *self.peak_subscribed.lock()
    }

    /// Make subsequent subscribe calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent unsubscribe calls fail.
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedControl for RecordingControl {
    async fn subscribe(&self, tokens: &[u32], mode: StreamMode) -> Result<(), TransportError> {
        self.calls.lock().push(ControlCall::Subscribe {
            tokens: tokens.to_vec(),
            mode,
        });
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                op: "subscribe",
                reason: "injected failure".to_string(),
            });
        }

        let mut subscribed = self.subscribed.lock();
        subscribed.extend(tokens.iter().copied());
        let mut peak = self.peak_subscribed.lock();
        *peak = (*peak).max(subscribed.len());
        Ok(())
    }

    async fn unsubscribe(&self, tokens: &[u32]) -> Result<(), TransportError> {
        self.calls.lock().push(ControlCall::Unsubscribe {
            tokens: tokens.to_vec(),
        });
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                op: "unsubscribe",
                reason: "injected failure".to_string(),
            });
        }

        let mut subscribed = self.subscribed.lock();
        for token in tokens {
            subscribed.remove(token);
        }
        Ok(())
    }
}
