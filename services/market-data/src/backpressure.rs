//! Bounded ingress queue between the socket reader and the consumer
//!
//! The reader never buffers without bound. When the queue is full the
//! configured [`BackpressurePolicy`] decides whether the reader waits for
//! room or discards the incoming message.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::EngineMetrics;

/// What the reader does when the ingress queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Await queue space; the transport sees the stall.
    #[default]
    Block,
    /// Discard the incoming message and count the drop.
    DropNewest,
}

/// Result of offering a message to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Dropped,
}

/// The consumer side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ingress queue closed")]
pub struct IngressClosed;

pub struct IngressSender {
    tx: mpsc::Sender<Vec<u8>>,
    policy: BackpressurePolicy,
    metrics: EngineMetrics,
    dropped: u64,
}

pub type IngressReceiver = mpsc::Receiver<Vec<u8>>;

/// Create the ingress queue.
pub fn ingress_channel(
    capacity: usize,
    policy: BackpressurePolicy,
    metrics: EngineMetrics,
) -> (IngressSender, IngressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        IngressSender {
            tx,
            policy,
            metrics,
            dropped: 0,
        },
        rx,
    )
}

impl IngressSender {
    pub async fn push(&mut self, message: Vec<u8>) -> Result<PushOutcome, IngressClosed> {
        match self.policy {
            BackpressurePolicy::Block => {
                self.tx.send(message).await.map_err(|_| IngressClosed)?;
                Ok(PushOutcome::Queued)
            }
            BackpressurePolicy::DropNewest => match self.tx.try_send(message) {
                Ok(()) => Ok(PushOutcome::Queued),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped += 1;
                    self.metrics.inc_ingress_dropped();
                    // Log at 1, 2, 4, 8, ... drops
                    if self.dropped.is_power_of_two() {
                        warn!(
                            total_dropped = self.dropped,
                            capacity = self.tx.max_capacity(),
                            "Backpressure: ingress queue full, dropping message"
                        );
                    } else {
                        debug!(total_dropped = self.dropped, "Ingress message dropped");
                    }
                    Ok(PushOutcome::Dropped)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(IngressClosed),
            },
        }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Messages dropped by this sender.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
