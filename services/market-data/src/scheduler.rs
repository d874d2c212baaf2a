//! Subscription rotation
//!
//! The streaming universe is cut into fixed-size batches. Each cycle the
//! scheduler picks the next batch, filters it down to tokens whose trading
//! session is open on the venue clock, releases everything the previous
//! cycle subscribed, subscribes the new active set, then waits out the
//! rotation interval:
//!
//! ```text
//! Idle → ComputeActiveBatch → Unsubscribe(prev) → Subscribe(active) → Wait → …
//! ```
//!
//! At most one batch (plus any on-demand tokens) is subscribed at a time.
//! Control failures are logged and counted; rotation always moves on.
//! Rotation only runs while the transport reports a live connection, and a
//! disconnect restarts the cycle from the first batch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::instrument::UniverseEntry;

use crate::clock::Clock;
use crate::metrics::EngineMetrics;
use crate::transport::{ConnectionState, FeedControl, StreamMode, TransportError};

/// Queue depth for pending on-demand requests.
const REQUEST_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub rotation_interval: Duration,
    pub mode: StreamMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    Idle,
    ComputeActiveBatch,
    Unsubscribe,
    Subscribe,
    Wait,
}

/// What one rotation step did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    pub batch_index: usize,
    pub unsubscribed: Vec<u32>,
    pub subscribed: Vec<u32>,
    pub unsubscribe_failed: bool,
    pub subscribe_failed: bool,
}

struct OnDemandRequest {
    token: u32,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

/// Cloneable handle for asking the scheduler to subscribe a token now.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<OnDemandRequest>,
}

impl SchedulerHandle {
    /// Subscribe `token` outside the rotation. The token is released at the
    /// scheduler's next unsubscribe phase.
    pub async fn request_subscription(&self, token: u32) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OnDemandRequest { token, reply })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }
}

/// Split the universe into consecutive batches of `size` entries.
pub fn build_batches(universe: &[UniverseEntry], size: usize) -> Vec<Vec<UniverseEntry>> {
    universe
        .chunks(size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub struct SubscriptionScheduler {
    batches: Vec<Vec<UniverseEntry>>,
    config: SchedulerConfig,
    control: Arc<dyn FeedControl>,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
    connection: watch::Receiver<ConnectionState>,
    /// Connection epoch the current subscription state belongs to.
    epoch: Option<u64>,
    requests: mpsc::Receiver<OnDemandRequest>,
    phase: RotationPhase,
    next_batch: usize,
    /// Tokens the rotation currently holds subscribed.
    active: Vec<u32>,
    /// Tokens subscribed on demand since the last unsubscribe phase.
    on_demand: BTreeSet<u32>,
}

impl SubscriptionScheduler {
    pub fn new(
        universe: &[UniverseEntry],
        config: SchedulerConfig,
        control: Arc<dyn FeedControl>,
        clock: Arc<dyn Clock>,
        metrics: EngineMetrics,
        connection: watch::Receiver<ConnectionState>,
    ) -> (Self, SchedulerHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let batches = build_batches(universe, config.batch_size);
        info!(
            universe = universe.len(),
            batches = batches.len(),
            batch_size = config.batch_size,
            "Subscription scheduler ready"
        );
        (
            Self {
                batches,
                config,
                control,
                clock,
                metrics,
                connection,
                epoch: None,
                requests,
                phase: RotationPhase::Idle,
                next_batch: 0,
                active: Vec::new(),
                on_demand: BTreeSet::new(),
            },
            SchedulerHandle { tx },
        )
    }

    /// Drive rotation until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }

            let state = *self.connection.borrow_and_update();
            if !state.connected {
                self.phase = RotationPhase::Idle;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = self.connection.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    Some(req) = self.requests.recv() => {
                        let _ = req.reply.send(Err(TransportError::NotConnected));
                    }
                }
                continue;
            }
            if self.epoch != Some(state.epoch) {
                if self.epoch.is_some() {
                    info!(
                        epoch = state.epoch,
                        "Transport reconnected, rotation restarts from the first batch"
                    );
                }
                self.forget();
                self.epoch = Some(state.epoch);
            }

            if self.rotate_once(&cancel).await.is_none() {
                break;
            }

            let wait = tokio::time::sleep(self.config.rotation_interval);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'outer,
                    changed = self.connection.changed() => {
                        if changed.is_err() {
                            break 'outer;
                        }
                        let state = *self.connection.borrow_and_update();
                        if !state.connected || self.epoch != Some(state.epoch) {
                            info!(
                                next_batch = self.next_batch,
                                epoch = state.epoch,
                                "Transport disconnected, rotation restarts from the first batch"
                            );
                            self.forget();
                            self.epoch = None;
                            continue 'outer;
                        }
                    }
                    Some(req) = self.requests.recv() => self.handle_request(req).await,
                    _ = &mut wait => break,
                }
            }
        }

        self.phase = RotationPhase::Idle;
        info!("Subscription scheduler stopped");
    }

    /// Run one ComputeActiveBatch → Unsubscribe → Subscribe step and enter Wait.
    ///
    /// Returns `None` if `cancel` fired before a phase began.
    pub async fn rotate_once(&mut self, cancel: &CancellationToken) -> Option<RotationOutcome> {
        if cancel.is_cancelled() {
            return None;
        }
        self.phase = RotationPhase::ComputeActiveBatch;
        if self.batches.is_empty() {
            self.phase = RotationPhase::Idle;
            return Some(RotationOutcome::default());
        }

        let batch_index = self.next_batch;
        let now = self.clock.now();
        let next_active: Vec<u32> = self.batches[batch_index]
            .iter()
            .filter(|entry| entry.session.is_open_at(&now))
            .map(|entry| entry.token)
            .collect();
        let mut outcome = RotationOutcome {
            batch_index,
            ..RotationOutcome::default()
        };

        if cancel.is_cancelled() {
            return None;
        }
        self.phase = RotationPhase::Unsubscribe;
        let mut release: Vec<u32> = std::mem::take(&mut self.active);
        release.extend(std::mem::take(&mut self.on_demand));
        release.sort_unstable();
        release.dedup();
        if !release.is_empty() {
            debug!(batch = batch_index, tokens = release.len(), "Unsubscribing previous batch");
            if let Err(e) = self.control.unsubscribe(&release).await {
                warn!(batch = batch_index, tokens = release.len(), error = %e, "Unsubscribe failed");
                self.metrics.inc_unsubscribe_failures();
                outcome.unsubscribe_failed = true;
            }
        }
        outcome.unsubscribed = release;

        if cancel.is_cancelled() {
            return None;
        }
        self.phase = RotationPhase::Subscribe;
        if next_active.is_empty() {
            debug!(batch = batch_index, "No tokens in session, skipping subscribe");
        } else {
            match self.control.subscribe(&next_active, self.config.mode).await {
                Ok(()) => {
                    self.active = next_active.clone();
                    outcome.subscribed = next_active;
                }
                Err(e) => {
                    warn!(
                        batch = batch_index,
                        tokens = next_active.len(),
                        error = %e,
                        "Subscribe failed"
                    );
                    self.metrics.inc_subscribe_failures();
                    outcome.subscribe_failed = true;
                }
            }
        }

        self.next_batch = (batch_index + 1) % self.batches.len();
        self.metrics.inc_rotations();
        info!(
            batch = batch_index,
            of = self.batches.len(),
            subscribed = outcome.subscribed.len(),
            released = outcome.unsubscribed.len(),
            "Rotated subscription batch"
        );
        if self.next_batch == 0 {
            debug!(batches = self.batches.len(), "Rotation cycle complete");
        }
        self.phase = RotationPhase::Wait;
        Some(outcome)
    }

    async fn handle_request(&mut self, req: OnDemandRequest) {
        let token = req.token;
        if self.active.contains(&token) || self.on_demand.contains(&token) {
            let _ = req.reply.send(Ok(()));
            return;
        }

        let result = self.control.subscribe(&[token], self.config.mode).await;
        match &result {
            Ok(()) => {
                self.on_demand.insert(token);
                self.metrics.inc_on_demand_subscriptions();
                info!(token, "On-demand subscription");
            }
            Err(e) => {
                warn!(token, error = %e, "On-demand subscribe failed");
                self.metrics.inc_subscribe_failures();
            }
        }
        let _ = req.reply.send(result);
    }

    /// Drop all subscription state after the connection is lost.
    fn forget(&mut self) {
        self.active.clear();
        self.on_demand.clear();
        self.next_batch = 0;
        self.phase = RotationPhase::Idle;
    }

    pub fn phase(&self) -> RotationPhase {
        self.phase
    }

    /// Index of the batch the next rotation will subscribe.
    pub fn next_batch(&self) -> usize {
        self.next_batch
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn active_tokens(&self) -> &[u32] {
        &self.active
    }
}
