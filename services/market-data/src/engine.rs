//! Engine loop
//!
//! Composes the feed around four long-running tasks that share one
//! cancellation token:
//!
//! ```text
//! FeedSource ──► reader ──(bounded ingress)──► consumer ──► TickCache
//!                  │                              │
//!                  └─ connection state            └─(bounded)──► storage worker ──► tick log
//!                          │
//!                          ▼
//!                      scheduler ──► FeedControl
//! ```
//!
//! Messages are processed in arrival order. The cache is updated before a
//! batch is handed to storage, so a storage failure never blocks queries:
//! the worker stops, the consumer carries on cache-only, and the failure is
//! reported by [`EngineHandle::stop`].

use std::sync::Arc;

use chrono::NaiveDate;
use persistence::{write_instrument_map, StorageConfig, StorageError, TickLogReader, TickLogWriter};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use types::instrument::{instrument_key, InstrumentDirectory};
use types::tick::Tick;

use crate::backpressure::{ingress_channel, IngressReceiver, IngressSender};
use crate::cache::TickCache;
use crate::clock::Clock;
use crate::config::{ConfigError, EngineConfig};
use crate::coverage::{CoverageTracker, PROGRESS_EVERY};
use crate::decoder::TickDecoder;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::scheduler::{SchedulerConfig, SchedulerHandle, SubscriptionScheduler};
use crate::transport::{
    ConnectionState, FeedControl, FeedEvent, FeedSource, StreamMode, TransportError,
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown instrument {key}")]
    UnknownInstrument { key: String },

    #[error("no tick for {key}")]
    NotFound { key: String },

    #[error("subscription request failed: {0}")]
    Subscription(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("engine task {task} panicked")]
    TaskPanicked { task: &'static str },
}

/// Start the engine: validate configuration, write today's instrument map,
/// open the tick log and spawn the engine tasks.
///
/// Must be called from within a Tokio runtime.
pub async fn start_engine(
    config: EngineConfig,
    directory: Arc<InstrumentDirectory>,
    source: Box<dyn FeedSource>,
    control: Arc<dyn FeedControl>,
    clock: Arc<dyn Clock>,
) -> Result<EngineHandle, EngineError> {
    config.validate()?;

    let storage_config = config.storage_config();
    let today = clock.today();
    write_instrument_map(&storage_config, today, directory.instruments())?;
    let writer = TickLogWriter::open(storage_config.clone(), today)?;

    let metrics = EngineMetrics::new();
    let cache = Arc::new(TickCache::new());
    let cancel = CancellationToken::new();
    let (conn_tx, conn_rx) = watch::channel(ConnectionState::default());

    let universe = directory.streaming_universe();
    let (scheduler, scheduler_handle) = SubscriptionScheduler::new(
        &universe,
        SchedulerConfig {
            batch_size: config.instruments_per_batch,
            rotation_interval: config.rotation_interval(),
            mode: StreamMode::Full,
        },
        control,
        Arc::clone(&clock),
        metrics.clone(),
        conn_rx.clone(),
    );

    let (ingress_tx, ingress_rx) =
        ingress_channel(config.ingress_capacity, config.backpressure, metrics.clone());
    let (storage_tx, storage_rx) = mpsc::channel(config.storage_queue_capacity);

    let storage_task = {
        let worker = StorageWorker {
            writer,
            config: storage_config,
            clock: Arc::clone(&clock),
            directory: Arc::clone(&directory),
            metrics: metrics.clone(),
        };
        tokio::task::spawn_blocking(move || worker.run(storage_rx))
    };

    let consumer_task = {
        let consumer = Consumer {
            decoder: TickDecoder::new(Arc::clone(&directory)),
            cache: Arc::clone(&cache),
            coverage: CoverageTracker::new(universe.iter().map(|e| e.token), PROGRESS_EVERY),
            storage: Some(storage_tx),
            metrics: metrics.clone(),
        };
        tokio::spawn(consumer.run(ingress_rx))
    };

    let reader_task = tokio::spawn(read_feed(
        source,
        ingress_tx,
        conn_tx,
        metrics.clone(),
        cancel.clone(),
    ));

    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    info!(
        date = %today,
        instruments = directory.len(),
        universe = universe.len(),
        data_dir = %config.data_dir.display(),
        "Engine started"
    );

    Ok(EngineHandle {
        _shutdown: cancel.clone().drop_guard(),
        cancel,
        config,
        directory,
        cache,
        metrics,
        scheduler: scheduler_handle,
        connection: conn_rx,
        tasks: EngineTasks {
            reader: reader_task,
            consumer: consumer_task,
            scheduler: scheduler_task,
            storage: storage_task,
        },
    })
}

struct EngineTasks {
    reader: JoinHandle<()>,
    consumer: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    storage: JoinHandle<Result<(), StorageError>>,
}

/// Running engine. Dropping the handle cancels every task without waiting.
pub struct EngineHandle {
    _shutdown: DropGuard,
    cancel: CancellationToken,
    config: EngineConfig,
    directory: Arc<InstrumentDirectory>,
    cache: Arc<TickCache>,
    metrics: EngineMetrics,
    scheduler: SchedulerHandle,
    connection: watch::Receiver<ConnectionState>,
    tasks: EngineTasks,
}

impl EngineHandle {
    /// Latest cached tick for `exchange:symbol`, without waiting.
    pub fn latest_tick(&self, exchange: &str, symbol: &str) -> Result<Arc<Tick>, QueryError> {
        let key = instrument_key(exchange, symbol);
        if let Some(tick) = self.cache.get(&key) {
            return Ok(tick);
        }
        if self.directory.by_key(&key).is_none() {
            return Err(QueryError::UnknownInstrument { key });
        }
        Err(QueryError::NotFound { key })
    }

    /// Latest tick for `exchange:symbol`, subscribing on demand and polling
    /// the cache until the configured quote timeout when nothing is cached.
    pub async fn wait_for_tick(&self, exchange: &str, symbol: &str) -> Result<Arc<Tick>, QueryError> {
        let key = instrument_key(exchange, symbol);
        if let Some(tick) = self.cache.get(&key) {
            return Ok(tick);
        }
        let token = match self.directory.by_key(&key) {
            Some(instrument) => instrument.token,
            None => return Err(QueryError::UnknownInstrument { key }),
        };

        self.scheduler.request_subscription(token).await?;
        debug!(key = %key, token, "Waiting for on-demand tick");

        self.cache
            .wait_for(
                &key,
                self.config.quote_wait_timeout(),
                self.config.quote_poll_interval(),
                &self.cancel,
            )
            .await
            .ok_or(QueryError::NotFound { key })
    }

    /// Open the stored tick log for `date`.
    pub fn read_log(&self, date: NaiveDate) -> Result<TickLogReader, StorageError> {
        persistence::read_log(&self.config.data_dir, date)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache(&self) -> &Arc<TickCache> {
        &self.cache
    }

    pub fn directory(&self) -> &Arc<InstrumentDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether the transport last reported a live connection.
    pub fn is_connected(&self) -> bool {
        self.connection.borrow().connected
    }

    /// Cancel every task, drain queued messages into the cache and tick
    /// log, and flush storage.
    ///
    /// Returns the first storage failure seen while running, if any.
    pub async fn stop(self) -> Result<(), EngineError> {
        info!("Engine stopping");
        self.cancel.cancel();

        let EngineTasks {
            reader,
            consumer,
            scheduler,
            storage,
        } = self.tasks;

        reader
            .await
            .map_err(|_| EngineError::TaskPanicked { task: "reader" })?;
        scheduler
            .await
            .map_err(|_| EngineError::TaskPanicked { task: "scheduler" })?;
        // The consumer drains the ingress queue, then drops the storage
        // sender so the worker can flush and exit.
        consumer
            .await
            .map_err(|_| EngineError::TaskPanicked { task: "consumer" })?;
        storage
            .await
            .map_err(|_| EngineError::TaskPanicked { task: "storage" })??;

        let metrics = self.metrics.snapshot();
        info!(
            messages = metrics.messages_received,
            packets = metrics.packets_decoded,
            frames = metrics.frames_written,
            "Engine stopped"
        );
        Ok(())
    }
}

// ── Reader ──────────────────────────────────────────────────────────

async fn read_feed(
    mut source: Box<dyn FeedSource>,
    mut ingress: IngressSender,
    connection: watch::Sender<ConnectionState>,
    metrics: EngineMetrics,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = source.next_event() => event,
        };

        match event {
            None => {
                info!("Transport closed");
                break;
            }
            Some(FeedEvent::Connected) => {
                connection.send_modify(|state| *state = state.connect());
                info!(epoch = connection.borrow().epoch, "Transport connected");
            }
            Some(FeedEvent::Disconnected) => {
                warn!("Transport disconnected");
                connection.send_modify(|state| *state = state.disconnect());
            }
            Some(FeedEvent::Message(message)) => {
                metrics.inc_messages_received();
                let pushed = tokio::select! {
                    _ = cancel.cancelled() => break,
                    pushed = ingress.push(message) => pushed,
                };
                if pushed.is_err() {
                    warn!("Consumer gone, reader exiting");
                    break;
                }
            }
        }
    }
    connection.send_modify(|state| *state = state.disconnect());
    debug!(dropped = ingress.dropped(), "Feed reader stopped");
}

// ── Consumer ────────────────────────────────────────────────────────

struct Consumer {
    decoder: TickDecoder,
    cache: Arc<TickCache>,
    coverage: CoverageTracker,
    /// `None` once the storage worker has stopped.
    storage: Option<mpsc::Sender<Vec<Tick>>>,
    metrics: EngineMetrics,
}

impl Consumer {
    async fn run(mut self, mut ingress: IngressReceiver) {
        while let Some(message) = ingress.recv().await {
            self.handle_message(&message).await;
        }
        debug!("Consumer drained");
    }

    async fn handle_message(&mut self, message: &[u8]) {
        let decoded = self.decoder.decode_message(message);
        let stats = decoded.stats;
        self.metrics
            .record_decode(stats.decoded as u64, stats.skipped as u64, stats.truncated);
        if decoded.ticks.is_empty() {
            return;
        }

        let directory = self.decoder.directory();
        for tick in &decoded.ticks {
            self.coverage.observe(tick.token);
            self.cache.set(directory.cache_keys(tick.token), tick.clone());
        }
        self.metrics.inc_ticks_cached(decoded.ticks.len() as u64);

        if let Some(storage) = &self.storage {
            if storage.send(decoded.ticks).await.is_err() {
                warn!("Storage worker stopped, continuing cache-only");
                self.storage = None;
            }
        }
    }
}

// ── Storage worker ──────────────────────────────────────────────────

struct StorageWorker {
    writer: TickLogWriter,
    config: StorageConfig,
    clock: Arc<dyn Clock>,
    directory: Arc<InstrumentDirectory>,
    metrics: EngineMetrics,
}

impl StorageWorker {
    /// Blocking loop: one frame per received batch, rolling to a new date's
    /// files when the venue date changes.
    fn run(mut self, mut rx: mpsc::Receiver<Vec<Tick>>) -> Result<(), StorageError> {
        while let Some(batch) = rx.blocking_recv() {
            if let Err(e) = self.write(&batch) {
                error!(
                    path = %self.writer.current_file_path().display(),
                    error = %e,
                    "Tick log write failed, storage disabled"
                );
                self.metrics.inc_storage_failures();
                return Err(e);
            }
        }

        self.writer.sync()?;
        info!(
            frames = self.writer.frames_written(),
            bytes = self.writer.bytes_written(),
            "Tick log flushed"
        );
        Ok(())
    }

    fn write(&mut self, batch: &[Tick]) -> Result<(), StorageError> {
        let today = self.clock.today();
        if self.writer.roll_to(today)? {
            write_instrument_map(&self.config, today, self.directory.instruments())?;
        }
        let bytes = self.writer.append(batch)?;
        if bytes > 0 {
            self.metrics.record_frame_written(bytes);
        }
        Ok(())
    }
}
