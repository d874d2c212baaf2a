//! Engine configuration
//!
//! Rotation interval and batch size are required; everything else has a
//! default. `validate` runs before any task is spawned.

use std::path::PathBuf;
use std::time::Duration;

use persistence::{FlushPolicy, FsyncPolicy, StorageConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backpressure::BackpressurePolicy;

pub const ENV_ROTATION_INTERVAL: &str = "FEED_ROTATION_INTERVAL_SECS";
pub const ENV_INSTRUMENTS_PER_BATCH: &str = "FEED_INSTRUMENTS_PER_BATCH";
pub const ENV_DATA_DIR: &str = "FEED_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("cannot parse {name}={value:?}")]
    Unparsable { name: &'static str, value: String },

    #[error("rotation interval must be a positive number of seconds, got {0}")]
    InvalidRotationInterval(f64),

    #[error("instruments per batch must be positive")]
    InvalidBatchSize,

    #[error("{name} must be positive")]
    ZeroCapacity { name: &'static str },

    #[error("compression level {0} is outside 1..=22")]
    InvalidCompressionLevel(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds each batch stays subscribed.
    pub rotation_interval_secs: f64,
    /// Tokens per rotation batch.
    pub instruments_per_batch: usize,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
    #[serde(default = "default_storage_queue_capacity")]
    pub storage_queue_capacity: usize,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    #[serde(default = "default_quote_wait_timeout_ms")]
    pub quote_wait_timeout_ms: u64,
    #[serde(default = "default_quote_poll_interval_ms")]
    pub quote_poll_interval_ms: u64,
    #[serde(default = "default_flush_policy")]
    pub flush_policy: FlushPolicy,
    #[serde(default = "default_fsync_policy")]
    pub fsync_policy: FsyncPolicy,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./binary")
}

fn default_ingress_capacity() -> usize {
    4096
}

fn default_storage_queue_capacity() -> usize {
    1024
}

fn default_compression_level() -> i32 {
    3
}

fn default_quote_wait_timeout_ms() -> u64 {
    5000
}

fn default_quote_poll_interval_ms() -> u64 {
    100
}

fn default_flush_policy() -> FlushPolicy {
    FlushPolicy::EveryWrite
}

fn default_fsync_policy() -> FsyncPolicy {
    FsyncPolicy::OnRotation
}

impl EngineConfig {
    /// Config with the two required settings and defaults for the rest.
    pub fn new(rotation_interval_secs: f64, instruments_per_batch: usize) -> Self {
        Self {
            rotation_interval_secs,
            instruments_per_batch,
            data_dir: default_data_dir(),
            ingress_capacity: default_ingress_capacity(),
            storage_queue_capacity: default_storage_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            compression_level: default_compression_level(),
            quote_wait_timeout_ms: default_quote_wait_timeout_ms(),
            quote_poll_interval_ms: default_quote_poll_interval_ms(),
            flush_policy: default_flush_policy(),
            fsync_policy: default_fsync_policy(),
        }
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary name → value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let interval_raw = lookup(ENV_ROTATION_INTERVAL).ok_or(ConfigError::Missing(ENV_ROTATION_INTERVAL))?;
        let rotation_interval_secs: f64 =
            interval_raw.trim().parse().map_err(|_| ConfigError::Unparsable {
                name: ENV_ROTATION_INTERVAL,
                value: interval_raw.clone(),
            })?;

        let batch_raw =
            lookup(ENV_INSTRUMENTS_PER_BATCH).ok_or(ConfigError::Missing(ENV_INSTRUMENTS_PER_BATCH))?;
        let instruments_per_batch: usize =
            batch_raw.trim().parse().map_err(|_| ConfigError::Unparsable {
                name: ENV_INSTRUMENTS_PER_BATCH,
                value: batch_raw.clone(),
            })?;

        let mut config = Self::new(rotation_interval_secs, instruments_per_batch);
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rotation_interval_secs.is_finite() || self.rotation_interval_secs <= 0.0 {
            return Err(ConfigError::InvalidRotationInterval(self.rotation_interval_secs));
        }
        if self.instruments_per_batch == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.ingress_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "ingress_capacity",
            });
        }
        if self.storage_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "storage_queue_capacity",
            });
        }
        if self.quote_poll_interval_ms == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "quote_poll_interval_ms",
            });
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::InvalidCompressionLevel(self.compression_level));
        }
        if let FlushPolicy::EveryN(0) = self.flush_policy {
            return Err(ConfigError::ZeroCapacity {
                name: "flush_policy",
            });
        }
        if let FsyncPolicy::EveryN(0) = self.fsync_policy {
            return Err(ConfigError::ZeroCapacity {
                name: "fsync_policy",
            });
        }
        Ok(())
    }

    /// Rotation interval as a `Duration`. Call after `validate`.
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rotation_interval_secs)
    }

    pub fn quote_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_wait_timeout_ms)
    }

    pub fn quote_poll_interval(&self) -> Duration {
        Duration::from_millis(self.quote_poll_interval_ms)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            dir: self.data_dir.clone(),
            compression_level: self.compression_level,
            flush_policy: self.flush_policy,
            fsync_policy: self.fsync_policy,
        }
    }
}
