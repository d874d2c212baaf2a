//! Tick Log Writer
//!
//! Append-only, date-partitioned and compressed.
//!
//! Each `append` call becomes exactly one frame holding the batch of ticks
//! decoded from one inbound message. The whole frame is written with a
//! single `write_all`, and the file is opened in append mode so existing
//! frames are never rewritten.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use types::tick::Tick;

use crate::error::StorageError;
use crate::frame::{encode_record, FrameReader, StreamEnd};
use crate::paths::tick_log_path;

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush after every frame.
    EveryWrite,
    /// Flush every N frames.
    EveryN(usize),
}

/// Controls when `fsync` (durable write) is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Fsync after every frame.
    EveryWrite,
    /// Fsync every N frames.
    EveryN(usize),
    /// Fsync only on date rollover and shutdown.
    OnRotation,
}

// ── Storage Configuration ───────────────────────────────────────────

/// Configuration shared by the tick log and instrument-map writers.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding all date-stamped files.
    pub dir: PathBuf,
    /// zstd compression level.
    pub compression_level: i32,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl StorageConfig {
    /// Create a config with sensible defaults.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compression_level: 3,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::OnRotation,
        }
    }
}

// ── Tick Log Writer ─────────────────────────────────────────────────

pub struct TickLogWriter {
    config: StorageConfig,
    date: NaiveDate,
    current_file: PathBuf,
    writer: BufWriter<File>,
    frames_written: u64,
    bytes_written: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
}

impl TickLogWriter {
    /// Open (or continue) the tick log for `date`, creating the directory if needed.
    pub fn open(config: StorageConfig, date: NaiveDate) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.dir)?;
        let current_file = tick_log_path(&config.dir, date);
        let writer = Self::open_append(&current_file)?;

        info!(path = %current_file.display(), "Tick log opened");

        Ok(Self {
            config,
            date,
            current_file,
            writer,
            frames_written: 0,
            bytes_written: 0,
            writes_since_flush: 0,
            writes_since_fsync: 0,
        })
    }

    /// Append one batch of ticks as a single frame.
    ///
    /// Empty batches write nothing. Returns the number of bytes appended.
    pub fn append(&mut self, ticks: &[Tick]) -> Result<u64, StorageError> {
        if ticks.is_empty() {
            return Ok(0);
        }

        let frame = encode_record(ticks, self.config.compression_level)?;
        self.writer.write_all(&frame)?;

        let written = frame.len() as u64;
        self.frames_written += 1;
        self.bytes_written += written;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;

        debug!(ticks = ticks.len(), bytes = written, "Frame appended");
        Ok(written)
    }

    /// Switch to `date`'s log if it differs from the current one.
    ///
    /// Returns `true` when a new file was opened.
    pub fn roll_to(&mut self, date: NaiveDate) -> Result<bool, StorageError> {
        if date == self.date {
            return Ok(false);
        }

        self.sync()?;
        let next_file = tick_log_path(&self.config.dir, date);
        self.writer = Self::open_append(&next_file)?;

        info!(
            from = %self.current_file.display(),
            to = %next_file.display(),
            "Tick log rolled over"
        );

        self.current_file = next_file;
        self.date = date;
        Ok(true)
    }

    /// Force flush + fsync (used before shutdown / rollover).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    pub fn current_date(&self) -> NaiveDate {
        self.date
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Frames written since this writer was opened.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Bytes written since this writer was opened.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn open_append(path: &Path) -> Result<BufWriter<File>, StorageError> {
        trim_torn_tail(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn apply_flush_policy(&mut self) -> Result<(), StorageError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), StorageError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }
}

/// Cut a partial trailing frame left by an interrupted write so frames
/// appended after a restart stay readable.
///
/// Returns the number of bytes removed. A corrupt frame earlier in the file
/// is left in place.
fn trim_torn_tail(path: &Path) -> Result<u64, StorageError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut frames = FrameReader::new(BufReader::new(file));
    loop {
        match frames.next_payload() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(StorageError::CorruptFrame { offset, detail }) => {
                warn!(path = %path.display(), offset, %detail, "Tick log has a corrupt frame");
                return Ok(0);
            }
            Err(e) => return Err(e),
        }
    }

    match frames.stream_end() {
        Some(StreamEnd::TruncatedTail(bytes)) => {
            let keep = frames.offset();
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(keep)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                trailing_bytes = bytes,
                kept = keep,
                "Removed truncated trailing frame before appending"
            );
            Ok(bytes)
        }
        _ => Ok(0),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
