//! Tick Log Reader
//!
//! Lazy, finite, restartable replay of one day's frames.
//!
//! Features:
//! - Frame-at-a-time reading; only one frame is decompressed at once
//! - A truncated trailing frame ends the stream without error
//! - Undecodable frames surface `CorruptFrame` with the frame's byte offset,
//!   after which the reader yields nothing more
//! - `rewind` restarts from the first frame, so a file can be replayed
//!   repeatedly with identical results

use chrono::NaiveDate;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;
use types::tick::Tick;

use crate::error::StorageError;
use crate::frame::{decode_record, FrameReader, StreamEnd};
use crate::paths::tick_log_path;

/// Open the tick log stored for `date` under `dir`.
pub fn read_log(dir: &Path, date: NaiveDate) -> Result<TickLogReader, StorageError> {
    TickLogReader::open_path(tick_log_path(dir, date))
}

pub struct TickLogReader {
    path: PathBuf,
    frames: FrameReader<BufReader<File>>,
    pending: VecDeque<Tick>,
    frames_read: u64,
    ticks_read: u64,
    /// Set once an error has been yielded by the iterator.
    halted: bool,
    tail_reported: bool,
}

impl TickLogReader {
    pub fn open(dir: &Path, date: NaiveDate) -> Result<Self, StorageError> {
        Self::open_path(tick_log_path(dir, date))
    }

    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound { path });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            frames: FrameReader::new(BufReader::new(file)),
            pending: VecDeque::new(),
            frames_read: 0,
            ticks_read: 0,
            halted: false,
            tail_reported: false,
        })
    }

    /// Read the next frame's batch of ticks.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Tick>>, StorageError> {
        loop {
            let payload = match self.frames.next_payload()? {
                Some(payload) => payload,
                None => {
                    if let Some(StreamEnd::TruncatedTail(bytes)) = self.frames.stream_end() {
                        if !self.tail_reported {
                            self.tail_reported = true;
                            warn!(
                                path = %self.path.display(),
                                trailing_bytes = bytes,
                                "Ignoring truncated trailing frame"
                            );
                        }
                    }
                    return Ok(None);
                }
            };
            let batch: Vec<Tick> = decode_record(&payload, self.frames.last_frame_offset())?;
            self.frames_read += 1;
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
        }
    }

    /// Read the next tick, crossing frame boundaries as needed.
    pub fn next_tick(&mut self) -> Result<Option<Tick>, StorageError> {
        if self.pending.is_empty() {
            match self.next_batch()? {
                Some(batch) => self.pending.extend(batch),
                None => return Ok(None),
            }
        }
        let tick = self.pending.pop_front();
        if tick.is_some() {
            self.ticks_read += 1;
        }
        Ok(tick)
    }

    /// Read every remaining tick.
    pub fn read_all(&mut self) -> Result<Vec<Tick>, StorageError> {
        let mut ticks = Vec::new();
        while let Some(tick) = self.next_tick()? {
            ticks.push(tick);
        }
        Ok(ticks)
    }

    /// Restart reading from the first frame.
    pub fn rewind(&mut self) -> Result<(), StorageError> {
        self.frames.get_mut().seek(SeekFrom::Start(0))?;
        self.frames.reset();
        self.pending.clear();
        self.frames_read = 0;
        self.ticks_read = 0;
        self.halted = false;
        self.tail_reported = false;
        Ok(())
    }

    /// How the file ended, once the end has been reached.
    pub fn stream_end(&self) -> Option<StreamEnd> {
        self.frames.stream_end()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn ticks_read(&self) -> u64 {
        self.ticks_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for TickLogReader {
    type Item = Result<Tick, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        match self.next_tick() {
            Ok(Some(tick)) => Some(Ok(tick)),
            Ok(None) => None,
            Err(e) => {
                self.halted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::writer::{StorageConfig, TickLogWriter};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;
    use types::numeric::Price;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 5).unwrap()
    }

    fn batch(start: u32, n: u32) -> Vec<Tick> {
        (start..start + n)
            .map(|t| Tick::ltp(t, Price::from_raw(t * 10)))
            .collect()
    }

    fn write_batches(dir: &Path, batches: &[Vec<Tick>]) {
        let mut writer = TickLogWriter::open(StorageConfig::new(dir), date()).unwrap();
        for b in batches {
            writer.append(b).unwrap();
        }
        writer.sync().unwrap();
    }

    #[test]
    fn test_truncated_tail_reported_once_per_pass() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[batch(1, 2)]);
        let path = tick_log_path(tmp.path(), date());
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0, 0, 0])
            .unwrap();

        let mut reader = read_log(tmp.path(), date()).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 2);
        assert!(reader.tail_reported);
        assert!(reader.next_batch().unwrap().is_none());
        assert!(reader.next().is_none());
        assert_eq!(reader.stream_end(), Some(StreamEnd::TruncatedTail(3)));

        reader.rewind().unwrap();
        assert!(!reader.tail_reported);
        assert_eq!(reader.read_all().unwrap().len(), 2);
        assert!(reader.tail_reported);
    }

    #[test]
    fn test_reads_ticks_across_frames() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[batch(1, 3), batch(10, 2)]);

        let mut reader = read_log(tmp.path(), date()).unwrap();
        let tokens: Vec<u32> = reader.by_ref().map(|t| t.unwrap().token).collect();
        assert_eq!(tokens, vec![1, 2, 3, 10, 11]);
        assert_eq!(reader.frames_read(), 2);
        assert_eq!(reader.ticks_read(), 5);
        assert_eq!(reader.stream_end(), Some(StreamEnd::Clean));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            read_log(tmp.path(), date()),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rewind_replays_identically() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[batch(1, 4), batch(5, 4)]);

        let mut reader = read_log(tmp.path(), date()).unwrap();
        let first = reader.read_all().unwrap();
        assert!(reader.next_tick().unwrap().is_none());

        reader.rewind().unwrap();
        let second = reader.read_all().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
    }

    #[test]
    fn test_corrupt_frame_stops_iteration() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[batch(1, 2)]);

        let path = tick_log_path(tmp.path(), date());
        let good_len = fs::metadata(&path).unwrap().len();
        // A well-formed zstd frame whose payload is not a tick batch
        let bogus = encode_frame(&[0xFF; 3], 3).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&bogus).unwrap();
        file.write_all(&encode_frame(b"never read", 3).unwrap()).unwrap();
        drop(file);

        let mut reader = read_log(tmp.path(), date()).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().token, 1);
        assert_eq!(reader.next().unwrap().unwrap().token, 2);
        match reader.next() {
            Some(Err(StorageError::CorruptFrame { offset, .. })) => assert_eq!(offset, good_len),
            other => panic!("Expected CorruptFrame, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_tail_is_benign() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[batch(1, 2), batch(3, 2)]);

        let path = tick_log_path(tmp.path(), date());
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();

        let mut reader = read_log(tmp.path(), date()).unwrap();
        let ticks = reader.read_all().unwrap();
        assert_eq!(ticks.len(), 2);
        assert!(matches!(reader.stream_end(), Some(StreamEnd::TruncatedTail(_))));
    }
}
