//! Instrument-map snapshot
//!
//! One frame per trading day.
//!
//! The day's token → instrument mapping is written once at startup (and
//! again on date rollover) so a stored tick log can be labelled offline
//! without access to the venue.
//!
//! Writes are atomic: the frame goes to a `.tmp` sibling, is fsynced, and
//! is renamed over the final path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use types::instrument::Instrument;

use crate::error::StorageError;
use crate::frame::{decode_record, encode_record, FrameReader};
use crate::paths::instrument_map_path;
use crate::writer::StorageConfig;

/// Current instrument-map format version.
pub const INSTRUMENT_MAP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMap {
    pub version: u32,
    pub instruments: Vec<Instrument>,
}

/// Write `map_<date>.snapshot`, replacing any earlier snapshot for the day.
pub fn write_instrument_map(
    config: &StorageConfig,
    date: NaiveDate,
    instruments: &[Instrument],
) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(&config.dir)?;

    let map = InstrumentMap {
        version: INSTRUMENT_MAP_VERSION,
        instruments: instruments.to_vec(),
    };
    let frame = encode_record(&map, config.compression_level)?;

    let path = instrument_map_path(&config.dir, date);
    let tmp_path = path.with_extension("snapshot.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&frame)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;

    info!(
        path = %path.display(),
        instruments = instruments.len(),
        bytes = frame.len(),
        "Instrument map written"
    );
    Ok(path)
}

/// Read the instrument map stored for `date`.
pub fn read_instrument_map(dir: &Path, date: NaiveDate) -> Result<Vec<Instrument>, StorageError> {
    let path = instrument_map_path(dir, date);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound { path });
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = FrameReader::new(BufReader::new(file));
    let payload = reader.next_payload()?.ok_or_else(|| StorageError::CorruptFrame {
        offset: 0,
        detail: "instrument map holds no complete frame".to_string(),
    })?;
    let map: InstrumentMap = decode_record(&payload, 0)?;

    if map.version > INSTRUMENT_MAP_VERSION {
        return Err(StorageError::CorruptFrame {
            offset: 0,
            detail: format!("unsupported instrument map version {}", map.version),
        });
    }
    Ok(map.instruments)
}
