//! Tick Log Persistence Service
//!
//! Durably stores the decoded tick stream as a compressed, date-partitioned,
//! append-only log and replays it offline.
//!
//! # On-disk layout
//! ```text
//! <data_dir>/map_<YYYYMMDD>.snapshot      one frame: the day's instrument map
//! <data_dir>/market_data_<YYYYMMDD>.log   frames in arrival order
//!
//! frame := [compressed_len: u64 big-endian][zstd(bincode(record))]
//! ```
//!
//! Files are only ever appended to. A reader stops cleanly at a truncated
//! trailing frame and reports anything else it cannot decode as corruption.

pub mod error;
pub mod frame;
pub mod paths;
pub mod writer;
pub mod reader;
pub mod snapshot;

pub use error::StorageError;
pub use reader::{read_log, TickLogReader};
pub use snapshot::{read_instrument_map, write_instrument_map};
pub use writer::{FlushPolicy, FsyncPolicy, StorageConfig, TickLogWriter};
