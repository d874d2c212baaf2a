use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Storage file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Corrupt frame at byte offset {offset}: {detail}")]
    CorruptFrame { offset: u64, detail: String },

    #[error("Invalid date stamp {0:?}, expected YYYYMMDD")]
    InvalidDate(String),
}
