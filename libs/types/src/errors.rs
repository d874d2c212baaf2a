//! Error types shared by the feed services
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised while building the instrument directory.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Duplicate instrument token {token}: {first} and {second}")]
    DuplicateToken {
        token: u32,
        first: String,
        second: String,
    },

    #[error("Duplicate instrument key: {key}")]
    DuplicateKey { key: String },

    #[error("Instrument has an empty trading symbol (token {token})")]
    EmptySymbol { token: u32 },
}
