//! Date-stamped file naming.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// `chrono` format for the `YYYYMMDD` stamp in file names.
pub const DATE_FORMAT: &str = "%Y%m%d";

pub fn date_stamp(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date_stamp(stamp: &str) -> Result<NaiveDate, StorageError> {
    if stamp.len() != 8 {
        return Err(StorageError::InvalidDate(stamp.to_string()));
    }
    NaiveDate::parse_from_str(stamp, DATE_FORMAT)
        .map_err(|_| StorageError::InvalidDate(stamp.to_string()))
}

pub fn tick_log_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("market_data_{}.log", date_stamp(date)))
}

pub fn instrument_map_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("map_{}.snapshot", date_stamp(date)))
}
