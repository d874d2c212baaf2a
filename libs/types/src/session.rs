//! Trading-session windows
//!
//! Each market segment accepts live data only inside a venue-local
//! wall-clock window. Windows are compared at minute granularity and are
//! inclusive at both ends, so 15:30:59 is still inside the equity session.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue clock offset from UTC (+05:30, no daylight saving).
pub const VENUE_UTC_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// The venue's fixed UTC offset.
pub fn venue_offset() -> FixedOffset {
    FixedOffset::east_opt(VENUE_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Convert any timestamp to the venue-local clock.
pub fn to_venue_time<Tz: TimeZone>(ts: &DateTime<Tz>) -> DateTime<FixedOffset> {
    ts.with_timezone(&venue_offset())
}

/// Market segment groups that share a trading window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketSession {
    /// Cash equities, indices and equity derivatives: 09:15–15:30.
    Equity,
    /// Commodity derivatives: 09:00–23:30.
    Commodity,
}

impl MarketSession {
    /// Opening and closing minute of the session as `(hour, minute)` pairs.
    pub const fn bounds(&self) -> ((u32, u32), (u32, u32)) {
        match self {
            MarketSession::Equity => ((9, 15), (15, 30)),
            MarketSession::Commodity => ((9, 0), (23, 30)),
        }
    }

    /// Session window as venue-local times.
    pub fn window(&self) -> (NaiveTime, NaiveTime) {
        let ((oh, om), (ch, cm)) = self.bounds();
        (
            NaiveTime::from_hms_opt(oh, om, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(ch, cm, 0).unwrap_or(NaiveTime::MIN),
        )
    }

    /// Whether a venue-local time of day falls inside the session.
    pub fn contains_time(&self, time: NaiveTime) -> bool {
        let ((oh, om), (ch, cm)) = self.bounds();
        let minute = time.hour() * 60 + time.minute();
        oh * 60 + om <= minute && minute <= ch * 60 + cm
    }

    /// Whether an instant falls inside the session on the venue clock.
    pub fn is_open_at<Tz: TimeZone>(&self, ts: &DateTime<Tz>) -> bool {
        self.contains_time(to_venue_time(ts).time())
    }

    /// Classify an instrument's segment/exchange pair.
    pub fn for_segment(exchange: &str, segment: &str) -> Self {
        if exchange.starts_with("MCX") || segment.starts_with("MCX") {
            MarketSession::Commodity
        } else {
            MarketSession::Equity
        }
    }
}

impl fmt::Display for MarketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketSession::Equity => write!(f, "equity"),
            MarketSession::Commodity => write!(f, "commodity"),
        }
    }
}
