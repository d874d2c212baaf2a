//! Decoded market-data ticks
//!
//! A tick is built completely by the decoder and then published as an
//! immutable value. The venue sends several packet shapes that share a
//! token and last price; the shape-specific fields live in [`TickPayload`],
//! a tagged variant that carries only the fields its shape defines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::numeric::Price;

/// Packet shape, selected by the number of 32-bit fields in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// token, last price
    LtpOnly,
    /// + high, low, open, close, exchange timestamp
    QuoteNoChange,
    /// + high, low, open, close, price change, exchange timestamp
    QuoteWithChange,
    /// + traded quantity/price/volume, buy/sell totals, high, low, open, close
    QuoteFull,
    /// + everything in `QuoteFull`, last trade time, open interest, exchange timestamp
    FullWithOi,
}

impl PacketKind {
    /// Map a decoded header field count to its packet shape.
    pub fn from_field_count(count: usize) -> Option<Self> {
        match count {
            2 => Some(PacketKind::LtpOnly),
            7 => Some(PacketKind::QuoteNoChange),
            8 => Some(PacketKind::QuoteWithChange),
            11 => Some(PacketKind::QuoteFull),
            16 => Some(PacketKind::FullWithOi),
            _ => None,
        }
    }

    /// Number of header fields this shape carries.
    pub const fn field_count(&self) -> usize {
        match self {
            PacketKind::LtpOnly => 2,
            PacketKind::QuoteNoChange => 7,
            PacketKind::QuoteWithChange => 8,
            PacketKind::QuoteFull => 11,
            PacketKind::FullWithOi => 16,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PacketKind::LtpOnly => "ltp",
            PacketKind::QuoteNoChange => "quote_no_change",
            PacketKind::QuoteWithChange => "quote_with_change",
            PacketKind::QuoteFull => "quote_full",
            PacketKind::FullWithOi => "full_with_oi",
        };
        f.write_str(label)
    }
}

/// Session open/high/low/close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

/// Traded-volume statistics carried by quote and full packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStats {
    pub last_traded_quantity: u32,
    pub average_traded_price: Price,
    pub volume_traded: u32,
    pub total_buy_quantity: u32,
    pub total_sell_quantity: u32,
}

/// Open interest with its intraday range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub oi: u32,
    pub oi_high: u32,
    pub oi_low: u32,
}

/// Shape-specific tick fields.
///
/// Timestamps are venue-reported Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPayload {
    LtpOnly,
    QuoteNoChange {
        ohlc: Ohlc,
        exchange_timestamp: u32,
    },
    QuoteWithChange {
        ohlc: Ohlc,
        price_change: i32,
        exchange_timestamp: u32,
    },
    QuoteFull {
        trade: TradeStats,
        ohlc: Ohlc,
    },
    FullWithOi {
        trade: TradeStats,
        ohlc: Ohlc,
        last_traded_timestamp: u32,
        open_interest: OpenInterest,
        exchange_timestamp: u32,
    },
}

impl TickPayload {
    pub fn kind(&self) -> PacketKind {
        match self {
            TickPayload::LtpOnly => PacketKind::LtpOnly,
            TickPayload::QuoteNoChange { .. } => PacketKind::QuoteNoChange,
            TickPayload::QuoteWithChange { .. } => PacketKind::QuoteWithChange,
            TickPayload::QuoteFull { .. } => PacketKind::QuoteFull,
            TickPayload::FullWithOi { .. } => PacketKind::FullWithOi,
        }
    }
}

/// One aggregated price level of the depth ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: u32,
    pub orders: u16,
}

/// Buy and sell ladders, best level first as sent by the venue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    pub buy: Vec<DepthLevel>,
    pub sell: Vec<DepthLevel>,
}

impl Depth {
    pub fn is_empty(&self) -> bool {
        self.buy.is_empty() && self.sell.is_empty()
    }

    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.buy.first()
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.sell.first()
    }
}

/// One decoded market-data update for a single instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub token: u32,
    pub last_price: Price,
    pub payload: TickPayload,
    /// Lot size from the instrument directory; `None` for unknown tokens.
    pub lot_size: Option<u32>,
    pub depth: Depth,
}

impl Tick {
    /// Last-price-only tick with an empty ladder.
    pub fn ltp(token: u32, last_price: Price) -> Self {
        Self {
            token,
            last_price,
            payload: TickPayload::LtpOnly,
            lot_size: None,
            depth: Depth::default(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.payload.kind()
    }

    pub fn ohlc(&self) -> Option<&Ohlc> {
        match &self.payload {
            TickPayload::LtpOnly => None,
            TickPayload::QuoteNoChange { ohlc, .. }
            | TickPayload::QuoteWithChange { ohlc, .. }
            | TickPayload::QuoteFull { ohlc, .. }
            | TickPayload::FullWithOi { ohlc, .. } => Some(ohlc),
        }
    }

    pub fn trade_stats(&self) -> Option<&TradeStats> {
        match &self.payload {
            TickPayload::QuoteFull { trade, .. } | TickPayload::FullWithOi { trade, .. } => {
                Some(trade)
            }
            _ => None,
        }
    }

    pub fn open_interest(&self) -> Option<&OpenInterest> {
        match &self.payload {
            TickPayload::FullWithOi { open_interest, .. } => Some(open_interest),
            _ => None,
        }
    }

    pub fn price_change(&self) -> Option<i32> {
        match &self.payload {
            TickPayload::QuoteWithChange { price_change, .. } => Some(*price_change),
            _ => None,
        }
    }

    /// Raw exchange timestamp (Unix seconds), when the shape carries one.
    pub fn exchange_timestamp(&self) -> Option<u32> {
        match &self.payload {
            TickPayload::QuoteNoChange {
                exchange_timestamp, ..
            }
            | TickPayload::QuoteWithChange {
                exchange_timestamp, ..
            }
            | TickPayload::FullWithOi {
                exchange_timestamp, ..
            } => Some(*exchange_timestamp),
            _ => None,
        }
    }

    pub fn last_traded_timestamp(&self) -> Option<u32> {
        match &self.payload {
            TickPayload::FullWithOi {
                last_traded_timestamp,
                ..
            } => Some(*last_traded_timestamp),
            _ => None,
        }
    }

    /// Exchange timestamp as a UTC instant.
    pub fn exchange_time(&self) -> Option<DateTime<Utc>> {
        self.exchange_timestamp()
            .and_then(|secs| DateTime::from_timestamp(i64::from(secs), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_field_count() {
        assert_eq!(PacketKind::from_field_count(2), Some(PacketKind::LtpOnly));
        assert_eq!(PacketKind::from_field_count(7), Some(PacketKind::QuoteNoChange));
        assert_eq!(PacketKind::from_field_count(8), Some(PacketKind::QuoteWithChange));
        assert_eq!(PacketKind::from_field_count(11), Some(PacketKind::QuoteFull));
        assert_eq!(PacketKind::from_field_count(16), Some(PacketKind::FullWithOi));
        for n in [0, 1, 3, 6, 9, 10, 12, 15, 17] {
            assert_eq!(PacketKind::from_field_count(n), None, "count {}", n);
        }
    }

    #[test]
    fn test_field_count_inverse() {
        for kind in [
            PacketKind::LtpOnly,
            PacketKind::QuoteNoChange,
            PacketKind::QuoteWithChange,
            PacketKind::QuoteFull,
            PacketKind::FullWithOi,
        ] {
            assert_eq!(PacketKind::from_field_count(kind.field_count()), Some(kind));
        }
    }

    #[test]
    fn test_accessors_follow_payload() {
        let mut tick = Tick::ltp(1, Price::from_raw(100));
        assert!(tick.ohlc().is_none());
        assert!(tick.exchange_timestamp().is_none());

        tick.payload = TickPayload::QuoteWithChange {
            ohlc: Ohlc::default(),
            price_change: -25,
            exchange_timestamp: 1_700_000_000,
        };
        assert_eq!(tick.kind(), PacketKind::QuoteWithChange);
        assert_eq!(tick.price_change(), Some(-25));
        assert_eq!(tick.exchange_time().unwrap().timestamp(), 1_700_000_000);
        assert!(tick.trade_stats().is_none());
    }

    #[test]
    fn test_depth_best_levels() {
        let depth = Depth {
            buy: vec![DepthLevel {
                price: Price::from_raw(99),
                quantity: 10,
                orders: 2,
            }],
            sell: vec![],
        };
        assert!(!depth.is_empty());
        assert_eq!(depth.best_bid().unwrap().price.raw(), 99);
        assert!(depth.best_ask().is_none());
    }

    #[test]
    fn test_tick_json_shape() {
        let tick = Tick::ltp(256265, Price::from_raw(2_450_000));
        let json = serde_json::to_value(&tick).unwrap();
        assert_eq!(json["token"], 256265);
        assert_eq!(json["last_price"], 2_450_000);
        assert_eq!(json["payload"], "LtpOnly");
    }
}
