//! Binary tick protocol decoder
//!
//! # Wire format (all integers big-endian)
//! ```text
//! message := [packet_count: u16] packet*
//! packet  := [len: u16] payload[len]
//! payload := header[min(64, len)] depth?
//! header  := u32 fields; the field count selects the packet shape
//! depth   := ([quantity: u32][price: u32][orders: u16][pad: u16])*
//! ```
//!
//! | fields | shape |
//! |---|---|
//! | 2  | token, ltp |
//! | 7  | + high, low, open, close, exchange_ts |
//! | 8  | + high, low, open, close, price_change, exchange_ts |
//! | 11 | + ltq, atp, volume, total_buy, total_sell, high, low, open, close |
//! | 16 | + ltq, atp, volume, total_buy, total_sell, high, low, open, close, ltt, oi, oi_high, oi_low, exchange_ts |
//!
//! The decoder is stateless apart from the shared, read-only instrument
//! directory used for lot-size enrichment. Malformed input never panics:
//! unknown shapes are skipped and a packet that overruns its message ends
//! decoding of that message.

use std::sync::Arc;

use tracing::{debug, warn};
use types::instrument::InstrumentDirectory;
use types::numeric::Price;
use types::tick::{
    Depth, DepthLevel, Ohlc, OpenInterest, PacketKind, Tick, TickPayload, TradeStats,
};

/// Bytes of fixed header decoded as numeric fields.
pub const HEADER_LEN: usize = 64;
/// Width of one header field.
pub const FIELD_LEN: usize = 4;
/// Width of one depth ladder entry.
pub const DEPTH_ENTRY_LEN: usize = 12;

/// Per-message decode summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Packets announced by the message header.
    pub announced: usize,
    pub decoded: usize,
    /// Packets with an unrecognised field count.
    pub skipped: usize,
    /// The message ended before all announced packets were read.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    pub ticks: Vec<Tick>,
    pub stats: DecodeStats,
}

#[derive(Debug, Clone)]
pub struct TickDecoder {
    directory: Arc<InstrumentDirectory>,
}

impl TickDecoder {
    pub fn new(directory: Arc<InstrumentDirectory>) -> Self {
        Self { directory }
    }

    /// Decode every packet in one inbound message.
    pub fn decode_message(&self, message: &[u8]) -> DecodedMessage {
        let mut out = DecodedMessage::default();

        let Some(count) = read_u16(message, 0) else {
            if !message.is_empty() {
                debug!(len = message.len(), "Message shorter than packet count");
                out.stats.truncated = true;
            }
            return out;
        };
        out.stats.announced = usize::from(count);

        let mut offset = 2;
        for index in 0..out.stats.announced {
            let Some(len) = read_u16(message, offset) else {
                warn!(index, offset, "Packet length prefix overruns message");
                out.stats.truncated = true;
                break;
            };
            let start = offset + 2;
            let end = start + usize::from(len);
            if end > message.len() {
                warn!(
                    index,
                    declared = len,
                    available = message.len() - start,
                    "Packet overruns message"
                );
                out.stats.truncated = true;
                break;
            }

            match self.decode_packet(&message[start..end]) {
                Some(tick) => {
                    out.stats.decoded += 1;
                    out.ticks.push(tick);
                }
                None => out.stats.skipped += 1,
            }
            offset = end;
        }

        out
    }

    /// Decode a single packet payload. Returns `None` for unknown shapes.
    pub fn decode_packet(&self, payload: &[u8]) -> Option<Tick> {
        let header = &payload[..payload.len().min(HEADER_LEN)];
        let fields: Vec<u32> = header
            .chunks_exact(FIELD_LEN)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let Some(kind) = PacketKind::from_field_count(fields.len()) else {
            warn!(
                fields = fields.len(),
                len = payload.len(),
                "Unrecognised packet shape, skipping"
            );
            return None;
        };

        let token = fields[0];
        let mut tick = Tick {
            token,
            last_price: Price::from_raw(fields[1]),
            payload: build_payload(kind, &fields),
            lot_size: self.directory.lot_size(token),
            depth: Depth::default(),
        };

        if payload.len() > HEADER_LEN {
            tick.depth = decode_depth(&payload[HEADER_LEN..]);
        }
        Some(tick)
    }

    pub fn directory(&self) -> &Arc<InstrumentDirectory> {
        &self.directory
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn price(raw: u32) -> Price {
    Price::from_raw(raw)
}

/// Map positional fields onto the shape `kind`. `fields.len()` matches `kind`.
fn build_payload(kind: PacketKind, f: &[u32]) -> TickPayload {
    match kind {
        PacketKind::LtpOnly => TickPayload::LtpOnly,
        PacketKind::QuoteNoChange => TickPayload::QuoteNoChange {
            ohlc: Ohlc {
                high: price(f[2]),
                low: price(f[3]),
                open: price(f[4]),
                close: price(f[5]),
            },
            exchange_timestamp: f[6],
        },
        PacketKind::QuoteWithChange => TickPayload::QuoteWithChange {
            ohlc: Ohlc {
                high: price(f[2]),
                low: price(f[3]),
                open: price(f[4]),
                close: price(f[5]),
            },
            price_change: f[6] as i32,
            exchange_timestamp: f[7],
        },
        PacketKind::QuoteFull => TickPayload::QuoteFull {
            trade: trade_stats(f),
            ohlc: Ohlc {
                high: price(f[7]),
                low: price(f[8]),
                open: price(f[9]),
                close: price(f[10]),
            },
        },
        PacketKind::FullWithOi => TickPayload::FullWithOi {
            trade: trade_stats(f),
            ohlc: Ohlc {
                high: price(f[7]),
                low: price(f[8]),
                open: price(f[9]),
                close: price(f[10]),
            },
            last_traded_timestamp: f[11],
            open_interest: OpenInterest {
                oi: f[12],
                oi_high: f[13],
                oi_low: f[14],
            },
            exchange_timestamp: f[15],
        },
    }
}

fn trade_stats(f: &[u32]) -> TradeStats {
    TradeStats {
        last_traded_quantity: f[2],
        average_traded_price: price(f[3]),
        volume_traded: f[4],
        total_buy_quantity: f[5],
        total_sell_quantity: f[6],
    }
}

/// Decode the ladder following the header.
///
/// The first `entries / 2` levels are bids, the rest asks. A trailing
/// partial entry is ignored.
fn decode_depth(bytes: &[u8]) -> Depth {
    let levels: Vec<DepthLevel> = bytes
        .chunks_exact(DEPTH_ENTRY_LEN)
        .map(|e| DepthLevel {
            quantity: u32::from_be_bytes([e[0], e[1], e[2], e[3]]),
            price: Price::from_raw(u32::from_be_bytes([e[4], e[5], e[6], e[7]])),
            orders: u16::from_be_bytes([e[8], e[9]]),
        })
        .collect();

    let remainder = bytes.len() % DEPTH_ENTRY_LEN;
    if remainder != 0 {
        debug!(trailing = remainder, "Ignoring partial depth entry");
    }

    let buy_levels = levels.len() / 2;
    let mut buy = levels;
    let sell = buy.split_off(buy_levels);
    Depth { buy, sell }
}
