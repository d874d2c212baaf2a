//! Instrument records and the day's instrument directory
//!
//! The directory is built once before the engine starts and never mutated
//! afterwards; every component that needs token or symbol lookups receives
//! a shared reference to it. Token → instrument is injective for the day.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::DirectoryError;
use crate::session::MarketSession;

/// Exchanges whose whole instrument list joins the streaming universe.
const STREAMED_EXCHANGES: [&str; 3] = ["NSE", "NFO", "NFO-OPT"];
/// Index names streamed regardless of exchange.
const STREAMED_INDEX_NAMES: [&str; 2] = ["SENSEX", "BANKEX"];
/// Commodity futures segment.
const COMMODITY_FUTURES_SEGMENT: &str = "MCX-FUT";

/// A single venue instrument, immutable for the trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub token: u32,
    pub trading_symbol: String,
    pub exchange: String,
    pub name: String,
    /// Expiry date as published by the venue (empty for cash instruments).
    pub expiry: String,
    pub strike: f64,
    pub tick_size: f64,
    pub lot_size: u32,
    pub instrument_type: String,
    pub segment: String,
}

impl Instrument {
    /// Lookup key in `EXCHANGE:SYMBOL` form.
    pub fn key(&self) -> String {
        instrument_key(&self.exchange, &self.trading_symbol)
    }

    /// Trading session that governs this instrument's subscriptions.
    pub fn session(&self) -> MarketSession {
        MarketSession::for_segment(&self.exchange, &self.segment)
    }

    /// Whether the instrument belongs to the rotating streaming universe.
    pub fn is_streamable(&self) -> bool {
        STREAMED_EXCHANGES.contains(&self.exchange.as_str())
            || STREAMED_INDEX_NAMES.contains(&self.name.as_str())
            || self.segment == COMMODITY_FUTURES_SEGMENT
    }
}

/// Build an `EXCHANGE:SYMBOL` lookup key.
pub fn instrument_key(exchange: &str, trading_symbol: &str) -> String {
    format!("{}:{}", exchange, trading_symbol)
}

/// One member of the streaming universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub token: u32,
    pub session: MarketSession,
}

/// Snapshot of venue instruments keyed by token and by `EXCHANGE:SYMBOL`.
#[derive(Debug, Clone, Default)]
pub struct InstrumentDirectory {
    instruments: Vec<Instrument>,
    by_token: HashMap<u32, usize>,
    by_key: HashMap<String, usize>,
}

impl InstrumentDirectory {
    /// Build the directory, rejecting duplicate tokens or keys.
    pub fn new(instruments: impl IntoIterator<Item = Instrument>) -> Result<Self, DirectoryError> {
        let instruments: Vec<Instrument> = instruments.into_iter().collect();
        let mut by_token = HashMap::with_capacity(instruments.len());
        let mut by_key = HashMap::with_capacity(instruments.len());

        for (idx, instrument) in instruments.iter().enumerate() {
            if instrument.trading_symbol.is_empty() {
                return Err(DirectoryError::EmptySymbol {
                    token: instrument.token,
                });
            }
            if let Some(&prev) = by_token.get(&instrument.token) {
                let first: &Instrument = &instruments[prev];
                return Err(DirectoryError::DuplicateToken {
                    token: instrument.token,
                    first: first.key(),
                    second: instrument.key(),
                });
            }
            let key = instrument.key();
            if by_key.contains_key(&key) {
                return Err(DirectoryError::DuplicateKey { key });
            }
            by_token.insert(instrument.token, idx);
            by_key.insert(key, idx);
        }

        Ok(Self {
            instruments,
            by_token,
            by_key,
        })
    }

    /// Look up an instrument by token.
    pub fn by_token(&self, token: u32) -> Option<&Instrument> {
        self.by_token.get(&token).map(|&idx| &self.instruments[idx])
    }

    /// Look up an instrument by exchange and trading symbol.
    pub fn by_symbol(&self, exchange: &str, trading_symbol: &str) -> Option<&Instrument> {
        self.by_key(&instrument_key(exchange, trading_symbol))
    }

    /// Look up an instrument by its `EXCHANGE:SYMBOL` key.
    pub fn by_key(&self, key: &str) -> Option<&Instrument> {
        self.by_key.get(key).map(|&idx| &self.instruments[idx])
    }

    /// Lot size for a token, if the token is known.
    pub fn lot_size(&self, token: u32) -> Option<u32> {
        self.by_token(token).map(|i| i.lot_size)
    }

    /// Cache keys a tick for `token` is published under.
    ///
    /// Known tokens map to `EXCHANGE:SYMBOL` and the bare symbol; unknown
    /// tokens fall back to the token's decimal string.
    pub fn cache_keys(&self, token: u32) -> Vec<String> {
        match self.by_token(token) {
            Some(instrument) => vec![instrument.key(), instrument.trading_symbol.clone()],
            None => vec![token.to_string()],
        }
    }

    /// The rotating subscription universe, ordered by token.
    pub fn streaming_universe(&self) -> Vec<UniverseEntry> {
        let mut universe: Vec<UniverseEntry> = self
            .instruments
            .iter()
            .filter(|i| i.is_streamable())
            .map(|i| UniverseEntry {
                token: i.token,
                session: i.session(),
            })
            .collect();
        universe.sort_by_key(|e| e.token);
        universe
    }

    /// All instruments in load order.
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(token: u32, exchange: &str, symbol: &str, segment: &str, lot: u32) -> Instrument {
        Instrument {
            token,
            trading_symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            name: symbol.to_string(),
            expiry: String::new(),
            strike: 0.0,
            tick_size: 0.05,
            lot_size: lot,
            instrument_type: "EQ".to_string(),
            segment: segment.to_string(),
        }
    }

    fn sample() -> InstrumentDirectory {
        InstrumentDirectory::new(vec![
            instrument(408065, "NSE", "INFY", "NSE", 1),
            instrument(12345, "NFO", "NIFTY24DECFUT", "NFO-FUT", 25),
            instrument(99001, "MCX", "CRUDEOIL24DECFUT", "MCX-FUT", 100),
            instrument(500209, "BSE", "INFY", "BSE", 1),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_by_token_and_key() {
        let dir = sample();
        assert_eq!(dir.len(), 4);
        assert_eq!(dir.by_token(12345).unwrap().trading_symbol, "NIFTY24DECFUT");
        assert_eq!(dir.by_symbol("NSE", "INFY").unwrap().token, 408065);
        assert_eq!(dir.by_key("BSE:INFY").unwrap().token, 500209);
        assert!(dir.by_token(1).is_none());
        assert_eq!(dir.lot_size(99001), Some(100));
        assert_eq!(dir.lot_size(1), None);
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let result = InstrumentDirectory::new(vec![
            instrument(1, "NSE", "A", "NSE", 1),
            instrument(1, "NSE", "B", "NSE", 1),
        ]);
        match result {
            Err(DirectoryError::DuplicateToken { token, first, second }) => {
                assert_eq!(token, 1);
                assert_eq!(first, "NSE:A");
                assert_eq!(second, "NSE:B");
            }
            other => panic!("Expected DuplicateToken, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let result = InstrumentDirectory::new(vec![
            instrument(1, "NSE", "A", "NSE", 1),
            instrument(2, "NSE", "A", "NSE", 1),
        ]);
        assert_eq!(
            result.unwrap_err(),
            DirectoryError::DuplicateKey {
                key: "NSE:A".to_string()
            }
        );
    }

    #[test]
    fn test_cache_keys() {
        let dir = sample();
        assert_eq!(dir.cache_keys(408065), vec!["NSE:INFY".to_string(), "INFY".to_string()]);
        assert_eq!(dir.cache_keys(7), vec!["7".to_string()]);
    }

    #[test]
    fn test_streaming_universe_selection() {
        let dir = sample();
        let universe = dir.streaming_universe();
        let tokens: Vec<u32> = universe.iter().map(|e| e.token).collect();
        // BSE cash instrument is not streamed; ordered by token
        assert_eq!(tokens, vec![12345, 99001, 408065]);
        let commodity = universe.iter().find(|e| e.token == 99001).unwrap();
        assert_eq!(commodity.session, MarketSession::Commodity);
    }

    #[test]
    fn test_sensex_index_is_streamed() {
        let mut sensex = instrument(265, "BSE", "SENSEX", "INDICES", 1);
        sensex.name = "SENSEX".to_string();
        assert!(sensex.is_streamable());
        assert_eq!(sensex.session(), MarketSession::Equity);
    }
}
