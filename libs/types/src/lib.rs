//! Types library for the venue tick feed
//!
//! Shared vocabulary for the ingestion, storage and replay services: the
//! day's instrument directory, decoded ticks and their depth ladders,
//! integer-paise prices, and the trading-session windows that gate
//! subscriptions.
//!
//! # Modules
//! - `numeric`: Price (raw paise with decimal conversion)
//! - `instrument`: Instrument records and the immutable InstrumentDirectory
//! - `tick`: Tick, its tagged packet payload, and the depth ladder
//! - `session`: Market segments and their venue-local trading windows
//! - `errors`: Error taxonomy

pub mod numeric;
pub mod instrument;
pub mod tick;
pub mod session;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::numeric::*;
    pub use crate::instrument::*;
    pub use crate::tick::*;
    pub use crate::session::*;
    pub use crate::errors::*;
}
