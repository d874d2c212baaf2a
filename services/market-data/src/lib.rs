//! Market Data Service
//!
//! Ingests the venue's binary tick stream and produces:
//! - Normalised ticks decoded from variable-shape packets
//! - A last-value cache keyed by `EXCHANGE:SYMBOL` and bare symbol
//! - A compressed, date-partitioned tick log for offline replay
//! - Rotating subscriptions that respect connection capacity and
//!   trading-session windows
//!
//! # Architecture
//!
//! ```text
//!   Streaming transport
//!        │ framed messages
//!    ┌───▼────┐
//!    │ Reader │ ← connect / disconnect events
//!    └───┬────┘
//!        │ bounded ingress (Block | DropNewest)
//!   ┌────▼─────┐
//!   │ Decoder  │
//!   └──┬────┬──┘
//!      │    │
//! ┌────▼─┐ ┌▼─────────┐
//! │Cache │ │ Tick log │
//! └──────┘ └──────────┘
//!
//!   Scheduler ──subscribe / unsubscribe──► Streaming transport
//! ```

pub mod backpressure;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coverage;
pub mod decoder;
pub mod engine;
pub mod metrics;
pub mod scheduler;
pub mod transport;

pub use cache::TickCache;
pub use config::{ConfigError, EngineConfig};
pub use decoder::TickDecoder;
pub use engine::{start_engine, EngineError, EngineHandle, QueryError};
pub use persistence::read_log;
pub use scheduler::{SchedulerHandle, SubscriptionScheduler};
pub use transport::{
    ConnectionState, FeedControl, FeedEvent, FeedSource, StreamMode, TransportError,
};

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";
