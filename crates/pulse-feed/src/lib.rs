//! Market data feed for the pulse signal engine.
//!
//! Polls prices and candles through the gateway on two independent cadences and
//! publishes the normalized result into a shared `MarketState`.

pub mod error;
pub mod market_state;
pub mod parser;
pub mod source;
pub mod synchronizer;

pub use error::{FeedError, FeedResult};
pub use market_state::MarketState;
pub use parser::{normalize_candles, normalize_prices};
pub use source::MarketDataSource;
pub use synchronizer::{
    DataSynchronizer, NoticeLevel, RefreshRate, SyncConfig, SyncContext, SyncNotice,
    REFRESH_OPTIONS,
};
