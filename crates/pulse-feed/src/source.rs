//! Market data source abstraction.

use pulse_core::{BoxFuture, Candle, PriceSnapshot, Timeframe};
use pulse_gateway::MarketClient;

use crate::error::FeedResult;
use crate::parser::{normalize_candles, normalize_prices};

/// Where the synchronizer gets its data from.
pub trait MarketDataSource: Send + Sync {
    fn fetch_prices(&self) -> BoxFuture<'_, FeedResult<PriceSnapshot>>;

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        limit: u32,
    ) -> BoxFuture<'a, FeedResult<Vec<Candle>>>;
}

impl MarketDataSource for MarketClient {
    fn fetch_prices(&self) -> BoxFuture<'_, FeedResult<PriceSnapshot>> {
        Box::pin(async move {
            let payload = self.get_prices().await?;
            normalize_prices(payload)
        })
    }

    fn fetch_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        limit: u32,
    ) -> BoxFuture<'a, FeedResult<Vec<Candle>>> {
        Box::pin(async move {
            let payload = self.get_klines(symbol, timeframe, limit).await?;
            normalize_candles(payload)
        })
    }
}
