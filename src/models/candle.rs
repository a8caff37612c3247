//! Market data models: OHLCV candles and tickers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle. Prices and volume are `f64` because candles feed
/// the statistical indicator pipeline, not the money ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Current ticker snapshot for a trading pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub pair: String,

    /// Last traded price
    pub price: Decimal,

    /// Best bid
    pub bid: Decimal,

    /// Best ask
    pub ask: Decimal,

    /// 24h quote volume
    pub volume: Decimal,

    /// 24h price change in percent
    pub change_24h: f64,

    pub timestamp: DateTime<Utc>,
}
