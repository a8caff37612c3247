//! Exchange gateways for market data and order execution.

mod binance;
mod paper;
mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Candle, Ticker};

pub use binance::BinanceGateway;
pub use paper::PaperGateway;
pub use types::*;

/// Errors surfaced by a gateway after its internal retries are exhausted.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned {code}: {message}")]
    Api { code: i64, message: String },

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

/// A filled market order, normalized across gateways. `fee` is denominated
/// in the quote currency.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub pair: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub quote_spent: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Market data and execution surface the bot trades through.
///
/// Read methods return `Ok(None)` when the exchange has no usable data for
/// the pair; the caller skips the pair for the cycle.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Current ticker for a pair, or `None` when the pair is unknown.
    async fn ticker(&self, pair: &str) -> Result<Option<Ticker>, GatewayError>;

    /// Most recent candles for a pair, ascending by open time.
    async fn candles(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Free balance of one currency.
    async fn balance(&self, currency: &str) -> Result<Decimal, GatewayError>;

    /// Market-buy spending `quote_amount` of the quote currency. `None`
    /// means the order did not fill.
    async fn market_buy(
        &self,
        pair: &str,
        quote_amount: Decimal,
    ) -> Result<Option<OrderFill>, GatewayError>;

    /// Market-sell `quantity` of the base currency.
    async fn market_sell(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<Option<OrderFill>, GatewayError>;
}

/// Quote currencies recognized when splitting a pair symbol, longest first.
const QUOTE_SUFFIXES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "EUR", "BNB", "BTC", "ETH",
];

/// Split a pair symbol like `BTCUSDT` into base and quote currencies.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    for quote in QUOTE_SUFFIXES {
        if let Some(base) = pair.strip_suffix(quote) {
            if !base.is_empty() {
                return Some((base, quote));
            }
        }
    }
    None
}

/// Whether the base asset of a pair is itself a stablecoin. Trading these
/// only burns fees on a peg.
pub fn is_stablecoin_base(pair: &str) -> bool {
    const STABLECOINS: &[&str] = &[
        "USDC", "USDT", "BUSD", "TUSD", "FDUSD", "DAI", "USDP", "USDD", "USDK",
    ];
    match split_pair(pair) {
        Some((base, _)) => STABLECOINS.contains(&base),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_common_pairs() {
        assert_eq!(split_pair("BTCUSDT"), Some(("BTC", "USDT")));
        assert_eq!(split_pair("ETHBTC"), Some(("ETH", "BTC")));
        assert_eq!(split_pair("SOLFDUSD"), Some(("SOL", "FDUSD")));
    }

    #[test]
    fn split_unknown_quote() {
        assert_eq!(split_pair("BTCXYZ"), None);
    }

    #[test]
    fn split_bare_quote_is_rejected() {
        assert_eq!(split_pair("USDT"), None);
    }

    #[test]
    fn stablecoin_pairs_detected() {
        assert!(is_stablecoin_base("USDCUSDT"));
        assert!(is_stablecoin_base("FDUSDUSDT"));
        assert!(!is_stablecoin_base("BTCUSDT"));
        assert!(!is_stablecoin_base("SOLUSDC"));
    }
}
