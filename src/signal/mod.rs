//! Signal pipeline: indicators -> regime classification -> vote aggregation.

pub mod aggregator;
pub mod context;
pub mod indicators;

pub use aggregator::{aggregate, Action, TradeSignal, Vote};
pub use context::{classify, AdaptiveParams, MarketContext};
pub use indicators::{compute, IndicatorSnapshot, Trend, MIN_CANDLES};
