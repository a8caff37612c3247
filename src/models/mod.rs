//! Data models for candles, tickers and lifecycle events.

mod candle;
mod event;

pub use candle::{Candle, Ticker};
pub use event::TradeEvent;
