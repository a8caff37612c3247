//! Technical indicator engine: computes a per-cycle snapshot from a bounded
//! window of OHLCV candles.
//!
//! Windows follow the standard smoothing periods: RSI 14 (Wilder), MACD
//! 12/26/9, EMA 20/50, Bollinger 20 +/- 2 sigma. Fewer than [`MIN_CANDLES`]
//! candles is insufficient-data policy, not an error: the caller skips the
//! pair for the cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::Candle;

/// Minimum candles required to produce a snapshot.
pub const MIN_CANDLES: usize = 50;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const EMA_FAST: usize = 20;
pub const EMA_SLOW: usize = 50;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_MULT: f64 = 2.0;

/// Range window for rolling support/resistance.
const RANGE_PERIOD: usize = 20;

/// Price direction classification from moving averages and momentum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    StrongUptrend,
    Uptrend,
    Sideways,
    Downtrend,
    StrongDowntrend,
    Unknown,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::StrongUptrend => "strong_uptrend",
            Trend::Uptrend => "uptrend",
            Trend::Sideways => "sideways",
            Trend::Downtrend => "downtrend",
            Trend::StrongDowntrend => "strong_downtrend",
            Trend::Unknown => "unknown",
        }
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, Trend::Downtrend | Trend::StrongDowntrend)
    }
}

/// Immutable indicator snapshot, recomputed once per pair per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub trend: Trend,

    /// Standard deviation of close-to-close percentage changes, in percent.
    pub volatility: f64,

    /// Lowest low over the range window.
    pub support: f64,

    /// Highest high over the range window.
    pub resistance: f64,

    /// Percentage change from the first to the last close of the window.
    pub price_change_24h: f64,

    pub current_price: f64,
    pub computed_at: DateTime<Utc>,
}

/// Compute the indicator snapshot for a candle window (ascending by time).
///
/// Returns `None` when fewer than [`MIN_CANDLES`] candles are supplied.
pub fn compute(candles: &[Candle]) -> Option<IndicatorSnapshot> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let current_price = *closes.last()?;
    let first_close = closes[0];

    let (macd, macd_signal, macd_histogram) =
        macd_latest(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let (bb_upper, bb_middle, bb_lower) =
        bollinger_latest(&closes, BOLLINGER_PERIOD, BOLLINGER_MULT);

    let price_change_24h = if first_close != 0.0 {
        (current_price - first_close) / first_close * 100.0
    } else {
        0.0
    };

    let range = &candles[candles.len() - RANGE_PERIOD..];
    let support = range.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = range
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);

    Some(IndicatorSnapshot {
        rsi: rsi_latest(&closes, RSI_PERIOD),
        macd,
        macd_signal,
        macd_histogram,
        ema_fast: ema_latest(&closes, EMA_FAST),
        ema_slow: ema_latest(&closes, EMA_SLOW),
        bb_upper,
        bb_middle,
        bb_lower,
        trend: detect_trend(&closes),
        volatility: volatility_pct(&closes),
        support,
        resistance,
        price_change_24h,
        current_price,
        computed_at: Utc::now(),
    })
}

/// RSI with Wilder smoothing: first average is a simple mean over the first
/// `period` changes, then avg = (prev * (n-1) + current) / n.
fn rsi_latest(closes: &[f64], period: usize) -> f64 {
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    if changes.len() < period {
        return 50.0;
    }

    let mut avg_gain = changes[..period]
        .iter()
        .map(|&c| if c > 0.0 { c } else { 0.0 })
        .sum::<f64>()
        / period as f64;
    let mut avg_loss = changes[..period]
        .iter()
        .map(|&c| if c < 0.0 { -c } else { 0.0 })
        .sum::<f64>()
        / period as f64;

    for &change in &changes[period..] {
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// EMA series: k = 2/(n+1), seeded with the SMA of the first `period` values.
/// Entries before the warmup index hold the running seed and must not be read.
fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = vec![0.0; closes.len()];
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, &close) in closes.iter().enumerate() {
        if i < period - 1 {
            sum += close;
        } else if i == period - 1 {
            sum += close;
            ema = sum / period as f64;
            out[i] = ema;
        } else {
            ema = close * k + ema * (1.0 - k);
            out[i] = ema;
        }
    }

    out
}

fn ema_latest(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period {
        return *closes.last().unwrap_or(&0.0);
    }
    *ema_series(closes, period).last().unwrap_or(&0.0)
}

/// MACD line = EMA(fast) - EMA(slow); signal = EMA(signal) of the MACD line
/// seeded with its SMA; histogram = line - signal. Returns the latest values.
fn macd_latest(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> (f64, f64, f64) {
    if closes.len() < slow + signal_period {
        return (0.0, 0.0, 0.0);
    }

    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    let warmup = slow - 1;

    let macd_line: Vec<f64> = (warmup..closes.len())
        .map(|i| ema_fast[i] - ema_slow[i])
        .collect();

    let k = 2.0 / (signal_period as f64 + 1.0);
    let mut signal = macd_line[..signal_period].iter().sum::<f64>() / signal_period as f64;
    for &value in &macd_line[signal_period..] {
        signal = value * k + signal * (1.0 - k);
    }

    let line = *macd_line.last().unwrap_or(&0.0);
    (line, signal, line - signal)
}

/// Bollinger bands over the trailing window, population standard deviation.
fn bollinger_latest(closes: &[f64], period: usize, mult: f64) -> (f64, f64, f64) {
    if closes.len() < period {
        return (0.0, 0.0, 0.0);
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();

    (middle + mult * stddev, middle, middle - mult * stddev)
}

/// Trend from SMA(10) vs SMA(30) plus 10-period momentum with a +/-2% band.
fn detect_trend(closes: &[f64]) -> Trend {
    if closes.len() < 30 {
        return Trend::Unknown;
    }

    let sma_short = closes[closes.len() - 10..].iter().sum::<f64>() / 10.0;
    let sma_long = closes[closes.len() - 30..].iter().sum::<f64>() / 30.0;

    let anchor = closes[closes.len() - 10];
    if anchor == 0.0 {
        return Trend::Unknown;
    }
    let momentum = (closes[closes.len() - 1] - anchor) / anchor * 100.0;

    if sma_short > sma_long && momentum > 2.0 {
        Trend::StrongUptrend
    } else if sma_short > sma_long && momentum > 0.0 {
        Trend::Uptrend
    } else if sma_short < sma_long && momentum < -2.0 {
        Trend::StrongDowntrend
    } else if sma_short < sma_long && momentum < 0.0 {
        Trend::Downtrend
    } else {
        Trend::Sideways
    }
}

/// Sample standard deviation of close-to-close percentage changes, in percent.
fn volatility_pct(closes: &[f64]) -> f64 {
    let changes: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if changes.len() < 2 {
        return 0.0;
    }

    changes.std_dev() * 100.0
}
