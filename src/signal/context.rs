//! Market regime classifier.
//!
//! A snapshot is mapped to exactly one of seven regimes by a strict priority
//! ladder: the first matching rule wins, and `Consolidation` is the fallback.
//! Each regime carries the adaptive parameter set the risk layer trades with
//! for that cycle.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::indicators::{IndicatorSnapshot, Trend};

/// Market regime for a single pair, for a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketContext {
    /// Deep oversold plus a sharp drop: contrarian entry window.
    CrashRecovery,
    /// Oversold without the sharp drop: buy-the-dip window.
    DipOpportunity,
    /// Overbought with momentum confirmation: ride the move.
    StrongMomentum,
    /// Price pressing against recent resistance with momentum behind it.
    Breakout,
    /// Early bottoming structure in a flat or falling market.
    ReversalSetup,
    /// Confirmed bearish conditions: trade small or not at all.
    Downtrend,
    /// Nothing decisive, the default regime.
    Consolidation,
}

impl MarketContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketContext::CrashRecovery => "crash_recovery",
            MarketContext::DipOpportunity => "dip_opportunity",
            MarketContext::StrongMomentum => "strong_momentum",
            MarketContext::Breakout => "breakout",
            MarketContext::ReversalSetup => "reversal_setup",
            MarketContext::Downtrend => "downtrend",
            MarketContext::Consolidation => "consolidation",
        }
    }
}

/// Parameter overrides attached to a regime. Percent values are absolute
/// (3.0 means 3%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParams {
    pub context: MarketContext,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    /// Added to the aggregated signal confidence, may be negative.
    pub confidence_boost: f64,
    pub max_positions: u32,
}

/// Classify a snapshot into a regime with its parameter overrides.
///
/// The rules are evaluated strictly in order; the first hit wins.
pub fn classify(snapshot: &IndicatorSnapshot) -> AdaptiveParams {
    let rsi = snapshot.rsi;
    let change = snapshot.price_change_24h;
    let hist = snapshot.macd_histogram;
    let trend = snapshot.trend;

    if rsi < 25.0 && change < -5.0 {
        return AdaptiveParams {
            context: MarketContext::CrashRecovery,
            take_profit_pct: dec!(2.0),
            stop_loss_pct: dec!(1.0),
            confidence_boost: 25.0,
            max_positions: 5,
        };
    }

    if (25.0..35.0).contains(&rsi) {
        return AdaptiveParams {
            context: MarketContext::DipOpportunity,
            take_profit_pct: dec!(2.5),
            stop_loss_pct: dec!(1.5),
            confidence_boost: 15.0,
            max_positions: 4,
        };
    }

    if rsi > 60.0 && change > 3.0 && hist > 0.0 {
        return AdaptiveParams {
            context: MarketContext::StrongMomentum,
            take_profit_pct: dec!(4.0),
            stop_loss_pct: dec!(2.5),
            confidence_boost: 20.0,
            max_positions: 4,
        };
    }

    if snapshot.resistance > 0.0
        && snapshot.current_price >= snapshot.resistance * 0.98
        && hist > 0.0
    {
        return AdaptiveParams {
            context: MarketContext::Breakout,
            take_profit_pct: dec!(3.5),
            stop_loss_pct: dec!(1.5),
            confidence_boost: 15.0,
            max_positions: 3,
        };
    }

    if (35.0..45.0).contains(&rsi)
        && matches!(trend, Trend::Sideways | Trend::Downtrend)
        && hist > 0.0
    {
        return AdaptiveParams {
            context: MarketContext::ReversalSetup,
            take_profit_pct: dec!(3.0),
            stop_loss_pct: dec!(2.0),
            confidence_boost: 10.0,
            max_positions: 3,
        };
    }

    if trend.is_bearish() && rsi < 50.0 && hist < 0.0 {
        return AdaptiveParams {
            context: MarketContext::Downtrend,
            take_profit_pct: dec!(3.0),
            stop_loss_pct: dec!(2.0),
            confidence_boost: -20.0,
            max_positions: 2,
        };
    }

    AdaptiveParams {
        context: MarketContext::Consolidation,
        take_profit_pct: dec!(3.0),
        stop_loss_pct: dec!(2.0),
        confidence_boost: 0.0,
        max_positions: 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            ema_fast: 100.0,
            ema_slow: 100.0,
            bb_upper: 102.0,
            bb_middle: 100.0,
            bb_lower: 98.0,
            trend: Trend::Sideways,
            volatility: 1.0,
            support: 95.0,
            resistance: 110.0,
            price_change_24h: 0.0,
            current_price: 100.0,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn crash_recovery_outranks_dip() {
        let mut s = snapshot();
        s.rsi = 20.0;
        s.price_change_24h = -6.0;

        let params = classify(&s);
        assert_eq!(params.context, MarketContext::CrashRecovery);
        assert_eq!(params.take_profit_pct, dec!(2.0));
        assert_eq!(params.stop_loss_pct, dec!(1.0));
        assert_eq!(params.confidence_boost, 25.0);
        assert_eq!(params.max_positions, 5);
    }

    #[test]
    fn deep_oversold_without_drop_is_not_crash_recovery() {
        let mut s = snapshot();
        s.rsi = 20.0;
        s.price_change_24h = -3.0;

        // rsi < 25 also fails the 25..35 dip band; falls through.
        assert_eq!(classify(&s).context, MarketContext::Consolidation);
    }

    #[test]
    fn dip_opportunity_band() {
        let mut s = snapshot();
        s.rsi = 30.0;
        assert_eq!(classify(&s).context, MarketContext::DipOpportunity);

        s.rsi = 25.0;
        assert_eq!(classify(&s).context, MarketContext::DipOpportunity);

        s.rsi = 35.0;
        assert_ne!(classify(&s).context, MarketContext::DipOpportunity);
    }

    #[test]
    fn strong_momentum_needs_all_three() {
        let mut s = snapshot();
        s.rsi = 65.0;
        s.price_change_24h = 4.0;
        s.macd_histogram = 0.5;
        assert_eq!(classify(&s).context, MarketContext::StrongMomentum);

        s.macd_histogram = -0.5;
        assert_ne!(classify(&s).context, MarketContext::StrongMomentum);
    }

    #[test]
    fn breakout_near_resistance() {
        let mut s = snapshot();
        s.current_price = 108.0;
        s.resistance = 110.0;
        s.macd_histogram = 0.2;

        let params = classify(&s);
        assert_eq!(params.context, MarketContext::Breakout);
        assert_eq!(params.max_positions, 3);
    }

    #[test]
    fn reversal_setup_in_sideways() {
        let mut s = snapshot();
        s.rsi = 40.0;
        s.trend = Trend::Sideways;
        s.macd_histogram = 0.1;
        // Keep price away from resistance so breakout does not fire.
        s.resistance = 150.0;

        assert_eq!(classify(&s).context, MarketContext::ReversalSetup);
    }

    #[test]
    fn downtrend_penalizes_confidence() {
        let mut s = snapshot();
        s.rsi = 45.0;
        s.trend = Trend::Downtrend;
        s.macd_histogram = -0.3;

        let params = classify(&s);
        assert_eq!(params.context, MarketContext::Downtrend);
        assert_eq!(params.confidence_boost, -20.0);
        assert_eq!(params.max_positions, 2);
    }

    #[test]
    fn default_is_consolidation() {
        let params = classify(&snapshot());
        assert_eq!(params.context, MarketContext::Consolidation);
        assert_eq!(params.take_profit_pct, dec!(3.0));
        assert_eq!(params.stop_loss_pct, dec!(2.0));
        assert_eq!(params.confidence_boost, 0.0);
        assert_eq!(params.max_positions, 3);
    }
}
