//! Trading configuration.

use anyhow::{ensure, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for position management and portfolio risk.
///
/// Percent fields are absolute percentages (3.0 means 3%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Baseline take-profit percentage, overridden per regime
    pub take_profit_pct: Decimal,

    /// Baseline stop-loss percentage, overridden per regime
    pub stop_loss_pct: Decimal,

    /// Maximum concurrent positions (regimes may override)
    pub max_positions: u32,

    /// Accumulated daily loss percentage that halts new entries
    pub max_daily_loss_pct: Decimal,

    /// Quote currency spent per market buy
    pub trade_amount: Decimal,

    /// Ratchet the stop upward as unrealized profit grows
    pub use_trailing_stop: bool,

    /// Exchange fee per side, in percent of notional
    pub trading_fees_pct: Decimal,

    /// Average into losing positions instead of opening new ones
    pub enable_dca: bool,

    /// Drawdown from average cost (percent, negative) that allows a DCA entry
    pub dca_threshold_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: dec!(3.0),   // 3% baseline target
            stop_loss_pct: dec!(2.0),     // 2% baseline stop
            max_positions: 3,
            max_daily_loss_pct: dec!(10.0),
            trade_amount: dec!(50.0),     // $50 per entry
            use_trailing_stop: true,
            trading_fees_pct: dec!(0.1),  // 0.1% per side
            enable_dca: true,
            dca_threshold_pct: dec!(-2.0),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.take_profit_pct > Decimal::ZERO,
            "take_profit_pct must be positive"
        );
        ensure!(
            self.stop_loss_pct > Decimal::ZERO,
            "stop_loss_pct must be positive"
        );
        ensure!(self.max_positions > 0, "max_positions must be at least 1");
        ensure!(
            self.max_daily_loss_pct > Decimal::ZERO,
            "max_daily_loss_pct must be positive"
        );
        ensure!(
            self.trade_amount > Decimal::ZERO,
            "trade_amount must be positive"
        );
        ensure!(
            self.trading_fees_pct >= Decimal::ZERO,
            "trading_fees_pct cannot be negative"
        );
        ensure!(
            self.dca_threshold_pct < Decimal::ZERO,
            "dca_threshold_pct must be negative (a drawdown)"
        );
        Ok(())
    }
}

/// Configuration for signal generation and the advisory vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// RSI below this casts a buy vote
    pub rsi_oversold: f64,

    /// RSI above this casts a sell vote
    pub rsi_overbought: f64,

    /// Advisory opinions below this confidence do not vote
    pub advisory_confidence_threshold: f64,

    /// Aggregated buy signals below this confidence are not traded
    pub min_signal_confidence: f64,

    /// Seconds a cached advisory opinion stays fresh
    pub advisory_refresh_secs: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            advisory_confidence_threshold: 70.0,
            min_signal_confidence: 40.0,
            advisory_refresh_secs: 300,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.rsi_oversold < self.rsi_overbought,
            "rsi_oversold must be below rsi_overbought"
        );
        ensure!(
            (0.0..=100.0).contains(&self.rsi_oversold)
                && (0.0..=100.0).contains(&self.rsi_overbought),
            "RSI thresholds must be within [0, 100]"
        );
        ensure!(
            (0.0..=100.0).contains(&self.advisory_confidence_threshold),
            "advisory_confidence_threshold must be within [0, 100]"
        );
        ensure!(
            (0.0..=100.0).contains(&self.min_signal_confidence),
            "min_signal_confidence must be within [0, 100]"
        );
        ensure!(
            self.advisory_refresh_secs > 0,
            "advisory_refresh_secs must be positive"
        );
        Ok(())
    }
}
