//! Portfolio-level risk gate and position book.
//!
//! Owns the open positions and the daily loss/trade counters. Every entry
//! goes through [`RiskManager::can_open`]; the daily counters reset when the
//! UTC date rolls over.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::config::RiskConfig;
use super::position::{PartialExit, Position};
use crate::signal::AdaptiveParams;

/// Why a new entry was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryBlock {
    MaxPositions,
    InsufficientBalance,
    DailyLossCap,
}

impl EntryBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryBlock::MaxPositions => "max positions reached",
            EntryBlock::InsufficientBalance => "insufficient balance",
            EntryBlock::DailyLossCap => "daily loss cap reached",
        }
    }
}

/// Outcome of a full close.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub quantity: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub realized_pnl_pct: Decimal,
}

/// Position book plus the portfolio caps.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    positions: HashMap<String, Position>,
    daily_loss_pct: Decimal,
    daily_trades: u32,
    current_day: NaiveDate,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
            daily_loss_pct: Decimal::ZERO,
            daily_trades: 0,
            current_day: Utc::now().date_naive(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn position(&self, pair: &str) -> Option<&Position> {
        self.positions.get(pair)
    }

    pub fn position_mut(&mut self, pair: &str) -> Option<&mut Position> {
        self.positions.get_mut(pair)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn daily_loss_pct(&self) -> Decimal {
        self.daily_loss_pct
    }

    pub fn daily_trades(&self) -> u32 {
        self.daily_trades
    }

    /// Reset the daily counters when the UTC date has rolled over.
    pub fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.current_day {
            info!(
                day = %today,
                prior_loss_pct = %self.daily_loss_pct,
                prior_trades = self.daily_trades,
                "daily counters reset"
            );
            self.daily_loss_pct = Decimal::ZERO;
            self.daily_trades = 0;
            self.current_day = today;
        }
    }

    /// Gate a prospective entry. A DCA entry into an existing position only
    /// needs balance: the position slot is already spent and averaging down
    /// is exempt from the loss cap. Fresh entries face all three caps, with
    /// the regime's position limit in force.
    pub fn can_open(
        &self,
        pair: &str,
        balance: Decimal,
        max_positions: u32,
    ) -> Result<(), EntryBlock> {
        if self.config.enable_dca && self.positions.contains_key(pair) {
            if balance < self.config.trade_amount {
                return Err(EntryBlock::InsufficientBalance);
            }
            return Ok(());
        }

        if self.positions.len() >= max_positions as usize {
            return Err(EntryBlock::MaxPositions);
        }
        if balance < self.config.trade_amount {
            return Err(EntryBlock::InsufficientBalance);
        }
        if self.daily_loss_pct >= self.config.max_daily_loss_pct {
            return Err(EntryBlock::DailyLossCap);
        }
        Ok(())
    }

    /// Whether a DCA buy is allowed at `price`: a position must exist and be
    /// under water by at least the configured drawdown.
    pub fn should_accumulate(&self, pair: &str, price: Decimal) -> bool {
        if !self.config.enable_dca {
            return false;
        }
        let Some(position) = self.positions.get(pair) else {
            return false;
        };

        let average = position.average_cost();
        if average.is_zero() {
            return false;
        }
        let drawdown_pct = (price - average) / average * dec!(100);
        drawdown_pct <= self.config.dca_threshold_pct
    }

    /// Record a filled opening buy.
    pub fn open_position(
        &mut self,
        pair: &str,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
        params: &AdaptiveParams,
    ) -> &Position {
        let position = Position::open(pair, price, quantity, fee, params, &self.config);
        info!(
            pair = %pair,
            price = %price,
            quantity = %quantity,
            context = params.context.as_str(),
            stop = %position.stop_price,
            "position opened"
        );
        self.positions.entry(pair.to_string()).or_insert(position)
    }

    /// Record a filled DCA buy. Returns the new average cost.
    pub fn accumulate(
        &mut self,
        pair: &str,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
    ) -> Option<Decimal> {
        let position = self.positions.get_mut(pair)?;
        position.accumulate(price, quantity, fee);
        let average = position.average_cost();
        info!(
            pair = %pair,
            price = %price,
            quantity = %quantity,
            new_average = %average,
            "position averaged down"
        );
        Some(average)
    }

    /// Fire at most one ladder rung for the pair at `price`.
    pub fn partial_exit(&mut self, pair: &str, price: Decimal) -> Option<PartialExit> {
        let position = self.positions.get_mut(pair)?;
        let exit = position.partial_exit(price)?;
        info!(
            pair = %pair,
            tp_level = %exit.threshold_pct,
            quantity = %exit.quantity,
            realized_pnl = %exit.realized_pnl,
            remaining = %exit.remaining_quantity,
            "partial take-profit"
        );
        Some(exit)
    }

    /// Fully close the pair's position at `price`. Losses feed the daily
    /// loss counter.
    pub fn close_position(&mut self, pair: &str, price: Decimal) -> Option<ClosedTrade> {
        let position = self.positions.remove(pair)?;
        let quantity = position.outstanding_quantity();
        let (realized_pnl, realized_pnl_pct, fee) = position.close_pnl(price);

        if realized_pnl_pct < Decimal::ZERO {
            self.daily_loss_pct += realized_pnl_pct.abs();
            warn!(
                pair = %pair,
                loss_pct = %realized_pnl_pct,
                daily_loss_pct = %self.daily_loss_pct,
                "closed at a loss"
            );
        }
        self.daily_trades += 1;

        info!(
            pair = %pair,
            price = %price,
            realized_pnl = %realized_pnl,
            realized_pnl_pct = %realized_pnl_pct,
            "position closed"
        );

        Some(ClosedTrade {
            quantity,
            fee,
            realized_pnl,
            realized_pnl_pct,
        })
    }
}
