//! Multi-entry position ledger.
//!
//! A position accumulates entries (initial buy plus DCA buys) and tracks a
//! fee-inclusive weighted-average cost. Exits happen through a two-level
//! partial take-profit ladder, a ratcheting trailing stop, and the final
//! full-close checks. All money math is `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::config::RiskConfig;
use crate::signal::{AdaptiveParams, MarketContext};

/// One fill that went into the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One fill that came out of the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exit {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Exit {
    /// Quote received for this exit, net of the sell fee.
    pub fn proceeds(&self) -> Decimal {
        self.price * self.quantity - self.fee
    }
}

/// One rung of the partial take-profit ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpLevel {
    /// Fires when fee-inclusive unrealized P&L reaches this percent.
    pub threshold_pct: Decimal,

    /// Portion of the outstanding quantity to sell, in percent.
    pub portion_pct: Decimal,

    pub completed: bool,
}

/// Result of executing one ladder rung.
#[derive(Debug, Clone)]
pub struct PartialExit {
    pub quantity: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub threshold_pct: Decimal,
    pub remaining_quantity: Decimal,
}

/// Why a position should be fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TrailingStop => "trailing_stop",
        }
    }
}

/// An open long position on one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub pair: String,
    entries: Vec<Entry>,
    exits: Vec<Exit>,

    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,

    /// Close the position when price reaches this level.
    pub take_profit_price: Decimal,

    /// Hard stop price. Ratchets up with the trail; re-anchored to the
    /// new average on DCA fills.
    pub stop_price: Decimal,
    pub highest_price: Decimal,

    pub tp_levels: Vec<TpLevel>,
    pub context: MarketContext,
    pub use_trailing_stop: bool,
    pub trading_fees_pct: Decimal,
    pub opened_at: DateTime<Utc>,

    /// Whether the stop currently sits above its entry anchor.
    trail_active: bool,
}

impl Position {
    /// Open a position from its first fill, with regime parameters applied.
    pub fn open(
        pair: &str,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
        params: &AdaptiveParams,
        config: &RiskConfig,
    ) -> Self {
        let stop_price = price * (Decimal::ONE - params.stop_loss_pct / dec!(100));
        let take_profit_price = price * (Decimal::ONE + params.take_profit_pct / dec!(100));
        Self {
            pair: pair.to_string(),
            entries: vec![Entry {
                price,
                quantity,
                fee,
                timestamp: Utc::now(),
            }],
            exits: Vec::new(),
            take_profit_pct: params.take_profit_pct,
            stop_loss_pct: params.stop_loss_pct,
            take_profit_price,
            stop_price,
            highest_price: price,
            tp_levels: ladder(params.take_profit_pct),
            context: params.context,
            use_trailing_stop: config.use_trailing_stop,
            trading_fees_pct: config.trading_fees_pct,
            opened_at: Utc::now(),
            trail_active: false,
        }
    }

    /// Add a DCA fill. The average cost moves with it and both price anchors
    /// are recomputed from the new average, so the entry is not stopped out
    /// by the very drawdown it was bought into. Completed ladder rungs stay
    /// completed.
    pub fn accumulate(&mut self, price: Decimal, quantity: Decimal, fee: Decimal) {
        self.entries.push(Entry {
            price,
            quantity,
            fee,
            timestamp: Utc::now(),
        });
        let average = self.average_cost();
        self.stop_price = average * (Decimal::ONE - self.stop_loss_pct / dec!(100));
        self.take_profit_price = average * (Decimal::ONE + self.take_profit_pct / dec!(100));
        self.trail_active = false;
    }

    pub fn total_quantity(&self) -> Decimal {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    pub fn sold_quantity(&self) -> Decimal {
        self.exits.iter().map(|e| e.quantity).sum()
    }

    pub fn outstanding_quantity(&self) -> Decimal {
        self.total_quantity() - self.sold_quantity()
    }

    pub fn exits(&self) -> &[Exit] {
        &self.exits
    }

    /// P&L realized by the exits so far, against the current average cost.
    pub fn realized_pnl(&self) -> Decimal {
        let proceeds: Decimal = self.exits.iter().map(Exit::proceeds).sum();
        proceeds - self.average_cost() * self.sold_quantity()
    }

    /// Total spend including entry fees.
    pub fn total_cost(&self) -> Decimal {
        self.entries
            .iter()
            .map(|e| e.price * e.quantity + e.fee)
            .sum()
    }

    /// Fee-inclusive weighted-average cost per unit.
    pub fn average_cost(&self) -> Decimal {
        let quantity = self.total_quantity();
        if quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.total_cost() / quantity
        }
    }

    /// Unrealized P&L on the outstanding quantity at `price`. With
    /// `include_fees` the projected sell fee is deducted from the exit value.
    pub fn unrealized_pnl(&self, price: Decimal, include_fees: bool) -> (Decimal, Decimal) {
        let outstanding = self.outstanding_quantity();
        let cost_basis = self.average_cost() * outstanding;
        if cost_basis.is_zero() {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let mut value = price * outstanding;
        if include_fees {
            value -= value * self.trading_fees_pct / dec!(100);
        }

        let pnl = value - cost_basis;
        (pnl, pnl / cost_basis * dec!(100))
    }

    /// Track a new price: remember the high-water mark and ratchet the
    /// trailing stop upward. Returns the new stop when it moved.
    pub fn track_price(&mut self, price: Decimal) -> Option<Decimal> {
        if price <= self.highest_price {
            return None;
        }
        self.highest_price = price;

        if !self.use_trailing_stop {
            return None;
        }

        let (_, pnl_pct) = self.unrealized_pnl(price, true);
        let distance_pct = trail_distance(pnl_pct, self.stop_loss_pct);
        let candidate = price * (Decimal::ONE - distance_pct / dec!(100));

        if candidate > self.stop_price {
            self.stop_price = candidate;
            self.trail_active = true;
            Some(candidate)
        } else {
            None
        }
    }

    /// Fire the first unfired ladder rung whose threshold the fee-inclusive
    /// P&L has reached. At most one rung per call.
    pub fn partial_exit(&mut self, price: Decimal) -> Option<PartialExit> {
        let (_, pnl_pct) = self.unrealized_pnl(price, true);
        let average_cost = self.average_cost();
        let outstanding = self.outstanding_quantity();
        if outstanding.is_zero() {
            return None;
        }

        let level = self
            .tp_levels
            .iter_mut()
            .find(|l| !l.completed && pnl_pct >= l.threshold_pct)?;

        let quantity = outstanding * level.portion_pct / dec!(100);
        let fee = price * quantity * self.trading_fees_pct / dec!(100);
        let realized_pnl = (price - average_cost) * quantity - fee;
        let threshold_pct = level.threshold_pct;
        level.completed = true;

        self.exits.push(Exit {
            price,
            quantity,
            fee,
            timestamp: Utc::now(),
        });

        Some(PartialExit {
            quantity,
            fee,
            realized_pnl,
            threshold_pct,
            remaining_quantity: self.outstanding_quantity(),
        })
    }

    /// Full-close check against the derived price levels: the take-profit
    /// price above, the (possibly ratcheted) stop price below.
    pub fn should_close(&self, price: Decimal) -> Option<CloseReason> {
        if price >= self.take_profit_price {
            return Some(CloseReason::TakeProfit);
        }
        if price <= self.stop_price {
            return Some(if self.trail_active {
                CloseReason::TrailingStop
            } else {
                CloseReason::StopLoss
            });
        }
        None
    }

    /// Realized P&L for selling the whole outstanding quantity at `price`,
    /// net of the sell fee. Returns (pnl, pnl_pct, fee).
    pub fn close_pnl(&self, price: Decimal) -> (Decimal, Decimal, Decimal) {
        let outstanding = self.outstanding_quantity();
        let cost_basis = self.average_cost() * outstanding;
        let gross = price * outstanding;
        let fee = gross * self.trading_fees_pct / dec!(100);
        let pnl = gross - fee - cost_basis;
        let pct = if cost_basis.is_zero() {
            Decimal::ZERO
        } else {
            pnl / cost_basis * dec!(100)
        };
        (pnl, pct, fee)
    }
}

/// Build the partial take-profit ladder for a final target percentage.
/// Tighter targets sell bigger portions, wider targets keep more for the
/// final exit.
fn ladder(take_profit_pct: Decimal) -> Vec<TpLevel> {
    let (first_portion, second_portion) = if take_profit_pct <= dec!(2.0) {
        (dec!(50), dec!(40))
    } else if take_profit_pct >= dec!(3.5) {
        (dec!(30), dec!(30))
    } else {
        (dec!(40), dec!(40))
    };

    vec![
        TpLevel {
            threshold_pct: take_profit_pct * dec!(0.5),
            portion_pct: first_portion,
            completed: false,
        },
        TpLevel {
            threshold_pct: take_profit_pct * dec!(0.75),
            portion_pct: second_portion,
            completed: false,
        },
    ]
}

/// Trailing distance tightens as unrealized profit grows.
fn trail_distance(pnl_pct: Decimal, stop_loss_pct: Decimal) -> Decimal {
    if pnl_pct >= dec!(2.5) {
        dec!(0.3)
    } else if pnl_pct >= dec!(1.5) {
        dec!(0.5)
    } else if pnl_pct >= dec!(0.8) {
        dec!(0.75)
    } else {
        stop_loss_pct
    }
}
