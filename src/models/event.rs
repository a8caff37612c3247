//! Lifecycle events emitted by the bot for a persistence or presentation
//! collaborator to consume. The core itself keeps no durable state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Discrete position lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    /// A new position was opened.
    Opened {
        pair: String,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        context: String,
        timestamp: DateTime<Utc>,
    },

    /// An existing position was averaged into (DCA).
    Accumulated {
        pair: String,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
        new_average_cost: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// A partial take-profit level fired.
    PartiallyClosed {
        pair: String,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
        tp_level: Decimal,
        realized_pnl: Decimal,
        remaining_quantity: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// The position was fully closed.
    Closed {
        pair: String,
        price: Decimal,
        quantity: Decimal,
        realized_pnl: Decimal,
        realized_pnl_pct: Decimal,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl TradeEvent {
    /// Trading pair this event concerns.
    pub fn pair(&self) -> &str {
        match self {
            TradeEvent::Opened { pair, .. }
            | TradeEvent::Accumulated { pair, .. }
            | TradeEvent::PartiallyClosed { pair, .. }
            | TradeEvent::Closed { pair, .. } => pair,
        }
    }
}
