//! Bot runner: the per-cycle decision loop.
//!
//! Every cycle, each configured pair is taken through the same pipeline:
//! fetch ticker and candles, compute indicators, classify the market regime,
//! aggregate votes, then either manage the open position (trailing stop,
//! partial take-profits, full close) or evaluate a new entry. Pairs are
//! isolated: one pair failing never blocks the others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::advisor::CachedAdvisor;
use crate::api::{is_stablecoin_base, split_pair, MarketGateway};
use crate::models::TradeEvent;
use crate::signal::{aggregate, classify, compute, Action, TradeSignal, MIN_CANDLES};
use crate::trading::{RiskConfig, RiskManager, SignalConfig};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Pairs to trade, e.g. BTCUSDT
    pub pairs: Vec<String>,

    /// Quote currency all pairs settle in
    pub quote_currency: String,

    /// Seconds between decision cycles
    pub cycle_interval_secs: u64,

    /// Candle interval for the indicator window
    pub candle_interval: String,

    /// Candles fetched per pair per cycle
    pub candle_limit: u32,

    pub risk: RiskConfig,
    pub signal: SignalConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pairs: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            quote_currency: "USDT".to_string(),
            cycle_interval_secs: 60,
            candle_interval: "1h".to_string(),
            candle_limit: 100,
            risk: RiskConfig::default(),
            signal: SignalConfig::default(),
        }
    }
}

/// Main bot runner.
pub struct TradingBot {
    config: BotConfig,
    gateway: Arc<dyn MarketGateway>,
    advisor: Option<Arc<CachedAdvisor>>,
    risk: RiskManager,
    events: Option<UnboundedSender<TradeEvent>>,

    shutdown: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl TradingBot {
    pub fn new(
        config: BotConfig,
        gateway: Arc<dyn MarketGateway>,
        advisor: Option<Arc<CachedAdvisor>>,
    ) -> Result<Self> {
        config.risk.validate()?;
        config.signal.validate()?;
        for pair in &config.pairs {
            split_pair(pair).ok_or_else(|| anyhow!("unrecognized pair symbol: {pair}"))?;
        }

        let risk = RiskManager::new(config.risk.clone());
        Ok(Self {
            config,
            gateway,
            advisor,
            risk,
            events: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Attach a consumer for position lifecycle events.
    pub fn set_event_sink(&mut self, sender: UnboundedSender<TradeEvent>) {
        self.events = Some(sender);
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Pause flag: a paused bot still tracks prices but opens nothing new.
    pub fn pause_signal(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            pairs = ?self.config.pairs,
            cycle_secs = self.config.cycle_interval_secs,
            advisory = self.advisor.is_some(),
            "Starting bot run loop"
        );

        let mut cycle = interval(Duration::from_secs(self.config.cycle_interval_secs));

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            cycle.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in bot cycle");
            }
        }

        info!(
            open_positions = self.risk.position_count(),
            "Bot shutdown complete"
        );
        Ok(())
    }

    /// One decision cycle across all pairs.
    pub async fn tick(&mut self) -> Result<()> {
        self.risk.roll_day();

        let pairs = self.config.pairs.clone();
        for pair in &pairs {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.process_pair(pair).await {
                warn!(pair = %pair, error = %e, "Pair skipped this cycle");
            }
        }

        debug!(
            open_positions = self.risk.position_count(),
            daily_loss_pct = %self.risk.daily_loss_pct(),
            daily_trades = self.risk.daily_trades(),
            "Cycle complete"
        );
        Ok(())
    }

    /// Run a pair through the full pipeline.
    async fn process_pair(&mut self, pair: &str) -> Result<()> {
        let Some(ticker) = self.gateway.ticker(pair).await? else {
            debug!(pair = %pair, "No ticker, skipping");
            return Ok(());
        };

        let candles = self
            .gateway
            .candles(pair, &self.config.candle_interval, self.config.candle_limit)
            .await?;
        if candles.len() < MIN_CANDLES {
            debug!(pair = %pair, candles = candles.len(), "Not enough history, skipping");
            return Ok(());
        }

        let Some(snapshot) = compute(&candles) else {
            debug!(pair = %pair, "No indicator snapshot, skipping");
            return Ok(());
        };

        let params = classify(&snapshot);
        let advice = match &self.advisor {
            Some(advisor) => advisor.advice(pair, &snapshot, params.context).await,
            None => None,
        };
        let signal = aggregate(&snapshot, params, advice.as_ref(), &self.config.signal);

        debug!(
            pair = %pair,
            context = signal.context().as_str(),
            action = signal.action.as_str(),
            confidence = signal.confidence,
            rsi = snapshot.rsi,
            "Signal evaluated"
        );

        if self.risk.position(pair).is_some() {
            self.manage_position(pair, ticker.price).await?;
            // Still holding after the exit checks: a buy signal may still
            // average down.
            if self.risk.position(pair).is_some() {
                self.consider_entry(pair, ticker.price, &signal).await?;
            }
            Ok(())
        } else {
            self.consider_entry(pair, ticker.price, &signal).await
        }
    }

    /// Manage an open position: ratchet the stop, fire at most one ladder
    /// rung, otherwise check the full-close conditions. A cycle that takes a
    /// partial profit does not also evaluate a full close.
    async fn manage_position(&mut self, pair: &str, price: Decimal) -> Result<()> {
        if let Some(position) = self.risk.position_mut(pair) {
            if let Some(new_stop) = position.track_price(price) {
                debug!(pair = %pair, stop = %new_stop, "Trailing stop ratcheted");
            }
        }

        // Dry-run the ladder on a copy so the ledger only moves after the
        // sell actually fills.
        let pending = self
            .risk
            .position(pair)
            .and_then(|p| p.clone().partial_exit(price));

        if let Some(preview) = pending {
            let Some(fill) = self.gateway.market_sell(pair, preview.quantity).await? else {
                warn!(pair = %pair, "Partial take-profit sell did not fill");
                return Ok(());
            };

            if let Some(exit) = self.risk.partial_exit(pair, price) {
                self.emit(TradeEvent::PartiallyClosed {
                    pair: pair.to_string(),
                    price: fill.price,
                    quantity: exit.quantity,
                    fee: exit.fee,
                    tp_level: exit.threshold_pct,
                    realized_pnl: exit.realized_pnl,
                    remaining_quantity: exit.remaining_quantity,
                    timestamp: Utc::now(),
                });
            }
            return Ok(());
        }

        let Some(position) = self.risk.position(pair) else {
            return Ok(());
        };
        let Some(reason) = position.should_close(price) else {
            return Ok(());
        };
        let quantity = position.outstanding_quantity();

        info!(
            pair = %pair,
            reason = reason.as_str(),
            quantity = %quantity,
            "Closing position"
        );

        let Some(fill) = self.gateway.market_sell(pair, quantity).await? else {
            warn!(pair = %pair, "Closing sell did not fill");
            return Ok(());
        };

        if let Some(closed) = self.risk.close_position(pair, price) {
            self.emit(TradeEvent::Closed {
                pair: pair.to_string(),
                price: fill.price,
                quantity: closed.quantity,
                realized_pnl: closed.realized_pnl,
                realized_pnl_pct: closed.realized_pnl_pct,
                reason: reason.as_str().to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Evaluate a fresh entry or a DCA buy for a pair with no managed
    /// position conflict.
    async fn consider_entry(
        &mut self,
        pair: &str,
        price: Decimal,
        signal: &TradeSignal,
    ) -> Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            debug!(pair = %pair, "Paused, no new entries");
            return Ok(());
        }
        if is_stablecoin_base(pair) {
            debug!(pair = %pair, "Stablecoin pair, never traded");
            return Ok(());
        }
        if signal.action != Action::Buy {
            return Ok(());
        }
        if signal.confidence < self.config.signal.min_signal_confidence {
            debug!(
                pair = %pair,
                confidence = signal.confidence,
                "Buy signal below confidence floor"
            );
            return Ok(());
        }

        let balance = self.gateway.balance(&self.config.quote_currency).await?;
        if let Err(block) = self.risk.can_open(pair, balance, signal.params.max_positions) {
            debug!(pair = %pair, reason = block.as_str(), "Entry blocked");
            return Ok(());
        }

        let accumulating = self.risk.position(pair).is_some();
        if accumulating && !self.risk.should_accumulate(pair, price) {
            debug!(pair = %pair, "Position not under water enough for DCA");
            return Ok(());
        }

        let amount = self.risk.config().trade_amount;
        let Some(fill) = self.gateway.market_buy(pair, amount).await? else {
            warn!(pair = %pair, "Market buy did not fill");
            return Ok(());
        };

        if accumulating {
            if let Some(new_average) =
                self.risk.accumulate(pair, fill.price, fill.quantity, fill.fee)
            {
                self.emit(TradeEvent::Accumulated {
                    pair: pair.to_string(),
                    price: fill.price,
                    quantity: fill.quantity,
                    fee: fill.fee,
                    new_average_cost: new_average,
                    timestamp: Utc::now(),
                });
            }
        } else {
            let position =
                self.risk
                    .open_position(pair, fill.price, fill.quantity, fill.fee, &signal.params);
            let event = TradeEvent::Opened {
                pair: pair.to_string(),
                price: fill.price,
                quantity: fill.quantity,
                fee: fill.fee,
                stop_loss: position.stop_price,
                take_profit: position.take_profit_price,
                context: signal.context().as_str().to_string(),
                timestamp: Utc::now(),
            };
            self.emit(event);
        }
        Ok(())
    }

    fn emit(&self, event: TradeEvent) {
        if let Some(sender) = &self.events {
            // A dropped receiver only loses reporting, never trading.
            if sender.send(event).is_err() {
                debug!("Event sink closed");
            }
        }
    }
}
