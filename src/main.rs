//! Adaptive Crypto Trading Bot
//!
//! Classifies each pair's market regime, aggregates weighted indicator
//! votes, and manages positions with DCA accumulation, laddered partial
//! take-profits and a ratcheting trailing stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use coinpilot::advisor::{CachedAdvisor, OpenAiAdvisor};
use coinpilot::api::{BinanceGateway, MarketGateway, PaperGateway};
use coinpilot::bot::{BotConfig, TradingBot};
use coinpilot::signal::{aggregate, classify, compute, MIN_CANDLES};
use coinpilot::trading::{RiskConfig, SignalConfig};

/// Adaptive crypto trading bot CLI.
#[derive(Parser)]
#[command(name = "coinpilot")]
#[command(about = "Regime-aware crypto trading bot", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Pairs to trade
        #[arg(short, long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT")]
        pairs: Vec<String>,

        /// Quote currency the pairs settle in
        #[arg(short, long, default_value = "USDT")]
        quote: String,

        /// Cycle interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Quote currency spent per entry
        #[arg(short, long, default_value = "50")]
        amount: Decimal,

        /// Paper trading: real market data, simulated fills
        #[arg(long)]
        paper: bool,

        /// Starting balance for paper trading
        #[arg(short, long, default_value = "1000")]
        balance: Decimal,

        /// Disable the external advisory vote
        #[arg(long)]
        no_advisor: bool,
    },

    /// Analyze a single pair and print the signal breakdown
    Analyze {
        /// Pair symbol, e.g. BTCUSDT
        pair: String,
    },

    /// Show the default configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            pairs,
            quote,
            interval,
            amount,
            paper,
            balance,
            no_advisor,
        } => {
            let risk = RiskConfig {
                trade_amount: amount,
                ..Default::default()
            };
            let signal = SignalConfig::default();

            let exchange = Arc::new(BinanceGateway::from_env()?);
            let gateway: Arc<dyn MarketGateway> = if paper {
                Arc::new(PaperGateway::new(
                    exchange,
                    &quote,
                    balance,
                    risk.trading_fees_pct,
                ))
            } else {
                exchange
            };

            let advisor = if no_advisor {
                None
            } else {
                match OpenAiAdvisor::from_env() {
                    Ok(advisor) => Some(Arc::new(CachedAdvisor::new(
                        Arc::new(advisor),
                        Duration::from_secs(signal.advisory_refresh_secs),
                    ))),
                    Err(e) => {
                        warn!("Advisor not configured: {}. Trading on indicators only.", e);
                        None
                    }
                }
            };

            let config = BotConfig {
                pairs: pairs.clone(),
                quote_currency: quote.clone(),
                cycle_interval_secs: interval,
                risk,
                signal,
                ..Default::default()
            };

            let mut bot = TradingBot::new(config, gateway, advisor)?;

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            bot.set_event_sink(tx);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "Failed to serialize event"),
                    }
                }
            });

            println!("\n=== Coinpilot ===");
            println!("Pairs:    {}", pairs.join(", "));
            println!("Interval: {interval}s");
            println!(
                "Mode:     {}",
                if paper {
                    "PAPER (simulated fills)"
                } else {
                    "LIVE TRADING"
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            bot.run().await?;
        }

        Commands::Analyze { pair } => {
            let gateway = BinanceGateway::from_env()?;

            let Some(ticker) = gateway.ticker(&pair).await? else {
                println!("Unknown pair: {pair}");
                return Ok(());
            };
            let candles = gateway.candles(&pair, "1h", 100).await?;
            if candles.len() < MIN_CANDLES {
                println!(
                    "Not enough history for {pair}: {} candles (need {MIN_CANDLES})",
                    candles.len()
                );
                return Ok(());
            }
            let Some(snapshot) = compute(&candles) else {
                println!("Could not compute indicators for {pair}");
                return Ok(());
            };

            let params = classify(&snapshot);
            let signal = aggregate(&snapshot, params, None, &SignalConfig::default());

            println!("\n=== {pair} ===");
            println!("Price:       {}", ticker.price);
            println!("24h change:  {:.2}%", ticker.change_24h);

            println!("\n--- Indicators ---");
            println!("RSI(14):     {:.1}", snapshot.rsi);
            println!("MACD hist:   {:.6}", snapshot.macd_histogram);
            println!("EMA 20/50:   {:.4} / {:.4}", snapshot.ema_fast, snapshot.ema_slow);
            println!(
                "Bollinger:   {:.4} / {:.4} / {:.4}",
                snapshot.bb_lower, snapshot.bb_middle, snapshot.bb_upper
            );
            println!("Trend:       {}", snapshot.trend.as_str());
            println!("Volatility:  {:.2}%", snapshot.volatility);
            println!(
                "Range:       {:.4} - {:.4}",
                snapshot.support, snapshot.resistance
            );

            println!("\n--- Regime ---");
            println!("Context:     {}", params.context.as_str());
            println!("Take profit: {}%", params.take_profit_pct);
            println!("Stop loss:   {}%", params.stop_loss_pct);
            println!("Boost:       {:+}", params.confidence_boost);
            println!("Max pos:     {}", params.max_positions);

            println!("\n--- Votes ---");
            for vote in &signal.votes {
                println!(
                    "  {:<8} {:<4} @ {:>5.1}  {}",
                    vote.source,
                    vote.action.as_str(),
                    vote.confidence,
                    vote.reason
                );
            }
            println!(
                "\nSignal:      {} at {:.1} confidence",
                signal.action.as_str(),
                signal.confidence
            );
        }

        Commands::Config => {
            let risk = RiskConfig::default();
            let signal = SignalConfig::default();

            println!("\n=== Risk Configuration ===\n");
            println!("Take Profit:        {}%", risk.take_profit_pct);
            println!("Stop Loss:          {}%", risk.stop_loss_pct);
            println!("Max Positions:      {}", risk.max_positions);
            println!("Max Daily Loss:     {}%", risk.max_daily_loss_pct);
            println!("Trade Amount:       ${}", risk.trade_amount);
            println!("Trailing Stop:      {}", risk.use_trailing_stop);
            println!("Trading Fees:       {}%", risk.trading_fees_pct);
            println!("DCA Enabled:        {}", risk.enable_dca);
            println!("DCA Threshold:      {}%", risk.dca_threshold_pct);

            println!("\n=== Signal Configuration ===\n");
            println!("RSI Oversold:       {}", signal.rsi_oversold);
            println!("RSI Overbought:     {}", signal.rsi_overbought);
            println!("Advisory Threshold: {}", signal.advisory_confidence_threshold);
            println!("Min Confidence:     {}", signal.min_signal_confidence);
            println!("Advisory Refresh:   {}s", signal.advisory_refresh_secs);

            info!("Defaults shown; override via CLI flags or environment");
        }
    }

    Ok(())
}
