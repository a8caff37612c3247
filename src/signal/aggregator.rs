//! Multi-signal voting aggregator.
//!
//! Each indicator family casts at most one weighted vote per cycle. Votes are
//! regime-conditioned: a regime can suppress a vote entirely or change its
//! weight. A strict majority picks the action, the winning side's mean weight
//! is the confidence, and the regime boost is applied last.

use serde::{Deserialize, Serialize};

use super::context::{AdaptiveParams, MarketContext};
use super::indicators::{IndicatorSnapshot, Trend};
use crate::advisor::Advice;
use crate::trading::SignalConfig;

/// Direction of a vote or of the final signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

/// A single weighted vote from one signal source.
#[derive(Debug, Clone, Serialize)]
pub struct Vote {
    pub source: &'static str,
    pub action: Action,
    /// Weight in [0, 100].
    pub confidence: f64,
    pub reason: String,
}

/// Final aggregated decision for one pair, one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSignal {
    pub action: Action,
    /// Clamped to [0, 100] after the regime boost.
    pub confidence: f64,
    pub params: AdaptiveParams,
    pub votes: Vec<Vote>,
}

impl TradeSignal {
    pub fn context(&self) -> MarketContext {
        self.params.context
    }
}

/// Aggregate indicator and advisory votes into a trade signal.
pub fn aggregate(
    snapshot: &IndicatorSnapshot,
    params: AdaptiveParams,
    advice: Option<&Advice>,
    config: &SignalConfig,
) -> TradeSignal {
    let votes = collect_votes(snapshot, params.context, advice, config);
    let (action, base_confidence) = tally(&votes);
    let confidence = (base_confidence + params.confidence_boost).clamp(0.0, 100.0);

    TradeSignal {
        action,
        confidence,
        params,
        votes,
    }
}

fn collect_votes(
    snapshot: &IndicatorSnapshot,
    context: MarketContext,
    advice: Option<&Advice>,
    config: &SignalConfig,
) -> Vec<Vote> {
    let mut votes = Vec::with_capacity(5);
    let contrarian_window = matches!(
        context,
        MarketContext::CrashRecovery | MarketContext::DipOpportunity
    );

    // RSI: buy weight scales with how deep the oversold reading is, and the
    // overbought sell is suppressed while momentum carries the move.
    if snapshot.rsi < 25.0 && contrarian_window {
        votes.push(Vote {
            source: "rsi",
            action: Action::Buy,
            confidence: 80.0,
            reason: format!("deeply oversold (RSI {:.1})", snapshot.rsi),
        });
    } else if snapshot.rsi < 35.0 && context == MarketContext::DipOpportunity {
        votes.push(Vote {
            source: "rsi",
            action: Action::Buy,
            confidence: 70.0,
            reason: format!("oversold dip (RSI {:.1})", snapshot.rsi),
        });
    } else if snapshot.rsi < config.rsi_oversold {
        votes.push(Vote {
            source: "rsi",
            action: Action::Buy,
            confidence: 65.0,
            reason: format!("oversold (RSI {:.1})", snapshot.rsi),
        });
    } else if snapshot.rsi > config.rsi_overbought && context != MarketContext::StrongMomentum {
        votes.push(Vote {
            source: "rsi",
            action: Action::Sell,
            confidence: 60.0,
            reason: format!("overbought (RSI {:.1})", snapshot.rsi),
        });
    }

    // MACD histogram: bearish cross is ignored in contrarian regimes.
    if snapshot.macd_histogram > 0.0 {
        let weight = if context == MarketContext::StrongMomentum {
            75.0
        } else {
            60.0
        };
        votes.push(Vote {
            source: "macd",
            action: Action::Buy,
            confidence: weight,
            reason: "bullish histogram".to_string(),
        });
    } else if snapshot.macd_histogram < 0.0 && !contrarian_window {
        votes.push(Vote {
            source: "macd",
            action: Action::Sell,
            confidence: 60.0,
            reason: "bearish histogram".to_string(),
        });
    }

    // EMA cross: the bearish side is ignored in contrarian regimes.
    if snapshot.ema_fast > snapshot.ema_slow {
        votes.push(Vote {
            source: "ema",
            action: Action::Buy,
            confidence: 50.0,
            reason: "fast EMA above slow".to_string(),
        });
    } else if !contrarian_window {
        votes.push(Vote {
            source: "ema",
            action: Action::Sell,
            confidence: 50.0,
            reason: "fast EMA below slow".to_string(),
        });
    }

    // Trend: a strong downtrend is a contrarian buy during crash recovery.
    match snapshot.trend {
        Trend::StrongUptrend => votes.push(Vote {
            source: "trend",
            action: Action::Buy,
            confidence: 60.0,
            reason: "strong uptrend".to_string(),
        }),
        Trend::Uptrend => votes.push(Vote {
            source: "trend",
            action: Action::Buy,
            confidence: 40.0,
            reason: "uptrend".to_string(),
        }),
        Trend::StrongDowntrend if context == MarketContext::CrashRecovery => votes.push(Vote {
            source: "trend",
            action: Action::Buy,
            confidence: 50.0,
            reason: "capitulation in crash recovery".to_string(),
        }),
        Trend::Downtrend | Trend::StrongDowntrend
            if !contrarian_window && context != MarketContext::ReversalSetup =>
        {
            votes.push(Vote {
                source: "trend",
                action: Action::Sell,
                confidence: 40.0,
                reason: "downtrend".to_string(),
            })
        }
        _ => {}
    }

    // Advisory vote only counts above the configured confidence floor.
    if let Some(advice) = advice {
        if advice.confidence >= config.advisory_confidence_threshold {
            votes.push(Vote {
                source: "advisor",
                action: advice.action,
                confidence: advice.confidence,
                reason: advice.rationale.clone(),
            });
        }
    }

    votes
}

/// Strict-majority tally. Buy wins only when it beats both sell and hold
/// counts (sell mirrored); otherwise hold. Confidence is the mean weight of
/// the winning side, or the mean of all votes for a hold.
fn tally(votes: &[Vote]) -> (Action, f64) {
    let buys: Vec<f64> = votes
        .iter()
        .filter(|v| v.action == Action::Buy)
        .map(|v| v.confidence)
        .collect();
    let sells: Vec<f64> = votes
        .iter()
        .filter(|v| v.action == Action::Sell)
        .map(|v| v.confidence)
        .collect();
    let holds = votes.len() - buys.len() - sells.len();

    let mean = |xs: &[f64]| {
        if xs.is_empty() {
            0.0
        } else {
            xs.iter().sum::<f64>() / xs.len() as f64
        }
    };

    if buys.len() > sells.len() && buys.len() > holds {
        (Action::Buy, mean(&buys))
    } else if sells.len() > buys.len() && sells.len() > holds {
        (Action::Sell, mean(&sells))
    } else {
        let all: Vec<f64> = votes.iter().map(|v| v.confidence).collect();
        (Action::Hold, mean(&all))
    }
}
