//! External advisory opinions.
//!
//! An advisory service turns an indicator snapshot into a directional
//! opinion that joins the vote as one weighted participant. Opinions are
//! cached per pair with a TTL so the external call happens at most once per
//! refresh window; on a failed refresh the stale opinion is served rather
//! than dropping the vote.

pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::signal::{Action, IndicatorSnapshot, MarketContext};

pub use openai::OpenAiAdvisor;

/// A directional opinion with a confidence in [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advice {
    pub action: Action,
    pub confidence: f64,
    pub rationale: String,
}

/// Source of advisory opinions.
#[async_trait]
pub trait AdvisoryService: Send + Sync {
    async fn advise(
        &self,
        pair: &str,
        snapshot: &IndicatorSnapshot,
        context: MarketContext,
    ) -> Result<Advice>;
}

struct CacheEntry {
    advice: Advice,
    fetched_at: Instant,
}

/// Per-pair TTL cache in front of an advisory service.
pub struct CachedAdvisor {
    inner: Arc<dyn AdvisoryService>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedAdvisor {
    pub fn new(inner: Arc<dyn AdvisoryService>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh-or-cached opinion for a pair. Returns `None` only when there is
    /// no cached opinion and the refresh fails.
    pub async fn advice(
        &self,
        pair: &str,
        snapshot: &IndicatorSnapshot,
        context: MarketContext,
    ) -> Option<Advice> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(pair) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!(pair = %pair, "advisory cache hit");
                    return Some(entry.advice.clone());
                }
            }
        }

        match self.inner.advise(pair, snapshot, context).await {
            Ok(advice) => {
                let mut cache = self.cache.lock().await;
                cache.insert(
                    pair.to_string(),
                    CacheEntry {
                        advice: advice.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(advice)
            }
            Err(e) => {
                warn!(pair = %pair, error = %e, "advisory refresh failed");
                let cache = self.cache.lock().await;
                cache.get(pair).map(|entry| entry.advice.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAdvisor {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl AdvisoryService for CountingAdvisor {
        async fn advise(
            &self,
            _pair: &str,
            _snapshot: &IndicatorSnapshot,
            _context: MarketContext,
        ) -> Result<Advice> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail && call > 0 {
                anyhow::bail!("upstream unavailable");
            }
            Ok(Advice {
                action: Action::Buy,
                confidence: 75.0,
                rationale: format!("call {call}"),
            })
        }
    }

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
            trend: crate::signal::Trend::Sideways,
            volatility: 1.0,
            support: 95.0,
            resistance: 110.0,
            price_change_24h: 0.0,
            current_price: 100.0,
            computed_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_call_within_ttl_hits_cache() {
        let inner = Arc::new(CountingAdvisor {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let cached = CachedAdvisor::new(inner.clone(), Duration::from_secs(300));
        let snap = snapshot();

        cached
            .advice("BTCUSDT", &snap, MarketContext::Consolidation)
            .await;
        cached
            .advice("BTCUSDT", &snap, MarketContext::Consolidation)
            .await;

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pairs_are_cached_independently() {
        let inner = Arc::new(CountingAdvisor {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let cached = CachedAdvisor::new(inner.clone(), Duration::from_secs(300));
        let snap = snapshot();

        cached
            .advice("BTCUSDT", &snap, MarketContext::Consolidation)
            .await;
        cached
            .advice("ETHUSDT", &snap, MarketContext::Consolidation)
            .await;

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_opinion_served_when_refresh_fails() {
        let inner = Arc::new(CountingAdvisor {
            calls: AtomicU32::new(0),
            fail: true,
        });
        // Zero TTL forces a refresh attempt on every call.
        let cached = CachedAdvisor::new(inner, Duration::from_secs(0));
        let snap = snapshot();

        let first = cached
            .advice("BTCUSDT", &snap, MarketContext::Consolidation)
            .await
            .unwrap();
        let second = cached
            .advice("BTCUSDT", &snap, MarketContext::Consolidation)
            .await
            .unwrap();

        assert_eq!(first.rationale, "call 0");
        assert_eq!(second.rationale, "call 0");
    }

    #[tokio::test]
    async fn no_cache_and_failure_yields_none() {
        let inner = Arc::new(CountingAdvisor {
            calls: AtomicU32::new(1),
            fail: true,
        });
        let cached = CachedAdvisor::new(inner, Duration::from_secs(300));
        let snap = snapshot();

        assert!(cached
            .advice("BTCUSDT", &snap, MarketContext::Consolidation)
            .await
            .is_none());
    }
}
