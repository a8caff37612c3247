//! OpenAI-backed advisory service.
//!
//! Sends a compact summary of the indicator snapshot to the chat completions
//! endpoint and expects a strict JSON object back: action, confidence,
//! rationale. A malformed or out-of-range reply is an error; the cache layer
//! decides what to do with it.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::signal::{Action, IndicatorSnapshot, MarketContext};

use super::{Advice, AdvisoryService};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You are a cryptocurrency market analyst. Given \
technical indicators for a trading pair, reply with a JSON object with \
exactly these fields: \"action\" (one of \"buy\", \"sell\", \"hold\"), \
\"confidence\" (number 0-100), \"rationale\" (one short sentence). Reply \
with JSON only.";

/// Advisory service backed by the OpenAI chat completions API.
pub struct OpenAiAdvisor {
    http: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawAdvice {
    action: String,
    confidence: f64,
    rationale: String,
}

impl OpenAiAdvisor {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// Create from `OPENAI_API_KEY` and optional `OPENAI_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?;
        Self::new(api_key, std::env::var("OPENAI_MODEL").ok())
    }

    fn prompt(pair: &str, snapshot: &IndicatorSnapshot, context: MarketContext) -> String {
        format!(
            "Pair: {pair}\n\
             Market context: {}\n\
             Price: {:.6}\n\
             24h change: {:.2}%\n\
             RSI(14): {:.1}\n\
             MACD histogram: {:.6}\n\
             EMA20 vs EMA50: {:.6} / {:.6}\n\
             Trend: {}\n\
             Volatility: {:.2}%\n\
             Support: {:.6}, Resistance: {:.6}",
            context.as_str(),
            snapshot.current_price,
            snapshot.price_change_24h,
            snapshot.rsi,
            snapshot.macd_histogram,
            snapshot.ema_fast,
            snapshot.ema_slow,
            snapshot.trend.as_str(),
            snapshot.volatility,
            snapshot.support,
            snapshot.resistance,
        )
    }

    fn parse_advice(content: &str) -> Result<Advice> {
        let raw: RawAdvice =
            serde_json::from_str(content.trim()).context("advisory reply is not valid JSON")?;

        let action = match raw.action.as_str() {
            "buy" => Action::Buy,
            "sell" => Action::Sell,
            "hold" => Action::Hold,
            other => return Err(anyhow!("unknown advisory action: {other}")),
        };

        if !(0.0..=100.0).contains(&raw.confidence) {
            return Err(anyhow!(
                "advisory confidence out of range: {}",
                raw.confidence
            ));
        }

        Ok(Advice {
            action,
            confidence: raw.confidence,
            rationale: raw.rationale,
        })
    }
}

#[async_trait]
impl AdvisoryService for OpenAiAdvisor {
    async fn advise(
        &self,
        pair: &str,
        snapshot: &IndicatorSnapshot,
        context: MarketContext,
    ) -> Result<Advice> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::prompt(pair, snapshot, context) },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.2,
        });

        debug!(pair = %pair, model = %self.model, "requesting advisory opinion");

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("advisory request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("advisory request failed: {status} - {text}"));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse advisory response")?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("advisory response has no choices"))?;

        Self::parse_advice(content)
    }
}
