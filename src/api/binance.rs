//! Binance spot gateway.
//!
//! Public endpoints (ticker, klines) need no credentials; the account and
//! order endpoints use HMAC-SHA256 signed queries with the API key header.
//! Transient transport failures and 5xx/429 responses are retried with
//! exponential backoff before an error is surfaced.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::models::{Candle, Ticker};

use super::types::*;
use super::{GatewayError, MarketGateway, OrderFill};

const API_BASE: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BUDGET: Duration = Duration::from_secs(15);

/// Exchange error code for an unknown trading pair.
const ERR_INVALID_SYMBOL: i64 = -1121;

type HmacSha256 = Hmac<Sha256>;

/// REST gateway to Binance spot.
pub struct BinanceGateway {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl BinanceGateway {
    /// Create a gateway. Credentials are optional; without them only the
    /// public market-data endpoints work.
    pub fn new(api_key: Option<String>, api_secret: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: API_BASE.to_string(),
            api_key,
            api_secret,
        })
    }

    /// Create from `BINANCE_API_KEY` / `BINANCE_API_SECRET` when set.
    pub fn from_env() -> Result<Self> {
        Self::new(
            std::env::var("BINANCE_API_KEY").ok(),
            std::env::var("BINANCE_API_SECRET").ok(),
        )
    }

    /// Custom base URL, for tests.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn credentials(&self) -> Result<(&str, &str), GatewayError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(GatewayError::MissingCredentials("BINANCE_API_KEY"))?;
        let secret = self
            .api_secret
            .as_deref()
            .ok_or(GatewayError::MissingCredentials("BINANCE_API_SECRET"))?;
        Ok((key, secret))
    }

    fn sign(secret: &str, query: &str) -> String {
        // Key length is arbitrary for HMAC, this cannot fail.
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(RETRY_BUDGET),
            ..Default::default()
        }
    }

    /// Perform a request with retries. 5xx and 429 are retried; other
    /// failures are final.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &str,
        signed: bool,
    ) -> Result<T, GatewayError> {
        backoff::future::retry(Self::retry_policy(), || {
            let method = method.clone();
            async move {
                let (url, key) = if signed {
                    let (key, secret) = self.credentials().map_err(backoff::Error::permanent)?;
                    let timestamp = Utc::now().timestamp_millis();
                    let full = if query.is_empty() {
                        format!("timestamp={timestamp}")
                    } else {
                        format!("{query}&timestamp={timestamp}")
                    };
                    let signature = Self::sign(secret, &full);
                    (
                        format!("{}{}?{}&signature={}", self.base_url, path, full, signature),
                        Some(key),
                    )
                } else if query.is_empty() {
                    (format!("{}{}", self.base_url, path), None)
                } else {
                    (format!("{}{}?{}", self.base_url, path, query), None)
                };

                debug!(path = path, "exchange request");

                let mut builder = self.http.request(method, &url);
                if let Some(key) = key {
                    builder = builder.header("X-MBX-APIKEY", key);
                }

                let response = builder.send().await.map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        backoff::Error::transient(GatewayError::Http(e))
                    } else {
                        backoff::Error::permanent(GatewayError::Http(e))
                    }
                })?;

                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(status = %status, path = path, "retryable exchange response");
                    return Err(backoff::Error::transient(GatewayError::Api {
                        code: status.as_u16() as i64,
                        message: "retryable status".to_string(),
                    }));
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let error = match serde_json::from_str::<ApiError>(&body) {
                        Ok(api) => GatewayError::Api {
                            code: api.code,
                            message: api.msg,
                        },
                        Err(_) => GatewayError::Api {
                            code: status.as_u16() as i64,
                            message: body,
                        },
                    };
                    return Err(backoff::Error::permanent(error));
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| backoff::Error::permanent(GatewayError::Parse(e.to_string())))
            }
        })
        .await
    }

    fn fill_from_order(pair: &str, order: OrderResponse) -> Result<Option<OrderFill>, GatewayError> {
        let quantity = parse_decimal(&order.executed_qty, "executedQty")?;
        let quote_spent = parse_decimal(&order.cummulative_quote_qty, "cummulativeQuoteQty")?;
        if quantity.is_zero() {
            return Ok(None);
        }
        let price = quote_spent / quantity;

        let (base, quote) = super::split_pair(pair).unwrap_or(("", ""));
        let mut fee = Decimal::ZERO;
        for part in &order.fills {
            let commission = parse_decimal(&part.commission, "commission")?;
            if part.commission_asset == quote {
                fee += commission;
            } else if part.commission_asset == base {
                fee += commission * price;
            } else {
                // Fee paid in a third asset (e.g. BNB): not convertible here.
                warn!(
                    pair = %pair,
                    asset = %part.commission_asset,
                    "commission in foreign asset ignored"
                );
            }
        }

        Ok(Some(OrderFill {
            pair: pair.to_string(),
            price,
            quantity,
            fee,
            quote_spent,
            timestamp: Utc::now(),
        }))
    }
}

#[async_trait]
impl MarketGateway for BinanceGateway {
    async fn ticker(&self, pair: &str) -> Result<Option<Ticker>, GatewayError> {
        let query = format!("symbol={pair}");
        let raw: Ticker24hr = match self
            .request(Method::GET, "/api/v3/ticker/24hr", &query, false)
            .await
        {
            Ok(raw) => raw,
            Err(GatewayError::Api { code, .. }) if code == ERR_INVALID_SYMBOL => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(Some(Ticker {
            pair: raw.symbol,
            price: parse_decimal(&raw.last_price, "lastPrice")?,
            bid: parse_decimal(&raw.bid_price, "bidPrice")?,
            ask: parse_decimal(&raw.ask_price, "askPrice")?,
            volume: parse_decimal(&raw.quote_volume, "quoteVolume")?,
            change_24h: parse_f64(&raw.price_change_percent, "priceChangePercent")?,
            timestamp: Utc
                .timestamp_millis_opt(raw.close_time)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    async fn candles(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        let query = format!("symbol={pair}&interval={interval}&limit={limit}");
        let rows: Vec<KlineRow> = self
            .request(Method::GET, "/api/v3/klines", &query, false)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Candle {
                    timestamp: Utc
                        .timestamp_millis_opt(row.0)
                        .single()
                        .ok_or_else(|| GatewayError::Parse("bad kline open time".to_string()))?,
                    open: parse_f64(&row.1, "open")?,
                    high: parse_f64(&row.2, "high")?,
                    low: parse_f64(&row.3, "low")?,
                    close: parse_f64(&row.4, "close")?,
                    volume: parse_f64(&row.5, "volume")?,
                })
            })
            .collect()
    }

    async fn balance(&self, currency: &str) -> Result<Decimal, GatewayError> {
        let account: AccountInfo = self
            .request(Method::GET, "/api/v3/account", "", true)
            .await?;

        account
            .balances
            .iter()
            .find(|b| b.asset == currency)
            .map(|b| parse_decimal(&b.free, "free"))
            .unwrap_or(Ok(Decimal::ZERO))
    }

    async fn market_buy(
        &self,
        pair: &str,
        quote_amount: Decimal,
    ) -> Result<Option<OrderFill>, GatewayError> {
        let query = format!("symbol={pair}&side=BUY&type=MARKET&quoteOrderQty={quote_amount}");
        let order: OrderResponse = self
            .request(Method::POST, "/api/v3/order", &query, true)
            .await?;

        if order.status == "REJECTED" || order.status == "EXPIRED" {
            return Err(GatewayError::OrderRejected(order.status));
        }
        Self::fill_from_order(pair, order)
    }

    async fn market_sell(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<Option<OrderFill>, GatewayError> {
        let query = format!("symbol={pair}&side=SELL&type=MARKET&quantity={quantity}");
        let order: OrderResponse = self
            .request(Method::POST, "/api/v3/order", &query, true)
            .await?;

        if order.status == "REJECTED" || order.status == "EXPIRED" {
            return Err(GatewayError::OrderRejected(order.status));
        }
        Self::fill_from_order(pair, order)
    }
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal, GatewayError> {
    Decimal::from_str(value).map_err(|e| GatewayError::Parse(format!("{field}: {e}")))
}

fn parse_f64(value: &str, field: &str) -> Result<f64, GatewayError> {
    value
        .parse::<f64>()
        .map_err(|e| GatewayError::Parse(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signature_matches_known_vector() {
        // Example vector from the exchange API docs.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1\
                     &price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            BinanceGateway::sign(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn fill_averages_price_and_sums_quote_fees() {
        let order = OrderResponse {
            symbol: "BTCUSDT".to_string(),
            order_id: 1,
            status: "FILLED".to_string(),
            executed_qty: "2".to_string(),
            cummulative_quote_qty: "200".to_string(),
            fills: vec![
                FillPart {
                    price: "99".to_string(),
                    qty: "1".to_string(),
                    commission: "0.05".to_string(),
                    commission_asset: "USDT".to_string(),
                },
                FillPart {
                    price: "101".to_string(),
                    qty: "1".to_string(),
                    commission: "0.001".to_string(),
                    commission_asset: "BTC".to_string(),
                },
            ],
        };

        let fill = BinanceGateway::fill_from_order("BTCUSDT", order)
            .unwrap()
            .unwrap();
        assert_eq!(fill.price, dec!(100));
        assert_eq!(fill.quantity, dec!(2));
        // 0.05 USDT + 0.001 BTC at the average price.
        assert_eq!(fill.fee, dec!(0.15));
    }

    #[test]
    fn unfilled_order_is_none() {
        let order = OrderResponse {
            symbol: "BTCUSDT".to_string(),
            order_id: 2,
            status: "FILLED".to_string(),
            executed_qty: "0".to_string(),
            cummulative_quote_qty: "0".to_string(),
            fills: vec![],
        };
        assert!(BinanceGateway::fill_from_order("BTCUSDT", order)
            .unwrap()
            .is_none());
    }
}
