//! Paper-trading gateway: real market data, simulated fills.
//!
//! Wraps a live gateway for tickers and candles, keeps an in-memory balance
//! sheet, and fills market orders at the current ask (buys) or bid (sells)
//! with the configured fee applied.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{Candle, Ticker};

use super::{split_pair, GatewayError, MarketGateway, OrderFill};

/// Simulated execution on top of live market data.
pub struct PaperGateway {
    inner: Arc<dyn MarketGateway>,
    balances: Mutex<HashMap<String, Decimal>>,
    fee_pct: Decimal,
}

impl PaperGateway {
    /// Start with `starting_balance` of `quote_currency` on the sheet.
    pub fn new(
        inner: Arc<dyn MarketGateway>,
        quote_currency: &str,
        starting_balance: Decimal,
        fee_pct: Decimal,
    ) -> Self {
        let mut balances = HashMap::new();
        balances.insert(quote_currency.to_string(), starting_balance);
        Self {
            inner,
            balances: Mutex::new(balances),
            fee_pct,
        }
    }

    fn split(pair: &str) -> Result<(&str, &str), GatewayError> {
        split_pair(pair).ok_or_else(|| GatewayError::Parse(format!("unrecognized pair: {pair}")))
    }
}

#[async_trait]
impl MarketGateway for PaperGateway {
    async fn ticker(&self, pair: &str) -> Result<Option<Ticker>, GatewayError> {
        self.inner.ticker(pair).await
    }

    async fn candles(
        &self,
        pair: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.inner.candles(pair, interval, limit).await
    }

    async fn balance(&self, currency: &str) -> Result<Decimal, GatewayError> {
        let balances = self.balances.lock().await;
        Ok(balances.get(currency).copied().unwrap_or(Decimal::ZERO))
    }

    async fn market_buy(
        &self,
        pair: &str,
        quote_amount: Decimal,
    ) -> Result<Option<OrderFill>, GatewayError> {
        let (base, quote) = Self::split(pair)?;
        let Some(ticker) = self.inner.ticker(pair).await? else {
            return Ok(None);
        };
        if ticker.ask.is_zero() {
            return Ok(None);
        }

        let mut balances = self.balances.lock().await;
        let available = balances.get(quote).copied().unwrap_or(Decimal::ZERO);
        if available < quote_amount {
            return Err(GatewayError::OrderRejected(format!(
                "paper balance {available} {quote} below {quote_amount}"
            )));
        }

        let fee = quote_amount * self.fee_pct / dec!(100);
        let quantity = (quote_amount - fee) / ticker.ask;

        *balances.entry(quote.to_string()).or_default() -= quote_amount;
        *balances.entry(base.to_string()).or_default() += quantity;

        info!(
            pair = %pair,
            price = %ticker.ask,
            quantity = %quantity,
            fee = %fee,
            "paper buy filled"
        );

        Ok(Some(OrderFill {
            pair: pair.to_string(),
            price: ticker.ask,
            quantity,
            fee,
            quote_spent: quote_amount,
            timestamp: Utc::now(),
        }))
    }

    async fn market_sell(
        &self,
        pair: &str,
        quantity: Decimal,
    ) -> Result<Option<OrderFill>, GatewayError> {
        let (base, quote) = Self::split(pair)?;
        let Some(ticker) = self.inner.ticker(pair).await? else {
            return Ok(None);
        };
        if ticker.bid.is_zero() {
            return Ok(None);
        }

        let mut balances = self.balances.lock().await;
        let held = balances.get(base).copied().unwrap_or(Decimal::ZERO);
        if held < quantity {
            return Err(GatewayError::OrderRejected(format!(
                "paper balance {held} {base} below {quantity}"
            )));
        }

        let gross = quantity * ticker.bid;
        let fee = gross * self.fee_pct / dec!(100);

        *balances.entry(base.to_string()).or_default() -= quantity;
        *balances.entry(quote.to_string()).or_default() += gross - fee;

        info!(
            pair = %pair,
            price = %ticker.bid,
            quantity = %quantity,
            fee = %fee,
            "paper sell filled"
        );

        Ok(Some(OrderFill {
            pair: pair.to_string(),
            price: ticker.bid,
            quantity,
            fee,
            quote_spent: gross,
            timestamp: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedQuotes;

    #[async_trait]
    impl MarketGateway for FixedQuotes {
        async fn ticker(&self, pair: &str) -> Result<Option<Ticker>, GatewayError> {
            Ok(Some(Ticker {
                pair: pair.to_string(),
                price: dec!(100),
                bid: dec!(99),
                ask: dec!(101),
                volume: dec!(1000000),
                change_24h: 0.0,
                timestamp: Utc::now(),
            }))
        }

        async fn candles(
            &self,
            _pair: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, GatewayError> {
            Ok(vec![])
        }

        async fn balance(&self, _currency: &str) -> Result<Decimal, GatewayError> {
            Ok(Decimal::ZERO)
        }

        async fn market_buy(
            &self,
            _pair: &str,
            _quote_amount: Decimal,
        ) -> Result<Option<OrderFill>, GatewayError> {
            Ok(None)
        }

        async fn market_sell(
            &self,
            _pair: &str,
            _quantity: Decimal,
        ) -> Result<Option<OrderFill>, GatewayError> {
            Ok(None)
        }
    }

    fn paper() -> PaperGateway {
        PaperGateway::new(Arc::new(FixedQuotes), "USDT", dec!(1000), dec!(0.1))
    }

    #[tokio::test]
    async fn buy_fills_at_ask_and_debits_quote() {
        let gw = paper();
        let fill = gw.market_buy("BTCUSDT", dec!(101)).await.unwrap().unwrap();

        assert_eq!(fill.price, dec!(101));
        // 101 spent, 0.101 fee, (101 - 0.101) / 101 BTC bought.
        assert_eq!(fill.fee, dec!(0.101));
        assert_eq!(fill.quantity, dec!(0.999));

        assert_eq!(gw.balance("USDT").await.unwrap(), dec!(899));
        assert_eq!(gw.balance("BTC").await.unwrap(), dec!(0.999));
    }

    #[tokio::test]
    async fn sell_fills_at_bid_and_credits_quote() {
        let gw = paper();
        gw.market_buy("BTCUSDT", dec!(101)).await.unwrap();
        let fill = gw.market_sell("BTCUSDT", dec!(0.999)).await.unwrap().unwrap();

        assert_eq!(fill.price, dec!(99));
        assert_eq!(gw.balance("BTC").await.unwrap(), Decimal::ZERO);
        // Credited 0.999 * 99 minus 0.1% fee.
        let expected = dec!(899) + dec!(98.901) - dec!(0.098901);
        assert_eq!(gw.balance("USDT").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn buy_beyond_balance_is_rejected() {
        let gw = paper();
        let err = gw.market_buy("BTCUSDT", dec!(2000)).await.unwrap_err();
        assert!(matches!(err, GatewayError::OrderRejected(_)));
    }

    #[tokio::test]
    async fn sell_without_holdings_is_rejected() {
        let gw = paper();
        let err = gw.market_sell("BTCUSDT", dec!(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::OrderRejected(_)));
    }
}
