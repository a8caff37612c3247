//! Wire types for the exchange REST API.

use serde::Deserialize;

/// 24-hour rolling ticker statistics.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    pub symbol: String,
    pub last_price: String,
    pub bid_price: String,
    pub ask_price: String,
    pub quote_volume: String,
    pub price_change_percent: String,
    pub close_time: i64,
}

/// One kline row. The API returns a positional array:
/// open time, open, high, low, close, volume, close time, quote volume,
/// trade count, taker buy base, taker buy quote, ignore.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineRow(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub i64,
    pub String,
    pub String,
    pub String,
);

/// Account information from the signed account endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

/// Free/locked balance for one asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// Response to a filled market order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub status: String,
    pub executed_qty: String,
    pub cummulative_quote_qty: String,
    #[serde(default)]
    pub fills: Vec<FillPart>,
}

/// One partial fill inside an order response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPart {
    pub price: String,
    pub qty: String,
    pub commission: String,
    pub commission_asset: String,
}

/// Error body the exchange returns on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}
