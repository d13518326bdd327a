//! CryptoWatch REST client for exchange OHLC candles and spot prices.
//!
//! Prices are returned as the decimal text the API sent so callers can
//! convert them to fixed-point without a float round trip.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::networker::{NetworkError, Networker};

/// Default CryptoWatch REST endpoint.
pub const CRYPTOWATCH_BASE_URL: &str = "https://api.cryptowat.ch";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-CW-API-Key";

/// One OHLC candle, reduced to the open and close edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OhlcPeriod {
    /// Start of the candle (close time minus the period length)
    pub open_time: u64,
    /// End of the candle
    pub close_time: u64,
    /// Open price as decimal text
    pub open_price: String,
    /// Close price as decimal text
    pub close_price: String,
}

/// CryptoWatch client bound to one exchange/pair market.
#[derive(Clone)]
pub struct CryptoWatchClient {
    networker: Arc<dyn Networker>,
    base_url: String,
    exchange: String,
    pair: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for CryptoWatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoWatchClient")
            .field("base_url", &self.base_url)
            .field("exchange", &self.exchange)
            .field("pair", &self.pair)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl CryptoWatchClient {
    /// Create a client for `exchange`/`pair`.
    pub fn new(
        networker: Arc<dyn Networker>,
        exchange: impl Into<String>,
        pair: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            networker,
            base_url: CRYPTOWATCH_BASE_URL.to_string(),
            exchange: exchange.into(),
            pair: pair.into(),
            api_key,
        }
    }

    /// Override the REST endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Market identifier, e.g. `coinbase-pro/ethusd`.
    pub fn market(&self) -> String {
        format!("{}/{}", self.exchange, self.pair)
    }

    /// URL for candles closing in `(after, before]` with the given period in seconds.
    pub fn ohlc_url(&self, after: u64, before: u64, period: u64) -> String {
        format!(
            "{}/markets/{}/{}/ohlc?before={}&after={}&periods={}",
            self.base_url, self.exchange, self.pair, before, after, period
        )
    }

    /// URL for the latest trade price.
    pub fn price_url(&self) -> String {
        format!("{}/markets/{}/{}/price", self.base_url, self.exchange, self.pair)
    }

    fn headers(&self) -> Vec<(&'static str, &str)> {
        self.api_key
            .as_deref()
            .map(|key| (API_KEY_HEADER, key))
            .into_iter()
            .collect()
    }

    /// Fetch candles between `after` and `before`, sorted oldest first.
    #[instrument(skip(self), fields(market = %self.market()))]
    pub async fn fetch_ohlc(
        &self,
        after: u64,
        before: u64,
        period: u64,
    ) -> Result<Vec<OhlcPeriod>, NetworkError> {
        let url = self.ohlc_url(after, before, period);
        let response = self.networker.get_json(&url, &self.headers()).await?;
        let periods = parse_ohlc(&response, period)
            .map_err(|reason| NetworkError::InvalidResponse { url, reason })?;

        debug!(count = periods.len(), "Fetched OHLC periods");
        Ok(periods)
    }

    /// Fetch the latest trade price as decimal text.
    #[instrument(skip(self), fields(market = %self.market()))]
    pub async fn fetch_price(&self) -> Result<String, NetworkError> {
        let url = self.price_url();
        let response = self.networker.get_json(&url, &self.headers()).await?;
        parse_price(&response).map_err(|reason| NetworkError::InvalidResponse { url, reason })
    }
}

/// Parse `{"result": {"<period>": [[close, open, high, low, close_price, ...], ...]}}`.
///
/// Any missing or mistyped field fails the whole response.
pub fn parse_ohlc(response: &Value, period: u64) -> Result<Vec<OhlcPeriod>, String> {
    let rows = response
        .get("result")
        .and_then(|result| result.get(period.to_string()))
        .and_then(Value::as_array)
        .ok_or_else(|| format!("missing result.{} array", period))?;

    let mut periods = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let fields = row
            .as_array()
            .filter(|fields| fields.len() >= 5)
            .ok_or_else(|| format!("row {} is not an OHLC array", index))?;

        let close_time = fields[0]
            .as_u64()
            .ok_or_else(|| format!("row {} has an invalid close time", index))?;
        let open_price = number_text(&fields[1])
            .ok_or_else(|| format!("row {} has an invalid open price", index))?;
        let close_price = number_text(&fields[4])
            .ok_or_else(|| format!("row {} has an invalid close price", index))?;

        periods.push(OhlcPeriod {
            open_time: close_time.saturating_sub(period),
            close_time,
            open_price,
            close_price,
        });
    }

    periods.sort_by_key(|p| p.open_time);
    Ok(periods)
}

/// Parse `{"result": {"price": <number>}}`.
pub fn parse_price(response: &Value) -> Result<String, String> {
    response
        .get("result")
        .and_then(|result| result.get("price"))
        .and_then(number_text)
        .ok_or_else(|| "missing result.price".to_string())
}

fn number_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
