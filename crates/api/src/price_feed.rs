//! Native-asset price feed client.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default ticker endpoint (BNB/USDT spot price).
pub const DEFAULT_PRICE_URL: &str = "https://api.binance.com/api/v3/ticker/price?symbol=BNBUSDT";

/// Default JSON field carrying the price.
pub const DEFAULT_PRICE_FIELD: &str = "price";

/// Price used when the feed is unreachable.
pub const DEFAULT_PRICE: f64 = 600.0;

/// HTTP price feed returning a single numeric price.
///
/// Failures are never fatal: [`price_or_default`](Self::price_or_default)
/// falls back to a constant.
#[derive(Debug, Clone)]
pub struct PriceFeedClient {
    client: reqwest::Client,
    url: String,
    field: String,
    default_price: f64,
}

impl Default for PriceFeedClient {
    fn default() -> Self {
        Self::new(DEFAULT_PRICE_URL, DEFAULT_PRICE_FIELD, DEFAULT_PRICE)
    }
}

impl PriceFeedClient {
    /// Create a client for a feed URL, reading `field` from the JSON body.
    pub fn new(url: impl Into<String>, field: impl Into<String>, default_price: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            field: field.into(),
            default_price,
        }
    }

    /// Feed URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fallback price.
    pub fn default_price(&self) -> f64 {
        self.default_price
    }

    /// Fetch the current price.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch_price(&self) -> Result<f64> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Price feed error: {} - {}", status, body);
        }

        let body: Value = response.json().await?;
        let price = extract_price(&body, &self.field)?;
        debug!(price = price, "Fetched native asset price");
        Ok(price)
    }

    /// Fetch the current price, falling back to the default on any failure.
    pub async fn price_or_default(&self) -> f64 {
        match self.fetch_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    error = %e,
                    default_price = self.default_price,
                    "Price feed unavailable, using default price"
                );
                self.default_price
            }
        }
    }
}

/// Read a positive price from `field`, given either as a JSON number or a
/// numeric string (`{"price": "612.35"}`).
pub fn extract_price(body: &Value, field: &str) -> Result<f64> {
    let raw = body
        .get(field)
        .ok_or_else(|| anyhow!("Price feed response has no '{}' field", field))?;

    let price = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| anyhow!("Price feed field '{}' is not numeric: {}", field, raw))?;

    if !price.is_finite() || price <= 0.0 {
        bail!("Price feed returned non-positive price {}", price);
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_price_string() {
        let body = json!({ "symbol": "BNBUSDT", "price": "612.35000000" });
        assert!((extract_price(&body, "price").unwrap() - 612.35).abs() < 1e-9);
    }

    #[test]
    fn test_extract_price_number() {
        let body = json!({ "usd": 598.1 });
        assert!((extract_price(&body, "usd").unwrap() - 598.1).abs() < 1e-9);
    }

    #[test]
    fn test_extract_price_invalid() {
        assert!(extract_price(&json!({}), "price").is_err());
        assert!(extract_price(&json!({ "price": "abc" }), "price").is_err());
        assert!(extract_price(&json!({ "price": 0 }), "price").is_err());
        assert!(extract_price(&json!({ "price": [1] }), "price").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_feed_falls_back() {
        let client = PriceFeedClient::new("http://127.0.0.1:9/price", "price", 42.0);
        assert_eq!(client.price_or_default().await, 42.0);
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_fetch_live_price() {
        let client = PriceFeedClient::default();
        let price = client.fetch_price().await.unwrap();
        assert!(price > 0.0);
    }
}
