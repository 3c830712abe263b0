//! CoinGecko simple-price feed.
//!
//! # Feature Flags
//!
//! Real HTTP requests require the `http-feed` feature (on by default).
//! Without it every fetch fails with `UpstreamUnavailable`, which the
//! oracle turns into the fallback rate.
//!
//! # Example
//!
//! ```rust,ignore
//! use raptorq_premium::config::PriceFeedConfig;
//! use raptorq_premium::oracle::CoinGeckoFeed;
//!
//! let feed = CoinGeckoFeed::new(PriceFeedConfig::coingecko())?;
//! let rate = feed.fetch_rate().await?;
//! ```

use async_trait::async_trait;
use raptorq_lib::{EngineError, Result};
use rust_decimal::Decimal;
#[cfg(feature = "http-feed")]
use std::collections::HashMap;
#[cfg(feature = "http-feed")]
use std::str::FromStr;
#[cfg(feature = "http-feed")]
use std::time::Duration;

use super::PriceFeed;
use crate::config::PriceFeedConfig;

const SOURCE: &str = "CoinGecko";

/// Price feed backed by the CoinGecko `simple/price` endpoint.
pub struct CoinGeckoFeed {
    config: PriceFeedConfig,
    #[cfg(feature = "http-feed")]
    client: reqwest::Client,
}

impl CoinGeckoFeed {
    /// Create a new feed with the given configuration.
    #[cfg(feature = "http-feed")]
    pub fn new(config: PriceFeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::invalid("price_feed", format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create a new feed (stub when feature disabled).
    #[cfg(not(feature = "http-feed"))]
    pub fn new(config: PriceFeedConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &PriceFeedConfig {
        &self.config
    }

    #[cfg(any(feature = "http-feed", test))]
    fn url(&self) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.config.api_url.trim_end_matches('/'),
            self.config.asset_id,
            self.config.vs_currency
        )
    }

    #[cfg(feature = "http-feed")]
    async fn request(&self) -> Result<Decimal> {
        let response = self
            .client
            .get(self.url())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::upstream(SOURCE, format!("timed out after {}s", self.config.timeout_secs))
                } else {
                    EngineError::upstream(SOURCE, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::upstream(SOURCE, format!("HTTP {}", status.as_u16())));
        }

        let body: HashMap<String, HashMap<String, serde_json::Number>> = response
            .json()
            .await
            .map_err(|e| EngineError::upstream(SOURCE, format!("bad response: {}", e)))?;

        let price = body
            .get(&self.config.asset_id)
            .and_then(|quotes| quotes.get(&self.config.vs_currency))
            .ok_or_else(|| {
                EngineError::upstream(
                    SOURCE,
                    format!("no {} quote for {}", self.config.vs_currency, self.config.asset_id),
                )
            })?;

        parse_price(&price.to_string())
    }

    #[cfg(not(feature = "http-feed"))]
    async fn request(&self) -> Result<Decimal> {
        Err(EngineError::upstream(
            SOURCE,
            "HTTP price feed not compiled - enable the 'http-feed' feature",
        ))
    }
}

/// Parse a JSON number, which may use exponent notation for tiny prices.
#[cfg(any(feature = "http-feed", test))]
fn parse_price(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| EngineError::upstream(SOURCE, format!("unparseable price {}: {}", raw, e)))
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    fn source_name(&self) -> &str {
        SOURCE
    }

    async fn fetch_rate(&self) -> Result<Decimal> {
        self.request().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_url() {
        let feed = CoinGeckoFeed::new(PriceFeedConfig::new("https://example.test/api/v3/")).unwrap();
        assert_eq!(
            feed.url(),
            "https://example.test/api/v3/simple/price?ids=raptoreum&vs_currencies=usd"
        );
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("0.00123").unwrap(), dec!(0.00123));
        assert_eq!(parse_price("1.5e-7").unwrap(), dec!(0.00000015));
        assert!(parse_price("NaN").is_err());
    }
}
