//! Exchange-rate cache in front of an external price feed.
//!
//! The oracle serves the price of one local asset unit in the reference
//! currency. A fetched quote is reused until its time-to-live runs out;
//! after that the next caller refreshes it. Whenever the feed fails, times
//! out, or reports a non-positive price, the configured fallback rate is
//! served and the cache is left untouched.

mod coingecko;

pub use coingecko::CoinGeckoFeed;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use raptorq_lib::{Clock, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::PriceOracleConfig;

/// External quote service.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Human-readable source name reported with live quotes.
    fn source_name(&self) -> &str;

    /// Fetch the current rate (reference currency per local unit).
    async fn fetch_rate(&self) -> Result<Decimal>;
}

/// Feed that always reports the same rate.
#[derive(Debug, Clone)]
pub struct StaticPriceFeed {
    rate: Decimal,
}

impl StaticPriceFeed {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    fn source_name(&self) -> &str {
        "static"
    }

    async fn fetch_rate(&self) -> Result<Decimal> {
        Ok(self.rate)
    }
}

/// A cached rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl PriceQuote {
    /// Whether the quote may still be served at `now`.
    ///
    /// A time-to-live chrono cannot represent is treated as already elapsed.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.rate > Decimal::ZERO
            && Duration::try_seconds(self.ttl_secs)
                .map_or(false, |ttl| now.signed_duration_since(self.fetched_at) < ttl)
    }
}

/// Where a served rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Fetched from the feed during this call.
    Live,
    /// Served from a fresh cached quote.
    Cached,
    /// Feed unavailable; the configured constant.
    Fallback,
}

/// Rate plus the metadata catalog listings report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub rate: Decimal,
    pub source: RateSource,
    /// Name of the feed, or "fallback".
    pub provider: String,
    /// When the served quote was fetched (None for the fallback).
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Cache-or-refresh front for a [`PriceFeed`].
pub struct PriceOracle {
    feed: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
    config: PriceOracleConfig,
    cache: Mutex<Option<PriceQuote>>,
}

impl PriceOracle {
    pub fn new(feed: Arc<dyn PriceFeed>, clock: Arc<dyn Clock>, config: PriceOracleConfig) -> Self {
        Self {
            feed,
            clock,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Current rate.
    pub async fn get_rate(&self) -> Decimal {
        self.snapshot().await.rate
    }

    /// Current rate with its provenance.
    ///
    /// The cache lock is held across the refresh, so concurrent callers that
    /// find the quote stale wait for one fetch instead of issuing their own.
    pub async fn snapshot(&self) -> RateSnapshot {
        let mut cache = self.cache.lock().await;

        if let Some(quote) = cache.as_ref() {
            if quote.is_fresh(self.clock.now()) {
                return RateSnapshot {
                    rate: quote.rate,
                    source: RateSource::Cached,
                    provider: self.feed.source_name().to_string(),
                    fetched_at: Some(quote.fetched_at),
                };
            }
        }

        let timeout = StdDuration::from_secs(self.config.fetch_timeout_secs);
        let reason = match tokio::time::timeout(timeout, self.feed.fetch_rate()).await {
            Ok(Ok(rate)) if rate > Decimal::ZERO => {
                let fetched_at = self.clock.now();
                *cache = Some(PriceQuote {
                    rate,
                    fetched_at,
                    ttl_secs: i64::try_from(self.config.ttl_secs).unwrap_or(i64::MAX),
                });
                tracing::debug!(%rate, source = self.feed.source_name(), "refreshed exchange rate");
                return RateSnapshot {
                    rate,
                    source: RateSource::Live,
                    provider: self.feed.source_name().to_string(),
                    fetched_at: Some(fetched_at),
                };
            }
            Ok(Ok(rate)) => format!("non-positive rate {}", rate),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}s", self.config.fetch_timeout_secs),
        };

        tracing::warn!(
            fallback = %self.config.fallback_rate,
            "price feed unavailable, serving fallback rate: {}",
            reason
        );
        self.fallback()
    }

    /// Last cached quote, fresh or not.
    pub async fn cached_quote(&self) -> Option<PriceQuote> {
        self.cache.lock().await.clone()
    }

    /// Drop the cached quote so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    fn fallback(&self) -> RateSnapshot {
        RateSnapshot {
            rate: self.config.fallback_rate,
            source: RateSource::Fallback,
            provider: "fallback".to_string(),
            fetched_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedPriceFeed;
    use raptorq_lib::test_utils::ManualClock;
    use rust_decimal_macros::dec;

    fn oracle(feed: Arc<ScriptedPriceFeed>, clock: Arc<ManualClock>) -> PriceOracle {
        PriceOracle::new(
            feed,
            clock,
            PriceOracleConfig::default()
                .with_ttl(300)
                .with_fallback_rate(dec!(0.0012)),
        )
    }

    #[tokio::test]
    async fn test_cached_within_ttl() {
        let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
        let clock = Arc::new(ManualClock::default());
        let oracle = oracle(feed.clone(), clock.clone());

        let first = oracle.snapshot().await;
        clock.advance(Duration::seconds(299));
        let second = oracle.snapshot().await;

        assert_eq!(first.source, RateSource::Live);
        assert_eq!(second.source, RateSource::Cached);
        assert_eq!(first.rate, second.rate);
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_after_ttl() {
        let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
        let clock = Arc::new(ManualClock::default());
        let oracle = oracle(feed.clone(), clock.clone());

        oracle.get_rate().await;
        feed.set_rate(dec!(0.02));
        clock.advance(Duration::seconds(300));

        assert_eq!(oracle.get_rate().await, dec!(0.02));
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test]
    async fn test_feed_error_serves_fallback_without_touching_cache() {
        let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
        let clock = Arc::new(ManualClock::default());
        let oracle = oracle(feed.clone(), clock.clone());

        oracle.get_rate().await;
        let cached = oracle.cached_quote().await.unwrap();

        clock.advance(Duration::seconds(301));
        feed.fail_with("503 service unavailable");

        let snapshot = oracle.snapshot().await;
        assert_eq!(snapshot.source, RateSource::Fallback);
        assert_eq!(snapshot.rate, dec!(0.0012));
        assert_eq!(oracle.cached_quote().await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_non_positive_rate_serves_fallback() {
        let feed = Arc::new(ScriptedPriceFeed::new(Decimal::ZERO));
        let clock = Arc::new(ManualClock::default());
        let oracle = oracle(feed.clone(), clock);

        let snapshot = oracle.snapshot().await;
        assert_eq!(snapshot.source, RateSource::Fallback);
        assert!(oracle.cached_quote().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_serves_fallback() {
        let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
        feed.set_delay(StdDuration::from_secs(60));
        let clock = Arc::new(ManualClock::default());
        let oracle = PriceOracle::new(
            feed.clone(),
            clock,
            PriceOracleConfig::default().with_fetch_timeout(2),
        );

        let snapshot = oracle.snapshot().await;
        assert_eq!(snapshot.source, RateSource::Fallback);
        assert!(oracle.cached_quote().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_ttl_does_not_panic() {
        let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
        let oracle = PriceOracle::new(
            feed.clone(),
            Arc::new(ManualClock::default()),
            PriceOracleConfig::default().with_ttl(9_999_999_999_999_999),
        );

        assert_eq!(oracle.get_rate().await, dec!(0.01));
        assert_eq!(oracle.get_rate().await, dec!(0.01));
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
        let clock = Arc::new(ManualClock::default());
        let oracle = oracle(feed.clone(), clock);

        oracle.get_rate().await;
        oracle.invalidate().await;
        oracle.get_rate().await;

        assert_eq!(feed.calls(), 2);
    }

    #[test]
    fn test_quote_freshness() {
        let fetched_at = Utc::now();
        let quote = PriceQuote {
            rate: dec!(0.5),
            fetched_at,
            ttl_secs: 10,
        };
        assert!(quote.is_fresh(fetched_at + Duration::seconds(9)));

        let unbounded = PriceQuote {
            ttl_secs: i64::MAX,
            ..quote.clone()
        };
        assert!(!unbounded.is_fresh(fetched_at));
        assert!(!quote.is_fresh(fetched_at + Duration::seconds(10)));

        let zero = PriceQuote {
            rate: Decimal::ZERO,
            ..quote
        };
        assert!(!zero.is_fresh(fetched_at));
    }
}
