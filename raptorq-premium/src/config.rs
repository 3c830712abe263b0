//! Configuration types for the premium engine.
//!
//! # Environment Variables
//!
//! [`EngineConfig::from_env`] starts from the defaults and overrides:
//!
//! - `RAPTORQ_PRICE_API_URL` - Price feed base URL
//! - `RAPTORQ_PRICE_TTL_SECS` - Rate cache time-to-live
//! - `RAPTORQ_FALLBACK_RATE` - Rate served when the feed is unavailable
//! - `RAPTORQ_PAYMENT_ADDRESS` - Address purchases must be paid to
//! - `RAPTORQ_PAYMENT_WINDOW_SECS` - How long a pending purchase stays payable
//! - `RAPTORQ_AD_DAILY_PRICE_USD` - Daily price of an advertising slot
//! - `RAPTORQ_AD_MAX_DAYS` - Longest advertising booking accepted

use raptorq_lib::{EngineError, KdfParams, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Longest payment window accepted (30 days).
pub const MAX_PAYMENT_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// Longest rate cache time-to-live accepted (1 day).
pub const MAX_PRICE_TTL_SECS: u64 = 24 * 60 * 60;

/// Longest advertising booking accepted (10 years).
pub const MAX_AD_DAYS: u32 = 3650;

/// Upper bound on the feed and payment-oracle timeouts.
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Configuration for the HTTP price feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    /// API base URL (e.g., `https://api.coingecko.com/api/v3`).
    pub api_url: String,

    /// Asset identifier as known to the feed.
    #[serde(default = "default_asset_id")]
    pub asset_id: String,

    /// Quote currency.
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,

    /// Request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

fn default_asset_id() -> String {
    "raptoreum".to_string()
}

fn default_vs_currency() -> String {
    "usd".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

impl PriceFeedConfig {
    /// Create a new feed configuration.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            asset_id: default_asset_id(),
            vs_currency: default_vs_currency(),
            timeout_secs: default_fetch_timeout(),
        }
    }

    /// CoinGecko public API.
    pub fn coingecko() -> Self {
        Self::new("https://api.coingecko.com/api/v3")
    }

    /// Set the asset identifier.
    pub fn with_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = asset_id.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self::coingecko()
    }
}

/// Rate cache policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceOracleConfig {
    /// How long a fetched rate is served from cache.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Rate served when the feed fails.
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate: Decimal,

    /// Upper bound on a single fetch, independent of the feed's own timeout.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_ttl() -> u64 {
    300 // 5 minutes
}

fn default_fallback_rate() -> Decimal {
    dec!(0.0012)
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            fallback_rate: default_fallback_rate(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl PriceOracleConfig {
    /// Set the cache time-to-live.
    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl_secs = secs;
        self
    }

    /// Set the fallback rate.
    pub fn with_fallback_rate(mut self, rate: Decimal) -> Self {
        self.fallback_rate = rate;
        self
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, secs: u64) -> Self {
        self.fetch_timeout_secs = secs;
        self
    }
}

/// Payment collection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Address every purchase must be paid to.
    pub recipient_address: String,

    /// Seconds a pending purchase can still be confirmed.
    #[serde(default = "default_payment_window")]
    pub payment_window_secs: i64,

    /// Upper bound on a payment-oracle call.
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
}

fn default_payment_window() -> i64 {
    3600 // 1 hour
}

fn default_verify_timeout() -> u64 {
    15
}

impl PaymentConfig {
    pub fn new(recipient_address: impl Into<String>) -> Self {
        Self {
            recipient_address: recipient_address.into(),
            payment_window_secs: default_payment_window(),
            verify_timeout_secs: default_verify_timeout(),
        }
    }

    /// Set the verification timeout.
    pub fn with_verify_timeout(mut self, secs: u64) -> Self {
        self.verify_timeout_secs = secs;
        self
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self::new("RTMpremiumServicesTreasury000000000")
    }
}

/// Advertising slot pricing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdvertisingConfig {
    /// Price of one slot-day in the reference currency.
    #[serde(default = "default_daily_price")]
    pub daily_price_major: Decimal,

    /// Longest booking accepted, in days.
    #[serde(default = "default_max_days")]
    pub max_days: u32,
}

fn default_daily_price() -> Decimal {
    dec!(50)
}

fn default_max_days() -> u32 {
    90
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            daily_price_major: default_daily_price(),
            max_days: default_max_days(),
        }
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub oracle: PriceOracleConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
    #[serde(default)]
    pub advertising: AdvertisingConfig,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl EngineConfig {
    /// Defaults overridden by `RAPTORQ_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("RAPTORQ_PRICE_API_URL") {
            config.price_feed.api_url = url;
        }
        if let Some(ttl) = lookup("RAPTORQ_PRICE_TTL_SECS") {
            config.oracle.ttl_secs = parse_var("RAPTORQ_PRICE_TTL_SECS", &ttl)?;
        }
        if let Some(rate) = lookup("RAPTORQ_FALLBACK_RATE") {
            config.oracle.fallback_rate = parse_var("RAPTORQ_FALLBACK_RATE", &rate)?;
        }
        if let Some(address) = lookup("RAPTORQ_PAYMENT_ADDRESS") {
            config.payments.recipient_address = address;
        }
        if let Some(window) = lookup("RAPTORQ_PAYMENT_WINDOW_SECS") {
            config.payments.payment_window_secs = parse_var("RAPTORQ_PAYMENT_WINDOW_SECS", &window)?;
        }
        if let Some(price) = lookup("RAPTORQ_AD_DAILY_PRICE_USD") {
            config.advertising.daily_price_major = parse_var("RAPTORQ_AD_DAILY_PRICE_USD", &price)?;
        }
        if let Some(days) = lookup("RAPTORQ_AD_MAX_DAYS") {
            config.advertising.max_days = parse_var("RAPTORQ_AD_MAX_DAYS", &days)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.oracle.fallback_rate <= Decimal::ZERO {
            return Err(EngineError::invalid("fallback_rate", "must be positive"));
        }
        if self.oracle.ttl_secs > MAX_PRICE_TTL_SECS {
            return Err(EngineError::invalid(
                "ttl_secs",
                format!("must be at most {}", MAX_PRICE_TTL_SECS),
            ));
        }
        if self.payments.payment_window_secs <= 0
            || self.payments.payment_window_secs > MAX_PAYMENT_WINDOW_SECS
        {
            return Err(EngineError::invalid(
                "payment_window_secs",
                format!("must be between 1 and {}", MAX_PAYMENT_WINDOW_SECS),
            ));
        }
        for (name, secs) in [
            ("fetch_timeout_secs", self.oracle.fetch_timeout_secs),
            ("timeout_secs", self.price_feed.timeout_secs),
            ("verify_timeout_secs", self.payments.verify_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(EngineError::invalid(
                    name,
                    format!("must be between 1 and {}", MAX_TIMEOUT_SECS),
                ));
            }
        }
        if self.payments.recipient_address.is_empty() {
            return Err(EngineError::invalid("recipient_address", "must not be empty"));
        }
        if self.advertising.daily_price_major <= Decimal::ZERO {
            return Err(EngineError::invalid("daily_price_major", "must be positive"));
        }
        if self.advertising.max_days == 0 || self.advertising.max_days > MAX_AD_DAYS {
            return Err(EngineError::invalid(
                "max_days",
                format!("must be between 1 and {}", MAX_AD_DAYS),
            ));
        }
        self.kdf.validate()
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| EngineError::invalid(name, e.to_string()))
}
