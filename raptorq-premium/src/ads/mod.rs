//! Exclusive advertising placements.
//!
//! There is a fixed set of slots. Each holds at most one live booking; a
//! booking ends when `expires_at` passes, and any read after that sees the
//! slot vacant with the advertiser fields cleared. Nothing sweeps slots in
//! the background.

pub mod banner;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use raptorq_lib::{Clock, EngineError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::catalog::ServiceCatalog;
use crate::config::{AdvertisingConfig, PaymentConfig};
use crate::payment::{check_payment, redeem, PaymentCheck, PaymentOracle};
use crate::storage::EngineStorage;

pub use banner::{validate_banner, BannerInfo};

/// Retries for counter updates that keep losing the version race.
const MAX_COUNTER_ATTEMPTS: usize = 16;

/// Placement identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdSlotId {
    HeaderBanner,
    SidebarBanner,
    WalletBottom,
}

impl AdSlotId {
    pub const ALL: [AdSlotId; 3] = [
        AdSlotId::HeaderBanner,
        AdSlotId::SidebarBanner,
        AdSlotId::WalletBottom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdSlotId::HeaderBanner => "header_banner",
            AdSlotId::SidebarBanner => "sidebar_banner",
            AdSlotId::WalletBottom => "wallet_bottom",
        }
    }
}

impl fmt::Display for AdSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdSlotId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| EngineError::not_found("ad slot", s))
    }
}

/// Stored state of one placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSlot {
    pub id: AdSlotId,
    pub active: bool,
    pub advertiser: Option<String>,
    /// SHA-256 of the banner image.
    pub banner_ref: Option<String>,
    pub title: Option<String>,
    pub target_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub clicks: u64,
    pub impressions: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub tx_reference: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl AdSlot {
    /// A slot with no booking.
    pub fn vacant(id: AdSlotId) -> Self {
        Self {
            id,
            active: false,
            advertiser: None,
            banner_ref: None,
            title: None,
            target_url: None,
            expires_at: None,
            clicks: 0,
            impressions: 0,
            created_at: None,
            tx_reference: None,
            version: 0,
        }
    }

    /// Whether a booking is running at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_some_and(|expires| expires > now)
    }

    /// The slot as it should be presented at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Self {
        if self.is_live_at(now) {
            self.clone()
        } else {
            Self {
                version: self.version,
                ..Self::vacant(self.id)
            }
        }
    }
}

/// A booking request.
#[derive(Debug, Clone)]
pub struct AdBooking {
    pub slot: AdSlotId,
    pub advertiser: String,
    /// Raw PNG bytes.
    pub banner: Vec<u8>,
    pub title: String,
    pub target_url: String,
    pub days: u32,
    pub tx_reference: String,
}

/// Result of [`AdvertisingSlotManager::book`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingOutcome {
    Booked { slot: AdSlot, cost_local: Amount },
    /// Payment not seen yet (or the oracle was unavailable); nothing booked.
    PaymentPending { reason: String },
}

/// Slot state plus its current price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotListing {
    #[serde(flatten)]
    pub slot: AdSlot,
    pub daily_price_major: Amount,
    pub daily_price_local: Amount,
}

/// Performance of one live booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAnalytics {
    pub slot: AdSlotId,
    pub title: Option<String>,
    pub clicks: u64,
    pub impressions: u64,
    /// Click-through rate in percent, two decimals.
    pub ctr_percent: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy)]
enum Counter {
    Click,
    Impression,
}

/// Books slots and tracks their counters.
pub struct AdvertisingSlotManager {
    storage: Arc<dyn EngineStorage>,
    catalog: Arc<ServiceCatalog>,
    payments: Arc<dyn PaymentOracle>,
    clock: Arc<dyn Clock>,
    config: AdvertisingConfig,
    payment_config: PaymentConfig,
}

impl AdvertisingSlotManager {
    pub fn new(
        storage: Arc<dyn EngineStorage>,
        catalog: Arc<ServiceCatalog>,
        payments: Arc<dyn PaymentOracle>,
        clock: Arc<dyn Clock>,
        config: AdvertisingConfig,
        payment_config: PaymentConfig,
    ) -> Self {
        Self {
            storage,
            catalog,
            payments,
            clock,
            config,
            payment_config,
        }
    }

    /// Book a slot for `booking.days` days after verifying payment.
    ///
    /// Fails with `SlotOccupied` if a booking is live, either up front or
    /// because a concurrent booking was stored first.
    pub async fn book(&self, booking: AdBooking) -> Result<BookingOutcome> {
        self.validate_request(&booking)?;

        let (stored, expected) = self.load(booking.slot).await?;
        let now = self.clock.now();
        if stored.is_live_at(now) {
            return Err(occupied(&stored));
        }

        let banner = validate_banner(&booking.banner)?;
        let daily = self
            .catalog
            .convert(Amount::new(self.config.daily_price_major))
            .await?;
        let cost = daily
            .checked_mul(booking.days)
            .ok_or_else(|| EngineError::invalid("days", "booking cost overflows"))?;

        let check = check_payment(
            self.payments.as_ref(),
            StdDuration::from_secs(self.payment_config.verify_timeout_secs),
            &booking.tx_reference,
            &self.payment_config.recipient_address,
            cost,
        )
        .await;
        match check {
            PaymentCheck::Verified => {}
            PaymentCheck::Rejected => {
                return Ok(BookingOutcome::PaymentPending {
                    reason: "payment not found".to_string(),
                })
            }
            PaymentCheck::Unavailable(reason) => {
                return Ok(BookingOutcome::PaymentPending { reason })
            }
        }

        let now = self.clock.now();
        let expires_at = Duration::try_days(i64::from(booking.days))
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| EngineError::invalid("days", "booking would end out of range"))?;

        let owner = format!("ad:{}:{}", booking.slot, Uuid::new_v4());
        redeem(self.storage.as_ref(), &booking.tx_reference, &owner).await?;

        let slot = AdSlot {
            id: booking.slot,
            active: true,
            advertiser: Some(booking.advertiser.clone()),
            banner_ref: Some(banner.content_hash),
            title: Some(booking.title.clone()),
            target_url: Some(booking.target_url.clone()),
            expires_at: Some(expires_at),
            clicks: 0,
            impressions: 0,
            created_at: Some(now),
            tx_reference: Some(booking.tx_reference.clone()),
            version: 0,
        };

        if !self.storage.save_slot(&slot, expected).await? {
            self.storage
                .release_tx(&booking.tx_reference, &owner)
                .await?;
            let (winner, _) = self.load(booking.slot).await?;
            tracing::warn!(
                slot = %booking.slot,
                advertiser = %booking.advertiser,
                tx = %booking.tx_reference,
                "verified ad payment lost booking race, transaction released"
            );
            return Err(if winner.is_live_at(self.clock.now()) {
                occupied(&winner)
            } else {
                EngineError::Conflict(format!("slot {} changed concurrently", booking.slot))
            });
        }

        let (slot, _) = self.load(booking.slot).await?;
        tracing::info!(
            slot = %slot.id,
            advertiser = %booking.advertiser,
            days = booking.days,
            cost = %cost,
            "ad slot booked"
        );
        Ok(BookingOutcome::Booked {
            slot,
            cost_local: cost,
        })
    }

    /// Count a click on a live booking.
    pub async fn record_click(&self, slot: AdSlotId) -> Result<AdSlot> {
        self.increment(slot, Counter::Click).await
    }

    /// Count an impression on a live booking.
    pub async fn record_impression(&self, slot: AdSlotId) -> Result<AdSlot> {
        self.increment(slot, Counter::Impression).await
    }

    /// Every slot with its current state and price.
    pub async fn list_slots(&self) -> Result<Vec<SlotListing>> {
        let daily_major = Amount::new(self.config.daily_price_major);
        let daily_local = self.catalog.convert(daily_major).await?;
        let mut listings = Vec::with_capacity(AdSlotId::ALL.len());
        for id in AdSlotId::ALL {
            listings.push(SlotListing {
                slot: self.slot(id).await?,
                daily_price_major: daily_major,
                daily_price_local: daily_local,
            });
        }
        Ok(listings)
    }

    /// One slot as it stands now.
    pub async fn slot(&self, id: AdSlotId) -> Result<AdSlot> {
        let (slot, _) = self.load(id).await?;
        Ok(slot.evaluate(self.clock.now()))
    }

    /// Counters of every live booking held by `advertiser`.
    pub async fn advertiser_analytics(&self, advertiser: &str) -> Result<Vec<SlotAnalytics>> {
        let mut analytics = Vec::new();
        for id in AdSlotId::ALL {
            let slot = self.slot(id).await?;
            if slot.advertiser.as_deref() != Some(advertiser) {
                continue;
            }
            analytics.push(SlotAnalytics {
                slot: id,
                ctr_percent: click_through_rate(slot.clicks, slot.impressions),
                title: slot.title,
                clicks: slot.clicks,
                impressions: slot.impressions,
                expires_at: slot.expires_at,
            });
        }
        Ok(analytics)
    }

    async fn increment(&self, id: AdSlotId, counter: Counter) -> Result<AdSlot> {
        for _ in 0..MAX_COUNTER_ATTEMPTS {
            let (mut slot, expected) = self.load(id).await?;
            if !slot.is_live_at(self.clock.now()) {
                return Err(EngineError::not_found("active ad slot", id.as_str()));
            }
            match counter {
                Counter::Click => slot.clicks += 1,
                Counter::Impression => slot.impressions += 1,
            }
            if self.storage.save_slot(&slot, expected).await? {
                slot.version = expected.map_or(1, |v| v + 1);
                return Ok(slot);
            }
        }
        Err(EngineError::Conflict(format!(
            "slot {} is too contended, retry",
            id
        )))
    }

    /// Stored slot (vacant if never written) and the version to swap against.
    async fn load(&self, id: AdSlotId) -> Result<(AdSlot, Option<u64>)> {
        Ok(match self.storage.get_slot(id).await? {
            Some(slot) => {
                let version = slot.version;
                (slot, Some(version))
            }
            None => (AdSlot::vacant(id), None),
        })
    }

    fn validate_request(&self, booking: &AdBooking) -> Result<()> {
        if booking.days == 0 || booking.days > self.config.max_days {
            return Err(EngineError::invalid(
                "days",
                format!("must be between 1 and {}", self.config.max_days),
            ));
        }
        if booking.advertiser.trim().is_empty() {
            return Err(EngineError::invalid("advertiser", "must not be empty"));
        }
        if booking.title.trim().is_empty() {
            return Err(EngineError::invalid("title", "must not be empty"));
        }
        if !(booking.target_url.starts_with("https://") || booking.target_url.starts_with("http://"))
        {
            return Err(EngineError::invalid("target_url", "must be an http(s) URL"));
        }
        Ok(())
    }
}

fn occupied(slot: &AdSlot) -> EngineError {
    EngineError::SlotOccupied {
        slot: slot.id.to_string(),
        until: slot.expires_at.map_or(0, |t| t.timestamp()),
    }
}

fn click_through_rate(clicks: u64, impressions: u64) -> Decimal {
    if impressions == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(clicks) * Decimal::ONE_HUNDRED / Decimal::from(impressions))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
