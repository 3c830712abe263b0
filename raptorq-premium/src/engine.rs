//! One object exposing the whole engine to the HTTP layer.

use std::sync::Arc;

use raptorq_lib::{
    Clock, CredentialEnvelope, Envelope, Result, SignatureGenerator, SignatureRecord, SystemClock,
};

use crate::ads::{AdBooking, AdSlot, AdSlotId, AdvertisingSlotManager, BookingOutcome, SlotAnalytics, SlotListing};
use crate::catalog::{CatalogListing, PricedService, ServiceCatalog};
use crate::config::EngineConfig;
use crate::ledger::{DirectPurchaseOutcome, PurchaseLedger, PurchaseReceipt, PurchaseRecord, VerifyOutcome};
use crate::oracle::{CoinGeckoFeed, PriceFeed, PriceOracle, RateSnapshot};
use crate::payment::{PaymentOracle, StubPaymentOracle};
use crate::storage::{EngineStorage, MemoryStorage};
use crate::subscription::{Entitlement, SubscriptionManager};

/// Collaborators for [`PremiumEngine`]. Unset ones get production defaults:
/// system clock, in-memory storage, CoinGecko feed and the stub payment
/// oracle.
pub struct PremiumEngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    storage: Option<Arc<dyn EngineStorage>>,
    price_feed: Option<Arc<dyn PriceFeed>>,
    payments: Option<Arc<dyn PaymentOracle>>,
}

impl PremiumEngineBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn EngineStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_price_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.price_feed = Some(feed);
        self
    }

    pub fn with_payment_oracle(mut self, payments: Arc<dyn PaymentOracle>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn build(self) -> Result<PremiumEngine> {
        let config = self.config;
        config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let storage: Arc<dyn EngineStorage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(MemoryStorage::new()),
        };
        let payments: Arc<dyn PaymentOracle> = match self.payments {
            Some(payments) => payments,
            None => Arc::new(StubPaymentOracle),
        };
        let price_feed: Arc<dyn PriceFeed> = match self.price_feed {
            Some(feed) => feed,
            None => Arc::new(CoinGeckoFeed::new(config.price_feed.clone())?),
        };

        let oracle = Arc::new(PriceOracle::new(
            price_feed,
            clock.clone(),
            config.oracle.clone(),
        ));
        let catalog = Arc::new(ServiceCatalog::with_default_services(oracle.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            storage.clone(),
            catalog.clone(),
            clock.clone(),
        ));
        let ledger = PurchaseLedger::new(
            storage.clone(),
            catalog.clone(),
            subscriptions.clone(),
            payments.clone(),
            clock.clone(),
            config.payments.clone(),
        );
        let ads = AdvertisingSlotManager::new(
            storage,
            catalog.clone(),
            payments,
            clock.clone(),
            config.advertising.clone(),
            config.payments.clone(),
        );

        tracing::debug!(
            recipient = %config.payments.recipient_address,
            ttl_secs = config.oracle.ttl_secs,
            "premium engine ready"
        );

        Ok(PremiumEngine {
            envelope: CredentialEnvelope::new(config.kdf)?,
            signer: SignatureGenerator::new(clock),
            config,
            oracle,
            catalog,
            subscriptions,
            ledger,
            ads,
        })
    }
}

/// The monetization engine.
pub struct PremiumEngine {
    config: EngineConfig,
    oracle: Arc<PriceOracle>,
    catalog: Arc<ServiceCatalog>,
    subscriptions: Arc<SubscriptionManager>,
    ledger: PurchaseLedger,
    ads: AdvertisingSlotManager,
    envelope: CredentialEnvelope,
    signer: SignatureGenerator,
}

impl PremiumEngine {
    pub fn builder(config: EngineConfig) -> PremiumEngineBuilder {
        PremiumEngineBuilder {
            config,
            clock: None,
            storage: None,
            price_feed: None,
            payments: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &PurchaseLedger {
        &self.ledger
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn ads(&self) -> &AdvertisingSlotManager {
        &self.ads
    }

    // Catalog

    pub async fn list_services(&self) -> Result<CatalogListing> {
        self.catalog.list_services().await
    }

    pub async fn quote(&self, service_id: &str) -> Result<PricedService> {
        self.catalog.quote(service_id).await
    }

    pub async fn exchange_rate(&self) -> RateSnapshot {
        self.oracle.snapshot().await
    }

    // Purchases

    pub async fn create_purchase(&self, service_id: &str, account: &str) -> Result<PurchaseReceipt> {
        self.ledger.create(service_id, account).await
    }

    pub async fn verify_payment(&self, purchase_id: &str, tx_reference: &str) -> Result<VerifyOutcome> {
        self.ledger.verify_payment(purchase_id, tx_reference).await
    }

    pub async fn purchase_direct(
        &self,
        service_id: &str,
        account: &str,
        tx_reference: &str,
    ) -> Result<DirectPurchaseOutcome> {
        self.ledger
            .purchase_direct(service_id, account, tx_reference)
            .await
    }

    pub async fn purchase_status(&self, purchase_id: &str) -> Result<PurchaseRecord> {
        self.ledger.status(purchase_id).await
    }

    // Entitlements

    pub async fn entitlements(&self, account: &str) -> Result<Vec<Entitlement>> {
        self.subscriptions.entitlements_for(account).await
    }

    pub async fn is_active(&self, account: &str, service_id: &str) -> Result<bool> {
        self.subscriptions.is_active(account, service_id).await
    }

    // Advertising

    pub async fn list_ad_slots(&self) -> Result<Vec<SlotListing>> {
        self.ads.list_slots().await
    }

    pub async fn book_ad_slot(&self, booking: AdBooking) -> Result<BookingOutcome> {
        self.ads.book(booking).await
    }

    pub async fn track_click(&self, slot: AdSlotId) -> Result<AdSlot> {
        self.ads.record_click(slot).await
    }

    pub async fn track_impression(&self, slot: AdSlotId) -> Result<AdSlot> {
        self.ads.record_impression(slot).await
    }

    pub async fn advertiser_analytics(&self, advertiser: &str) -> Result<Vec<SlotAnalytics>> {
        self.ads.advertiser_analytics(advertiser).await
    }

    // Credentials and signatures

    pub fn protect_secret(&self, secret: &[u8], password: &str) -> Result<Envelope> {
        self.envelope.protect(secret, password)
    }

    pub fn reveal_secret(&self, envelope: &Envelope, password: &str) -> Result<Vec<u8>> {
        self.envelope.reveal(envelope, password)
    }

    pub fn sign(&self, payload: &str) -> SignatureRecord {
        self.signer.sign_record(payload)
    }

    pub fn verify_signature(&self, payload: &str, signed_at: i64, digest_hex: &str) -> bool {
        self.signer.verify(payload, signed_at, digest_hex)
    }
}
