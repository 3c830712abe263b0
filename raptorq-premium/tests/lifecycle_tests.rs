//! End-to-end flows driven through the engine facade with a manual clock.

use std::sync::Arc;

use chrono::Duration;
use raptorq_lib::test_utils::ManualClock;
use raptorq_lib::{EngineError, ErrorKind, KdfParams};
use raptorq_premium::ads::{AdBooking, AdSlotId, BookingOutcome};
use raptorq_premium::config::EngineConfig;
use raptorq_premium::ledger::{DirectPurchaseOutcome, PurchaseStatus, VerifyOutcome};
use raptorq_premium::oracle::RateSource;
use raptorq_premium::storage::{EngineStorage, FileStorage};
use raptorq_premium::test_utils::{png_banner, ScriptedPaymentOracle, ScriptedPriceFeed};
use raptorq_premium::PremiumEngine;
use rust_decimal_macros::dec;
use tempfile::TempDir;

struct Harness {
    engine: PremiumEngine,
    clock: Arc<ManualClock>,
    feed: Arc<ScriptedPriceFeed>,
    payments: Arc<ScriptedPaymentOracle>,
}

fn harness_with(storage: Option<Arc<dyn EngineStorage>>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let clock = Arc::new(ManualClock::default());
    let feed = Arc::new(ScriptedPriceFeed::new(dec!(0.01)));
    let payments = Arc::new(ScriptedPaymentOracle::accepting());
    let config = EngineConfig {
        kdf: KdfParams::low_cost(),
        ..EngineConfig::default()
    };

    let mut builder = PremiumEngine::builder(config)
        .with_clock(clock.clone())
        .with_price_feed(feed.clone())
        .with_payment_oracle(payments.clone());
    if let Some(storage) = storage {
        builder = builder.with_storage(storage);
    }

    Harness {
        engine: builder.build().unwrap(),
        clock,
        feed,
        payments,
    }
}

fn harness() -> Harness {
    harness_with(None)
}

fn wallet_bottom(advertiser: &str) -> AdBooking {
    AdBooking {
        slot: AdSlotId::WalletBottom,
        advertiser: advertiser.to_string(),
        banner: png_banner(600, 120, 8192),
        title: "Secure your RTM".to_string(),
        target_url: "https://example.org/vault".to_string(),
        days: 1,
        tx_reference: format!("tx-{}", advertiser),
    }
}

#[tokio::test]
async fn test_subscription_expires_after_thirty_days() {
    let h = harness();
    let receipt = h
        .engine
        .create_purchase("binarai_unlimited", "alice")
        .await
        .unwrap();
    h.engine
        .verify_payment(&receipt.purchase.id, "tx-1")
        .await
        .unwrap();

    assert!(h.engine.is_active("alice", "binarai_unlimited").await.unwrap());

    h.clock.advance(Duration::days(31));
    assert!(!h.engine.is_active("alice", "binarai_unlimited").await.unwrap());

    let entitlements = h.engine.entitlements("alice").await.unwrap();
    assert_eq!(entitlements.len(), 1);
    assert!(!entitlements[0].active);

    // The purchase itself stays confirmed.
    assert_eq!(
        h.engine
            .purchase_status(&receipt.purchase.id)
            .await
            .unwrap()
            .status,
        PurchaseStatus::Confirmed
    );
}

#[tokio::test]
async fn test_both_purchase_paths_grant_the_same_entitlement() {
    let h = harness();

    let receipt = h
        .engine
        .create_purchase("quantum_vault_pro", "alice")
        .await
        .unwrap();
    let via_ledger = match h
        .engine
        .verify_payment(&receipt.purchase.id, "tx-ledger")
        .await
        .unwrap()
    {
        VerifyOutcome::Confirmed { entitlement, .. } => entitlement.unwrap(),
        other => panic!("unexpected outcome {:?}", other),
    };

    let direct = match h
        .engine
        .purchase_direct("quantum_vault_pro", "bob", "tx-direct")
        .await
        .unwrap()
    {
        DirectPurchaseOutcome::Activated { entitlement, .. } => entitlement,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(via_ledger.expires_at, direct.expires_at);
    assert_eq!(via_ledger.activated_at, direct.activated_at);
    assert!(via_ledger.active && direct.active);
}

#[tokio::test]
async fn test_price_is_frozen_at_creation() {
    let h = harness();
    let receipt = h
        .engine
        .create_purchase("binarai_unlimited", "alice")
        .await
        .unwrap();
    assert_eq!(receipt.purchase.price_local.as_decimal(), dec!(10000));

    h.feed.set_rate(dec!(0.02));
    h.clock.advance(Duration::minutes(10));

    let quote = h.engine.quote("binarai_unlimited").await.unwrap();
    assert_eq!(quote.price_local.as_decimal(), dec!(5000));

    h.engine
        .verify_payment(&receipt.purchase.id, "tx")
        .await
        .unwrap();
    assert_eq!(h.payments.last_amount(), Some(receipt.purchase.price_local));
}

#[tokio::test]
async fn test_unpaid_purchase_expires() {
    let h = harness();
    h.payments.answer(false);
    let receipt = h
        .engine
        .create_purchase("smartnode_manager_pro", "alice")
        .await
        .unwrap();

    let first = h
        .engine
        .verify_payment(&receipt.purchase.id, "tx")
        .await
        .unwrap();
    assert!(matches!(first, VerifyOutcome::Pending { .. }));

    h.clock.advance(Duration::hours(1));
    assert_eq!(
        h.engine
            .purchase_status(&receipt.purchase.id)
            .await
            .unwrap()
            .status,
        PurchaseStatus::Expired
    );

    // Expired is terminal even if the payment shows up later.
    h.payments.answer(true);
    let late = h
        .engine
        .verify_payment(&receipt.purchase.id, "tx")
        .await
        .unwrap();
    assert!(matches!(late, VerifyOutcome::Expired { .. }));
    assert!(!h.engine.is_active("alice", "smartnode_manager_pro").await.unwrap());
}

#[tokio::test]
async fn test_ad_slot_conflict_then_rebook_after_expiry() {
    let h = harness();

    let first = h.engine.book_ad_slot(wallet_bottom("acme")).await.unwrap();
    assert!(matches!(first, BookingOutcome::Booked { .. }));

    let err = h
        .engine
        .book_ad_slot(wallet_bottom("globex"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    h.engine.track_impression(AdSlotId::WalletBottom).await.unwrap();
    h.engine.track_click(AdSlotId::WalletBottom).await.unwrap();
    let analytics = h.engine.advertiser_analytics("acme").await.unwrap();
    assert_eq!(analytics[0].ctr_percent, dec!(100));

    h.clock.advance(Duration::days(1));
    let third = h.engine.book_ad_slot(wallet_bottom("globex")).await.unwrap();
    match third {
        BookingOutcome::Booked { slot, .. } => {
            assert_eq!(slot.advertiser.as_deref(), Some("globex"));
            assert_eq!((slot.clicks, slot.impressions), (0, 0));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(h.engine.advertiser_analytics("acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_feed_outage_uses_fallback_rate() {
    let h = harness();
    h.feed.fail_with("connection refused");

    let listing = h.engine.list_services().await.unwrap();
    assert_eq!(listing.rate.source, RateSource::Fallback);
    assert_eq!(listing.rate.rate, h.engine.config().oracle.fallback_rate);

    // 100 / 0.0012
    let unlimited = listing
        .services
        .iter()
        .find(|s| s.definition.id == "binarai_unlimited")
        .unwrap();
    assert_eq!(unlimited.price_local.to_string(), "83333.33333333");
}

#[tokio::test]
async fn test_state_survives_restart_on_disk() {
    let dir = TempDir::new().unwrap();
    let purchase_id = {
        let h = harness_with(Some(Arc::new(FileStorage::new(dir.path()).unwrap())));
        let receipt = h
            .engine
            .create_purchase("pro_mode_console", "alice")
            .await
            .unwrap();
        h.engine
            .verify_payment(&receipt.purchase.id, "tx")
            .await
            .unwrap();
        h.engine.book_ad_slot(wallet_bottom("acme")).await.unwrap();
        receipt.purchase.id
    };

    let h = harness_with(Some(Arc::new(FileStorage::new(dir.path()).unwrap())));
    assert_eq!(
        h.engine.purchase_status(&purchase_id).await.unwrap().status,
        PurchaseStatus::Confirmed
    );
    assert!(h.engine.is_active("alice", "pro_mode_console").await.unwrap());
    assert!(matches!(
        h.engine.book_ad_slot(wallet_bottom("globex")).await,
        Err(EngineError::SlotOccupied { .. })
    ));
}
