//! Per-account entitlements derived from confirmed purchases.
//!
//! An entitlement's `active` flag is never trusted from storage: every read
//! path goes through [`Entitlement::evaluate`], which recomputes it from
//! `expires_at` and the injected clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use raptorq_lib::{Clock, EngineError, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::ServiceCatalog;
use crate::storage::EngineStorage;

/// Access of one account to one paid service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub account: String,
    pub service_id: String,
    pub activated_at: DateTime<Utc>,
    /// None for perpetual entitlements.
    pub expires_at: Option<DateTime<Utc>>,
    /// Recomputed on every read; stored value is informational only.
    pub active: bool,
    /// Purchase that granted the entitlement, if it went through the ledger.
    pub purchase_id: Option<String>,
}

impl Entitlement {
    /// Whether the entitlement grants access at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }

    /// Copy with `active` recomputed for `now`.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Self {
        Self {
            active: self.is_active_at(now),
            ..self.clone()
        }
    }
}

/// Grants and answers entitlement queries.
pub struct SubscriptionManager {
    storage: Arc<dyn EngineStorage>,
    catalog: Arc<ServiceCatalog>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(
        storage: Arc<dyn EngineStorage>,
        catalog: Arc<ServiceCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            catalog,
            clock,
        }
    }

    /// Grant `service_id` to `account` starting now.
    ///
    /// Replaces any earlier entitlement for the pair: re-purchasing resets
    /// the clock rather than stacking duration.
    pub async fn activate(&self, account: &str, service_id: &str) -> Result<Entitlement> {
        self.grant(account, service_id, None).await
    }

    /// Same as [`Self::activate`], recording the granting purchase.
    pub async fn activate_from_purchase(
        &self,
        account: &str,
        service_id: &str,
        purchase_id: &str,
    ) -> Result<Entitlement> {
        self.grant(account, service_id, Some(purchase_id.to_string()))
            .await
    }

    async fn grant(
        &self,
        account: &str,
        service_id: &str,
        purchase_id: Option<String>,
    ) -> Result<Entitlement> {
        if account.is_empty() {
            return Err(EngineError::invalid("account", "must not be empty"));
        }
        let service = self.catalog.get(service_id)?;
        let now = self.clock.now();

        let entitlement = Entitlement {
            account: account.to_string(),
            service_id: service_id.to_string(),
            activated_at: now,
            expires_at: service
                .duration_days
                .map(|days| now + Duration::days(i64::from(days))),
            active: true,
            purchase_id,
        };
        self.storage.put_entitlement(&entitlement).await?;

        tracing::info!(
            account,
            service = service_id,
            expires_at = ?entitlement.expires_at,
            "entitlement activated"
        );
        Ok(entitlement)
    }

    /// Whether `account` currently holds `service_id`.
    pub async fn is_active(&self, account: &str, service_id: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .storage
            .get_entitlement(account, service_id)
            .await?
            .is_some_and(|e| e.is_active_at(now)))
    }

    /// Entitlement for the pair, with `active` recomputed.
    pub async fn entitlement(&self, account: &str, service_id: &str) -> Result<Entitlement> {
        let now = self.clock.now();
        self.storage
            .get_entitlement(account, service_id)
            .await?
            .map(|e| e.evaluate(now))
            .ok_or_else(|| EngineError::not_found("entitlement", format!("{}/{}", account, service_id)))
    }

    /// Every entitlement of `account`, expired ones included.
    pub async fn entitlements_for(&self, account: &str) -> Result<Vec<Entitlement>> {
        let now = self.clock.now();
        let mut entitlements: Vec<Entitlement> = self
            .storage
            .list_entitlements(account)
            .await?
            .iter()
            .map(|e| e.evaluate(now))
            .collect();
        entitlements.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(entitlements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceOracleConfig;
    use crate::oracle::{PriceOracle, StaticPriceFeed};
    use crate::storage::MemoryStorage;
    use raptorq_lib::test_utils::ManualClock;
    use rust_decimal_macros::dec;

    fn manager(clock: Arc<ManualClock>) -> SubscriptionManager {
        let oracle = Arc::new(PriceOracle::new(
            Arc::new(StaticPriceFeed::new(dec!(0.01))),
            clock.clone(),
            PriceOracleConfig::default(),
        ));
        let catalog = Arc::new(ServiceCatalog::with_default_services(oracle));
        SubscriptionManager::new(Arc::new(MemoryStorage::new()), catalog, clock)
    }

    #[tokio::test]
    async fn test_lazy_expiry() {
        let clock = Arc::new(ManualClock::default());
        let manager = manager(clock.clone());

        manager.activate("alice", "binarai_unlimited").await.unwrap();
        assert!(manager.is_active("alice", "binarai_unlimited").await.unwrap());

        clock.advance(Duration::days(31));
        assert!(!manager.is_active("alice", "binarai_unlimited").await.unwrap());

        let ent = manager.entitlement("alice", "binarai_unlimited").await.unwrap();
        assert!(!ent.active);
    }

    #[tokio::test]
    async fn test_perpetual() {
        let clock = Arc::new(ManualClock::default());
        let manager = manager(clock.clone());

        let ent = manager.activate("alice", "pro_mode_console").await.unwrap();
        assert!(ent.expires_at.is_none());

        clock.advance(Duration::days(3650));
        assert!(manager.is_active("alice", "pro_mode_console").await.unwrap());
    }

    #[tokio::test]
    async fn test_repurchase_resets_clock() {
        let clock = Arc::new(ManualClock::default());
        let manager = manager(clock.clone());

        manager.activate("alice", "quantum_vault_pro").await.unwrap();
        clock.advance(Duration::days(20));
        let renewed = manager.activate("alice", "quantum_vault_pro").await.unwrap();

        assert_eq!(renewed.expires_at, Some(clock.now() + Duration::days(30)));
        assert_eq!(manager.entitlements_for("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_service_and_missing_entitlement() {
        let manager = manager(Arc::new(ManualClock::default()));

        assert!(matches!(
            manager.activate("alice", "nope").await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(!manager.is_active("bob", "binarai_unlimited").await.unwrap());
        assert!(matches!(
            manager.entitlement("bob", "binarai_unlimited").await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_entitlements_for_recomputes_each() {
        let clock = Arc::new(ManualClock::default());
        let manager = manager(clock.clone());

        manager.activate("alice", "binarai_unlimited").await.unwrap();
        manager.activate("alice", "binarai_single_asset").await.unwrap();
        clock.advance(Duration::days(45));

        let list = manager.entitlements_for("alice").await.unwrap();
        let by_id = |id: &str| list.iter().find(|e| e.service_id == id).unwrap().active;
        assert!(by_id("binarai_single_asset"));
        assert!(!by_id("binarai_unlimited"));
    }
}
