//! Static table of purchasable premium services.
//!
//! Definitions are fixed at start-up and priced in the reference currency.
//! Local-asset prices are computed on every read from the oracle's current
//! rate; only the rate itself is cached.

use std::collections::HashSet;
use std::sync::Arc;

use raptorq_lib::{EngineError, Result};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::oracle::{PriceOracle, RateSnapshot};

/// Product line a service belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Ai,
    Security,
    Infrastructure,
    Tools,
    Advertising,
}

/// A purchasable offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    /// Fixed price in the reference currency.
    pub reference_price_major: Amount,
    pub category: ServiceCategory,
    /// Entitlement length; None means a perpetual one-time purchase.
    pub duration_days: Option<u32>,
}

impl ServiceDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        reference_price_major: Amount,
        category: ServiceCategory,
        duration_days: Option<u32>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            reference_price_major,
            category,
            duration_days,
        }
    }

    pub fn is_perpetual(&self) -> bool {
        self.duration_days.is_none()
    }
}

/// Service definition with its price in the local asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedService {
    #[serde(flatten)]
    pub definition: ServiceDefinition,
    pub price_local: Amount,
}

/// Catalog listing returned to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogListing {
    pub services: Vec<PricedService>,
    pub rate: RateSnapshot,
}

/// The premium services sold by the wallet.
pub fn default_services() -> Vec<ServiceDefinition> {
    vec![
        ServiceDefinition::new(
            "binarai_unlimited",
            "BinarAi Unlimited",
            Amount::new(dec!(100)),
            ServiceCategory::Ai,
            Some(30),
        ),
        ServiceDefinition::new(
            "binarai_single_asset",
            "BinarAi Single Asset",
            Amount::new(dec!(5)),
            ServiceCategory::Ai,
            None,
        ),
        ServiceDefinition::new(
            "quantum_vault_pro",
            "Quantum Vault Pro",
            Amount::new(dec!(25)),
            ServiceCategory::Security,
            Some(30),
        ),
        ServiceDefinition::new(
            "smartnode_manager_pro",
            "Smartnode Manager Pro",
            Amount::new(dec!(50)),
            ServiceCategory::Infrastructure,
            Some(30),
        ),
        ServiceDefinition::new(
            "pro_mode_console",
            "Pro Mode Console",
            Amount::new(dec!(15)),
            ServiceCategory::Tools,
            None,
        ),
    ]
}

/// Service table enriched with live pricing.
pub struct ServiceCatalog {
    definitions: Vec<ServiceDefinition>,
    oracle: Arc<PriceOracle>,
}

impl ServiceCatalog {
    /// Build a catalog. Service ids must be unique and prices positive.
    pub fn new(definitions: Vec<ServiceDefinition>, oracle: Arc<PriceOracle>) -> Result<Self> {
        let mut seen = HashSet::new();
        for def in &definitions {
            if !seen.insert(def.id.as_str()) {
                return Err(EngineError::invalid("service id", format!("duplicate {}", def.id)));
            }
            if !def.reference_price_major.is_positive() {
                return Err(EngineError::invalid(
                    "reference_price_major",
                    format!("{} must be positive", def.id),
                ));
            }
            if def.duration_days == Some(0) {
                return Err(EngineError::invalid(
                    "duration_days",
                    format!("{} must be at least one day", def.id),
                ));
            }
        }
        Ok(Self {
            definitions,
            oracle,
        })
    }

    /// Catalog with [`default_services`].
    pub fn with_default_services(oracle: Arc<PriceOracle>) -> Self {
        Self {
            definitions: default_services(),
            oracle,
        }
    }

    /// Look up a definition.
    pub fn get(&self, service_id: &str) -> Result<&ServiceDefinition> {
        self.definitions
            .iter()
            .find(|d| d.id == service_id)
            .ok_or_else(|| EngineError::not_found("service", service_id))
    }

    pub fn definitions(&self) -> &[ServiceDefinition] {
        &self.definitions
    }

    /// Every service priced at the oracle's current rate.
    pub async fn list_services(&self) -> Result<CatalogListing> {
        let rate = self.oracle.snapshot().await;
        let services = self
            .definitions
            .iter()
            .map(|def| price(def, &rate))
            .collect::<Result<Vec<_>>>()?;
        Ok(CatalogListing { services, rate })
    }

    /// One service priced at the oracle's current rate.
    pub async fn quote(&self, service_id: &str) -> Result<PricedService> {
        let def = self.get(service_id)?;
        let rate = self.oracle.snapshot().await;
        price(def, &rate)
    }

    /// Convert an arbitrary reference-currency amount.
    pub async fn convert(&self, major: Amount) -> Result<Amount> {
        let rate = self.oracle.get_rate().await;
        major
            .convert_at_rate(rate)
            .ok_or_else(|| EngineError::invalid("rate", format!("cannot convert at {}", rate)))
    }
}

fn price(def: &ServiceDefinition, rate: &RateSnapshot) -> Result<PricedService> {
    let price_local = def
        .reference_price_major
        .convert_at_rate(rate.rate)
        .ok_or_else(|| EngineError::invalid("rate", format!("cannot convert at {}", rate.rate)))?;
    Ok(PricedService {
        definition: def.clone(),
        price_local,
    })
}
