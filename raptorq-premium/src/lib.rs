//! RaptorQ premium engine.
//!
//! Monetization core of the wallet backend:
//!
//! - **Oracle**: cached exchange rate with a fixed fallback
//! - **Catalog**: premium services priced live in the local asset
//! - **Ledger**: purchases from payment instructions to confirmation
//! - **Subscriptions**: per-account entitlements with lazy expiry
//! - **Ads**: exclusive banner slots with click and impression counters
//!
//! Persistence, payment verification and price quotes are collaborators
//! behind traits ([`storage::EngineStorage`], [`payment::PaymentOracle`],
//! [`oracle::PriceFeed`]); [`engine::PremiumEngine`] wires them together.
//!
//! # Example
//!
//! ```ignore
//! use raptorq_premium::prelude::*;
//!
//! let engine = PremiumEngine::builder(EngineConfig::from_env()?).build()?;
//! let receipt = engine.create_purchase("binarai_unlimited", "RTMaccount").await?;
//! // ... the user pays receipt.instructions.amount_local ...
//! let outcome = engine.verify_payment(&receipt.purchase.id, "txid").await?;
//! ```

pub mod ads;
pub mod amount;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod oracle;
pub mod payment;
pub mod prelude;
pub mod storage;
pub mod subscription;

/// Scripted price feed and payment oracle.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use amount::Amount;
pub use engine::{PremiumEngine, PremiumEngineBuilder};
pub use raptorq_lib::{EngineError, Result};
