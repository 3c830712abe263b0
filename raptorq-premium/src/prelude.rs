//! Convenient re-exports for engine consumers.

pub use crate::ads::{AdBooking, AdSlot, AdSlotId, BookingOutcome};
pub use crate::amount::Amount;
pub use crate::catalog::{CatalogListing, ServiceDefinition};
pub use crate::config::EngineConfig;
pub use crate::engine::PremiumEngine;
pub use crate::ledger::{PurchaseStatus, VerifyOutcome};
pub use crate::oracle::{PriceFeed, RateSource};
pub use crate::payment::PaymentOracle;
pub use crate::storage::{EngineStorage, FileStorage, MemoryStorage};
pub use crate::subscription::Entitlement;
pub use raptorq_lib::prelude::*;
