//! Purchase records and their payment state machine.
//!
//! ```text
//! PendingPayment ──verified──▶ Confirmed
//!        │
//!        └──window passed───▶ Expired
//! ```
//!
//! Confirmed and Expired are terminal. Every transition is a versioned
//! compare-and-swap, so when two callers race only one of them applies
//! the transition and its side effects.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use raptorq_lib::{Clock, EngineError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::catalog::ServiceCatalog;
use crate::config::PaymentConfig;
use crate::payment::{check_payment, redeem, PaymentCheck, PaymentOracle};
use crate::storage::EngineStorage;
use crate::subscription::{Entitlement, SubscriptionManager};

/// Lifecycle state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    PendingPayment,
    Confirmed,
    Expired,
}

impl PurchaseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PurchaseStatus::PendingPayment)
    }
}

/// A purchase and the price frozen at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: String,
    pub service_id: String,
    pub account: String,
    /// Local-asset price at creation time; never recomputed.
    pub price_local: Amount,
    pub price_major: Amount,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
    pub payment_window_expires_at: DateTime<Utc>,
    pub tx_reference: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Storage version, maintained by [`EngineStorage`].
    #[serde(default)]
    pub version: u64,
}

impl PurchaseRecord {
    /// Whether a pending record's payment window has closed at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == PurchaseStatus::PendingPayment && now >= self.payment_window_expires_at
    }

    /// The record as it should be presented at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Self {
        let mut view = self.clone();
        if view.is_overdue(now) {
            view.status = PurchaseStatus::Expired;
        }
        view
    }
}

/// Where and how much to pay for a pending purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstructions {
    pub recipient: String,
    pub amount_local: Amount,
    pub expires_at: DateTime<Utc>,
}

/// Result of [`PurchaseLedger::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub purchase: PurchaseRecord,
    pub instructions: PaymentInstructions,
}

/// Result of [`PurchaseLedger::verify_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// This call confirmed the purchase. `entitlement` is None if
    /// activation failed after confirmation.
    Confirmed {
        purchase: PurchaseRecord,
        entitlement: Option<Entitlement>,
    },
    /// An earlier call confirmed the purchase; nothing was changed.
    AlreadyConfirmed { purchase: PurchaseRecord },
    /// Payment not seen yet (or the oracle was unavailable); retry later.
    Pending { reason: String },
    /// The payment window closed before the payment was verified.
    Expired { purchase: PurchaseRecord },
}

/// Result of [`PurchaseLedger::purchase_direct`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DirectPurchaseOutcome {
    Activated {
        entitlement: Entitlement,
        price_local: Amount,
    },
    Pending {
        reason: String,
    },
}

/// Tracks purchases from creation through payment confirmation.
pub struct PurchaseLedger {
    storage: Arc<dyn EngineStorage>,
    catalog: Arc<ServiceCatalog>,
    subscriptions: Arc<SubscriptionManager>,
    payments: Arc<dyn PaymentOracle>,
    clock: Arc<dyn Clock>,
    config: PaymentConfig,
}

impl PurchaseLedger {
    pub fn new(
        storage: Arc<dyn EngineStorage>,
        catalog: Arc<ServiceCatalog>,
        subscriptions: Arc<SubscriptionManager>,
        payments: Arc<dyn PaymentOracle>,
        clock: Arc<dyn Clock>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            storage,
            catalog,
            subscriptions,
            payments,
            clock,
            config,
        }
    }

    /// Open a pending purchase at the current price.
    pub async fn create(&self, service_id: &str, account: &str) -> Result<PurchaseReceipt> {
        if account.is_empty() {
            return Err(EngineError::invalid("account", "must not be empty"));
        }
        let quote = self.catalog.quote(service_id).await?;
        let now = self.clock.now();
        let window_closes = Duration::try_seconds(self.config.payment_window_secs)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| EngineError::invalid("payment_window_secs", "window ends out of range"))?;

        let record = PurchaseRecord {
            id: Uuid::new_v4().to_string(),
            service_id: service_id.to_string(),
            account: account.to_string(),
            price_local: quote.price_local,
            price_major: quote.definition.reference_price_major,
            status: PurchaseStatus::PendingPayment,
            created_at: now,
            payment_window_expires_at: window_closes,
            tx_reference: None,
            confirmed_at: None,
            version: 0,
        };
        if !self.storage.save_purchase(&record, None).await? {
            return Err(EngineError::Conflict(format!(
                "purchase {} already exists",
                record.id
            )));
        }
        let purchase = self.load(&record.id).await?;

        tracing::info!(
            purchase = %purchase.id,
            service = service_id,
            account,
            price = %purchase.price_local,
            "purchase created"
        );

        Ok(PurchaseReceipt {
            instructions: PaymentInstructions {
                recipient: self.config.recipient_address.clone(),
                amount_local: purchase.price_local,
                expires_at: purchase.payment_window_expires_at,
            },
            purchase,
        })
    }

    /// Check `tx_reference` against a pending purchase and confirm it.
    pub async fn verify_payment(&self, purchase_id: &str, tx_reference: &str) -> Result<VerifyOutcome> {
        let record = self.current(purchase_id).await?;
        match record.status {
            PurchaseStatus::Confirmed => {
                return Ok(VerifyOutcome::AlreadyConfirmed { purchase: record })
            }
            PurchaseStatus::Expired => return Ok(VerifyOutcome::Expired { purchase: record }),
            PurchaseStatus::PendingPayment => {}
        }

        let check = check_payment(
            self.payments.as_ref(),
            self.verify_timeout(),
            tx_reference,
            &self.config.recipient_address,
            record.price_local,
        )
        .await;
        match check {
            PaymentCheck::Verified => {}
            PaymentCheck::Rejected => {
                return Ok(VerifyOutcome::Pending {
                    reason: "payment not found".to_string(),
                })
            }
            PaymentCheck::Unavailable(reason) => return Ok(VerifyOutcome::Pending { reason }),
        }

        let owner = format!("purchase:{}", purchase_id);
        redeem(self.storage.as_ref(), tx_reference, &owner).await?;

        let mut confirmed = record.clone();
        confirmed.status = PurchaseStatus::Confirmed;
        confirmed.tx_reference = Some(tx_reference.to_string());
        confirmed.confirmed_at = Some(self.clock.now());

        if !self
            .storage
            .save_purchase(&confirmed, Some(record.version))
            .await?
        {
            // Lost the race; report whatever the winner wrote.
            let winner = self.current(purchase_id).await?;
            if winner.tx_reference.as_deref() != Some(tx_reference) {
                self.storage.release_tx(tx_reference, &owner).await?;
            }
            return Ok(match winner.status {
                PurchaseStatus::Confirmed => VerifyOutcome::AlreadyConfirmed { purchase: winner },
                PurchaseStatus::Expired => VerifyOutcome::Expired { purchase: winner },
                PurchaseStatus::PendingPayment => VerifyOutcome::Pending {
                    reason: "purchase changed concurrently".to_string(),
                },
            });
        }
        let purchase = self.load(purchase_id).await?;
        tracing::info!(purchase = %purchase.id, tx = tx_reference, "purchase confirmed");

        let entitlement = match self
            .subscriptions
            .activate_from_purchase(&purchase.account, &purchase.service_id, &purchase.id)
            .await
        {
            Ok(entitlement) => Some(entitlement),
            Err(e) => {
                tracing::error!(
                    purchase = %purchase.id,
                    account = %purchase.account,
                    service = %purchase.service_id,
                    "activation failed after confirmed payment, needs reconciliation: {}",
                    e
                );
                None
            }
        };

        Ok(VerifyOutcome::Confirmed {
            purchase,
            entitlement,
        })
    }

    /// Verify a payment and activate the service without a ledger record.
    pub async fn purchase_direct(
        &self,
        service_id: &str,
        account: &str,
        tx_reference: &str,
    ) -> Result<DirectPurchaseOutcome> {
        if account.is_empty() {
            return Err(EngineError::invalid("account", "must not be empty"));
        }
        let quote = self.catalog.quote(service_id).await?;

        let check = check_payment(
            self.payments.as_ref(),
            self.verify_timeout(),
            tx_reference,
            &self.config.recipient_address,
            quote.price_local,
        )
        .await;
        match check {
            PaymentCheck::Verified => {
                let owner = format!("direct:{}", Uuid::new_v4());
                redeem(self.storage.as_ref(), tx_reference, &owner).await?;
                let entitlement = match self.subscriptions.activate(account, service_id).await {
                    Ok(entitlement) => entitlement,
                    Err(e) => {
                        self.storage.release_tx(tx_reference, &owner).await?;
                        return Err(e);
                    }
                };
                tracing::info!(service = service_id, account, tx = tx_reference, "direct purchase activated");
                Ok(DirectPurchaseOutcome::Activated {
                    entitlement,
                    price_local: quote.price_local,
                })
            }
            PaymentCheck::Rejected => Ok(DirectPurchaseOutcome::Pending {
                reason: "payment not found".to_string(),
            }),
            PaymentCheck::Unavailable(reason) => Ok(DirectPurchaseOutcome::Pending { reason }),
        }
    }

    /// Current state of a purchase.
    pub async fn status(&self, purchase_id: &str) -> Result<PurchaseRecord> {
        self.current(purchase_id).await
    }

    /// Purchases of `account`, oldest first.
    pub async fn list_for_account(&self, account: &str) -> Result<Vec<PurchaseRecord>> {
        let now = self.clock.now();
        let mut records: Vec<PurchaseRecord> = self
            .storage
            .list_purchases_for_account(account)
            .await?
            .iter()
            .map(|r| r.evaluate(now))
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Persist the Expired transition for every overdue purchase.
    ///
    /// Returns how many records this call expired.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut expired = 0;
        for record in self.storage.list_purchases().await? {
            if record.is_overdue(now) && self.expire(&record).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(count = expired, "expired overdue purchases");
        }
        Ok(expired)
    }

    /// Load a record, persisting the expiry transition if it is due.
    async fn current(&self, purchase_id: &str) -> Result<PurchaseRecord> {
        let record = self.load(purchase_id).await?;
        if !record.is_overdue(self.clock.now()) {
            return Ok(record);
        }
        self.expire(&record).await?;
        self.load(purchase_id).await
    }

    async fn expire(&self, record: &PurchaseRecord) -> Result<bool> {
        let mut expired = record.clone();
        expired.status = PurchaseStatus::Expired;
        let swapped = self
            .storage
            .save_purchase(&expired, Some(record.version))
            .await?;
        if swapped {
            tracing::debug!(purchase = %record.id, "payment window closed");
        }
        Ok(swapped)
    }

    async fn load(&self, purchase_id: &str) -> Result<PurchaseRecord> {
        self.storage
            .get_purchase(purchase_id)
            .await?
            .ok_or_else(|| EngineError::not_found("purchase", purchase_id))
    }

    fn verify_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.config.verify_timeout_secs)
    }
}
