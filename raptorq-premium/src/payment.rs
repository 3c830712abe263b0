//! Payment verification collaborator.
//!
//! The engine never talks to the chain directly. A [`PaymentOracle`]
//! answers whether a transaction paid the expected amount to the expected
//! address; the engine bounds every call with a timeout and treats any
//! failure as "not confirmed yet".
//!
//! The oracle does not know what a transaction is being spent on, so the
//! engine records each verified reference in storage and refuses to
//! redeem it a second time.

use std::time::Duration;

use async_trait::async_trait;
use raptorq_lib::{EngineError, Result};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::storage::EngineStorage;

/// Untrusted, possibly slow payment checker.
#[async_trait]
pub trait PaymentOracle: Send + Sync {
    /// Whether `tx_reference` paid at least `expected_amount` to
    /// `expected_recipient`.
    async fn verify(
        &self,
        tx_reference: &str,
        expected_recipient: &str,
        expected_amount: Amount,
    ) -> Result<bool>;
}

/// Oracle that accepts any well-formed transaction id.
///
/// Stands in for a chain node during development: a reference passes when
/// it is 64 hex characters, regardless of recipient or amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubPaymentOracle;

#[async_trait]
impl PaymentOracle for StubPaymentOracle {
    async fn verify(
        &self,
        tx_reference: &str,
        _expected_recipient: &str,
        _expected_amount: Amount,
    ) -> Result<bool> {
        Ok(is_txid(tx_reference))
    }
}

/// 64 hex characters.
pub fn is_txid(tx_reference: &str) -> bool {
    tx_reference.len() == 64 && tx_reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Outcome of a bounded oracle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PaymentCheck {
    Verified,
    /// The oracle answered and did not find the payment.
    Rejected,
    /// The oracle failed or timed out.
    Unavailable(String),
}

/// Call `oracle` with a deadline.
pub(crate) async fn check_payment(
    oracle: &dyn PaymentOracle,
    timeout: Duration,
    tx_reference: &str,
    recipient: &str,
    amount: Amount,
) -> PaymentCheck {
    match tokio::time::timeout(timeout, oracle.verify(tx_reference, recipient, amount)).await {
        Ok(Ok(true)) => PaymentCheck::Verified,
        Ok(Ok(false)) => PaymentCheck::Rejected,
        Ok(Err(e)) => {
            tracing::warn!(tx = tx_reference, "payment oracle failed: {}", e);
            PaymentCheck::Unavailable(e.to_string())
        }
        Err(_) => {
            tracing::warn!(tx = tx_reference, "payment oracle timed out");
            PaymentCheck::Unavailable(format!("timed out after {}s", timeout.as_secs()))
        }
    }
}

/// Bind a verified `tx_reference` to `owner`.
///
/// Fails with `Conflict` if the reference already paid for something else.
pub(crate) async fn redeem(storage: &dyn EngineStorage, tx_reference: &str, owner: &str) -> Result<()> {
    let holder = storage.redeem_tx(tx_reference, owner).await?;
    if holder == owner {
        return Ok(());
    }
    tracing::warn!(tx = tx_reference, owner, holder = %holder, "transaction already redeemed");
    Err(EngineError::Conflict(format!(
        "transaction {} was already redeemed",
        tx_reference
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txid_format() {
        assert!(is_txid(&"ab".repeat(32)));
        assert!(!is_txid("abc"));
        assert!(!is_txid(&"zz".repeat(32)));
    }

    #[tokio::test]
    async fn test_stub_oracle() {
        let oracle = StubPaymentOracle;
        let ok = oracle
            .verify(&"0f".repeat(32), "RTMaddr", Amount::zero())
            .await
            .unwrap();
        let bad = oracle.verify("pending", "RTMaddr", Amount::zero()).await.unwrap();
        assert!(ok);
        assert!(!bad);
    }

    #[tokio::test]
    async fn test_check_payment_maps_outcomes() {
        let timeout = Duration::from_secs(1);
        let oracle = StubPaymentOracle;

        assert_eq!(
            check_payment(&oracle, timeout, &"0f".repeat(32), "RTM", Amount::zero()).await,
            PaymentCheck::Verified
        );
        assert_eq!(
            check_payment(&oracle, timeout, "nope", "RTM", Amount::zero()).await,
            PaymentCheck::Rejected
        );
    }
}
