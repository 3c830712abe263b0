//! Fixed-point money arithmetic.
//!
//! Prices exist in two units: the reference currency (USD, "major") and the
//! local chain asset (RTM). Conversions happen in `Decimal` and are rounded
//! to [`LOCAL_PRECISION`] fractional digits.
//! **NEVER use f64 for prices!**

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits kept for local-asset prices.
pub const LOCAL_PRECISION: u32 = 8;

/// Monetary amount with fixed-point precision
///
/// # Examples
///
/// ```rust
/// use raptorq_premium::Amount;
/// use rust_decimal_macros::dec;
///
/// let price = Amount::new(dec!(100));
/// let local = price.convert_at_rate(dec!(0.01)).unwrap();
/// assert_eq!(local.to_string(), "10000.00000000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    pub fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Create from decimal string (e.g., "123.45")
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as a valid decimal.
    pub fn from_str_checked(s: &str) -> Result<Self, String> {
        Decimal::from_str(s)
            .map(|value| Self { value })
            .map_err(|e| format!("Invalid amount: {}", e))
    }

    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    /// Get the internal Decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    /// Convert a reference-currency price into the local asset.
    ///
    /// `rate` is the price of one local unit in the reference currency, so
    /// the local amount is `self / rate`, rounded half away from zero to
    /// [`LOCAL_PRECISION`] digits. Returns None for a non-positive rate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use raptorq_premium::Amount;
    /// use rust_decimal_macros::dec;
    ///
    /// let usd = Amount::new(dec!(25));
    /// assert_eq!(usd.convert_at_rate(dec!(0.003)).unwrap().to_string(), "8333.33333333");
    /// assert!(usd.convert_at_rate(dec!(0)).is_none());
    /// ```
    pub fn convert_at_rate(&self, rate: Decimal) -> Option<Self> {
        if rate <= Decimal::ZERO {
            return None;
        }
        self.value.checked_div(rate).map(|value| Self {
            value: round_local(value),
        })
    }

    /// Multiply by a quantity (days, units).
    ///
    /// Returns None on overflow.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use raptorq_premium::Amount;
    /// let daily = Amount::from_str_checked("1250.5").unwrap();
    /// assert_eq!(daily.checked_mul(7).unwrap().to_string(), "8753.50000000");
    /// ```
    pub fn checked_mul(&self, quantity: u32) -> Option<Self> {
        self.value
            .checked_mul(Decimal::from(quantity))
            .map(|value| Self {
                value: round_local(value),
            })
    }

    /// Checked addition (returns None on overflow)
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_add(other.value)
            .map(|value| Self { value })
    }
}

/// Round to the local precision, keeping trailing zeros in the scale.
fn round_local(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(LOCAL_PRECISION, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(LOCAL_PRECISION);
    rounded
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conversion_precision() {
        let usd = Amount::new(dec!(100.0));
        let local = usd.convert_at_rate(dec!(0.01)).unwrap();
        assert_eq!(local.to_string(), "10000.00000000");
        assert_eq!(local.as_decimal(), dec!(10000));
    }

    #[test]
    fn test_conversion_rounds_half_away_from_zero() {
        // 1 / 3 = 0.333333333333...
        let local = Amount::new(dec!(1)).convert_at_rate(dec!(3)).unwrap();
        assert_eq!(local.to_string(), "0.33333333");

        // 2 / 3 = 0.666666666...
        let local = Amount::new(dec!(2)).convert_at_rate(dec!(3)).unwrap();
        assert_eq!(local.to_string(), "0.66666667");
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        let usd = Amount::new(dec!(10));
        assert!(usd.convert_at_rate(Decimal::ZERO).is_none());
        assert!(usd.convert_at_rate(dec!(-0.5)).is_none());
    }

    #[test]
    fn test_checked_mul() {
        let daily = Amount::new(dec!(0.12345678));
        assert_eq!(daily.checked_mul(3).unwrap().as_decimal(), dec!(0.37037034));
        assert!(Amount::new(Decimal::MAX).checked_mul(2).is_none());
    }

    #[test]
    fn test_serialization() {
        let amt = Amount::from_str_checked("8333.33333333").unwrap();
        let json = serde_json::to_string(&amt).unwrap();
        let parsed: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amt, parsed);
    }

    #[test]
    fn test_zero() {
        let zero = Amount::zero();
        assert!(zero.is_zero());
        assert!(!zero.is_positive());
    }
}
