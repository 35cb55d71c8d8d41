//! Monetary amounts
//!
//! A [`Money`] is an exact decimal amount tagged with an ISO-4217 currency
//! code. Arithmetic only happens between amounts of the same currency.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Parse a decimal string, e.g. `Money::parse("10.00", "USD")`
    pub fn parse(amount: &str, currency: impl Into<String>) -> Result<Self, LedgerError> {
        let amount: Decimal = amount
            .trim()
            .parse()
            .map_err(|e| LedgerError::BadRequest(format!("invalid amount '{}': {}", amount, e)))?;
        Ok(Self::new(amount, currency))
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.amount, self.currency.clone())
    }

    /// Sum of two amounts in the same currency
    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        self.amount
            .checked_add(other.amount)
            .map(|amount| Money::new(amount, self.currency.clone()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_same_currency() {
        let a = Money::parse("5.00", "USD").unwrap();
        let b = Money::parse("-10.00", "USD").unwrap();
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum, Money::parse("-5.00", "USD").unwrap());
        assert!(sum.is_negative());
        assert_eq!(sum.to_string(), "-5.00 USD");
    }

    #[test]
    fn test_checked_add_rejects_other_currency() {
        let usd = Money::parse("1", "USD").unwrap();
        let eur = Money::parse("1", "EUR").unwrap();
        assert!(usd.checked_add(&eur).is_none());
    }

    #[test]
    fn test_negative_zero_is_not_negative() {
        let z = Money::parse("-0.00", "SEK").unwrap();
        assert!(!z.is_negative());
        assert!(z.amount.is_zero());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = Money::parse("ten", "USD").unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}
