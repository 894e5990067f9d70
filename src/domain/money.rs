//! Currency-aware amounts.

use crate::domain::{CurrencyCode, Decimal};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// An amount tied to a currency code.
///
/// "No amount set" is expressed as `Option<Money>::None` by the owning record,
/// which keeps it distinct from a zero amount in some currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub amount: Decimal,
    pub currency_code: CurrencyCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("cannot combine {left} with {right}")]
    CurrencyMismatch {
        left: CurrencyCode,
        right: CurrencyCode,
    },
}

impl Money {
    pub fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    pub fn zero(currency_code: CurrencyCode) -> Self {
        Self::new(Decimal::zero(), currency_code)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount.is_positive()
    }

    pub fn is_in(&self, currency_code: &CurrencyCode) -> bool {
        &self.currency_code == currency_code
    }

    pub fn abs(&self) -> Money {
        Money::new(self.amount.abs(), self.currency_code.clone())
    }

    /// # Errors
    /// Fails when the currency codes differ.
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Money::new(
            self.amount + other.amount,
            self.currency_code.clone(),
        ))
    }

    /// # Errors
    /// Fails when the currency codes differ.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Money::new(
            self.amount - other.amount,
            self.currency_code.clone(),
        ))
    }

    /// Scale the amount, keeping the currency.
    pub fn times(&self, factor: Decimal) -> Money {
        Money::new(self.amount * factor, self.currency_code.clone())
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency_code != other.currency_code {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency_code.clone(),
                right: other.currency_code.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency_code)
    }
}
