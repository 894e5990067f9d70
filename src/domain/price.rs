//! Daily close prices.

use crate::domain::{CurrencyCode, Decimal};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: CurrencyCode,
    pub quote: CurrencyCode,
}

impl CurrencyPair {
    pub fn new(base: CurrencyCode, quote: CurrencyCode) -> Self {
        Self { base, quote }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(CurrencyPair::new(
                CurrencyCode::new(base),
                CurrencyCode::new(quote),
            )),
            _ => Err(format!("invalid currency pair: {}", s)),
        }
    }
}

/// Close price of `pair.base` in `pair.quote` for one day. Unique per (pair, day).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    pub currency_pair: CurrencyPair,
    pub close_date: NaiveDate,
    pub close_price: Decimal,
}

impl PriceRecord {
    pub fn new(currency_pair: CurrencyPair, close_date: NaiveDate, close_price: Decimal) -> Self {
        Self {
            currency_pair,
            close_date,
            close_price,
        }
    }
}
