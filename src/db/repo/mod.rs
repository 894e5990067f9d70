//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `portfolios.rs` - Portfolios, wallets, transactions and derived holdings
//! - `prices.rs` - Daily close price records

mod portfolios;
mod prices;

use crate::domain::{CurrencyCode, Decimal, Money};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Stored values that cannot be turned back into domain types are data
/// corruption and fail the load rather than being defaulted.
fn corrupt(column: &str, value: &str, reason: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(format!("corrupt {} value {:?}: {}", column, value, reason).into())
}

/// Values that cannot be written, or a write the schema's ownership rules
/// refuse.
fn rejected(what: &str, reason: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Protocol(format!("cannot store {}: {}", what, reason))
}

fn parse_decimal(column: &str, value: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str_canonical(value).map_err(|e| corrupt(column, value, e))
}

fn parse_money(
    column: &str,
    amount: Option<String>,
    currency: Option<String>,
) -> Result<Option<Money>, sqlx::Error> {
    match (amount, currency) {
        (Some(amount), Some(currency)) => Ok(Some(Money::new(
            parse_decimal(column, &amount)?,
            CurrencyCode::new(currency),
        ))),
        (None, None) => Ok(None),
        (amount, _) => Err(corrupt(
            column,
            amount.as_deref().unwrap_or(""),
            "amount and currency must both be set or both be empty",
        )),
    }
}

fn money_columns(money: Option<&Money>) -> (Option<String>, Option<String>) {
    match money {
        Some(m) => (
            Some(m.amount.to_canonical_string()),
            Some(m.currency_code.as_str().to_string()),
        ),
        None => (None, None),
    }
}

fn parse_time_ms(column: &str, ms: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| corrupt(column, &ms.to_string(), "timestamp out of range"))
}
