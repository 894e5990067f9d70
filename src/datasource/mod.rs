//! Remote price providers behind one async contract.

use crate::domain::{CurrencyCode, PriceRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

pub mod cryptocompare;
pub mod mock;

pub use cryptocompare::CryptoCompareProvider;
pub use mock::MockPriceProvider;

/// Remote source of daily close prices.
///
/// Implementations must handle retry/backoff and rate limiting. Symbols the
/// provider cannot price are left out of the result rather than failing it.
#[async_trait]
pub trait PriceProvider: Send + Sync + fmt::Debug {
    /// Fetch daily close prices of `base` in `quote`.
    ///
    /// # Arguments
    /// * `base` - Asset being priced (e.g., "BTC")
    /// * `quote` - Currency of the price (e.g., "USD")
    /// * `start` - First day (inclusive)
    /// * `end` - Last day (inclusive)
    ///
    /// # Returns
    /// Price records ordered by close date
    async fn fetch_price_history(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>, DataSourceError>;

    /// Fetch the latest price of each symbol in `quote`, stamped with today's date.
    async fn fetch_current_price(
        &self,
        symbols: &[CurrencyCode],
        quote: &CurrencyCode,
    ) -> Result<Vec<PriceRecord>, DataSourceError>;
}

/// Error type for price provider operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Invalid JSON or malformed response
    ParseError(String),
    /// Rate limit exceeded (caller should back off)
    RateLimited,
    /// The request did not finish in time
    Timeout,
    Other(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Timeout => write!(f, "Timed out"),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}
