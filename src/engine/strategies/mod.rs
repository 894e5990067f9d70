//! Per-type transaction strategies.
//!
//! Each strategy mutates the holdings touched by one transaction, values the
//! transaction in the reporting currency, records soft errors on the
//! transaction itself, and returns the events it produced.

mod deposit;
mod fees;
mod trade;
mod withdrawal;

use crate::domain::{
    AssetHolding, CurrencyCode, Decimal, ErrorType, FinancialTransaction, HoldingBook, Money,
    TransactionType,
};
use crate::engine::events::DomainEvent;
use crate::engine::price_history::PriceLookup;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("{transaction_type} requires a positive {leg} amount")]
    InvalidAmount {
        transaction_type: TransactionType,
        leg: &'static str,
    },
}

/// Mutable replay state lent to one strategy call.
pub struct StrategyContext<'a> {
    pub holdings: &'a mut HoldingBook,
    pub default_currency: &'a CurrencyCode,
    pub prices: &'a dyn PriceLookup,
}

/// Closed set of strategies, one per transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStrategy {
    Deposit,
    Withdrawal,
    Trade,
}

impl TransactionStrategy {
    pub fn for_type(transaction_type: TransactionType) -> Self {
        match transaction_type {
            TransactionType::Deposit => TransactionStrategy::Deposit,
            TransactionType::Withdrawal => TransactionStrategy::Withdrawal,
            TransactionType::Trade => TransactionStrategy::Trade,
        }
    }

    /// Apply `transaction` to the holdings in `ctx`.
    ///
    /// # Errors
    /// A failed amount validation rejects the transaction before any holding
    /// is touched. Everything else is recorded on the transaction.
    pub async fn process(
        &self,
        transaction: &mut FinancialTransaction,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<Vec<DomainEvent>, StrategyError> {
        match self {
            TransactionStrategy::Deposit => deposit::process(transaction, ctx).await,
            TransactionStrategy::Withdrawal => withdrawal::process(transaction, ctx).await,
            TransactionStrategy::Trade => trade::process(transaction, ctx).await,
        }
    }
}

/// Unit price of an asset in the reporting currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnitPrice {
    price: Decimal,
    /// Taken from the holding's average cost after the lookup failed.
    fallback: bool,
}

impl UnitPrice {
    fn par() -> Self {
        Self {
            price: Decimal::one(),
            fallback: false,
        }
    }
}

/// Return the leg when it is present and strictly positive; otherwise flag
/// `InvalidCurrency` and fail.
fn require_positive(
    transaction: &mut FinancialTransaction,
    leg: &'static str,
    amount: Option<Money>,
) -> Result<Money, StrategyError> {
    match amount {
        Some(money) if money.is_positive() => Ok(money),
        other => {
            let shown = other
                .map(|m| m.to_string())
                .unwrap_or_else(|| "nothing".to_string());
            transaction.flag(
                ErrorType::InvalidCurrency,
                format!("{} amount must be positive, got {}", leg, shown),
            );
            Err(StrategyError::InvalidAmount {
                transaction_type: transaction.transaction_type,
                leg,
            })
        }
    }
}

/// Price `asset` at the transaction's close date.
///
/// The reporting currency is always 1. A lookup failure falls back to the
/// holding's average bought price and flags `PriceHistoryUnavailable`, as does
/// a price taken from an earlier day.
async fn resolve_unit_price(
    ctx: &StrategyContext<'_>,
    transaction: &mut FinancialTransaction,
    asset: &CurrencyCode,
) -> UnitPrice {
    if asset == ctx.default_currency {
        return UnitPrice::par();
    }
    let date = transaction.close_date();

    match ctx
        .prices
        .price_at_close(asset, ctx.default_currency, date)
        .await
    {
        Ok(quote) => {
            if !quote.is_exact_for(date) {
                transaction.flag(
                    ErrorType::PriceHistoryUnavailable,
                    format!(
                        "no {} close for {}, used {}",
                        asset, date, quote.close_date
                    ),
                );
            }
            UnitPrice {
                price: quote.price,
                fallback: false,
            }
        }
        Err(e) => {
            let average = ctx
                .holdings
                .get(asset)
                .map(|h| h.average_bought_price)
                .unwrap_or_default();
            warn!(
                transaction_id = %transaction.id,
                %asset,
                %date,
                error = %e,
                "Price lookup failed, using average cost"
            );
            transaction.flag(
                ErrorType::PriceHistoryUnavailable,
                format!("{}; valued at average cost {}", e, average),
            );
            UnitPrice {
                price: average,
                fallback: true,
            }
        }
    }
}

fn flag_if_overdrawn(transaction: &mut FinancialTransaction, holding: &AssetHolding) {
    if holding.is_overdrawn() {
        warn!(
            transaction_id = %transaction.id,
            asset = %holding.asset,
            balance = %holding.balance,
            "Balance went negative"
        );
        transaction.flag(
            ErrorType::InsufficientFunds,
            format!("{} balance is negative: {}", holding.asset, holding.balance),
        );
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[tokio::test]
    async fn test_prior_day_price_is_flagged() {
        let requested = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let served = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        let prices = StaticPrices::default().with_prior("EUR", requested, served, "1.1");
        let usd = CurrencyCode::new("USD");
        let mut holdings = HoldingBook::new();
        let ctx = StrategyContext {
            holdings: &mut holdings,
            default_currency: &usd,
            prices: &prices,
        };
        let mut tx = FinancialTransaction::deposit(
            Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
            money("100", "EUR"),
        );

        let unit = resolve_unit_price(&ctx, &mut tx, &CurrencyCode::new("EUR")).await;
        assert_eq!(unit.price, d("1.1"));
        assert!(!unit.fallback);
        assert_eq!(tx.error_type, ErrorType::PriceHistoryUnavailable);
        assert!(tx.error_message.contains("2024-03-08"));
    }

    #[test]
    fn test_require_positive_flags_missing_leg() {
        let mut tx = FinancialTransaction::deposit(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            money("1", "BTC"),
        );
        let err = require_positive(&mut tx, "received", None).unwrap_err();
        assert_eq!(
            err,
            StrategyError::InvalidAmount {
                transaction_type: TransactionType::Deposit,
                leg: "received",
            }
        );
        assert_eq!(tx.error_type, ErrorType::InvalidCurrency);
        assert!(tx.error_message.contains("nothing"));
    }

    #[test]
    fn test_dispatch_is_one_to_one() {
        assert_eq!(
            TransactionStrategy::for_type(TransactionType::Withdrawal),
            TransactionStrategy::Withdrawal
        );
        assert_eq!(
            TransactionStrategy::for_type(TransactionType::Trade),
            TransactionStrategy::Trade
        );
    }
}
