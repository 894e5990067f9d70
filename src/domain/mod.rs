//! Domain types for the portfolio ledger.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper and currency-aware Money
//! - Canonical ledger transactions with their error annotations
//! - Holdings, acquisition lots, wallets and the portfolio aggregate
//! - Daily price records and the replay ordering helper

pub mod decimal;
pub mod holding;
pub mod money;
pub mod ordering;
pub mod portfolio;
pub mod price;
pub mod primitives;
pub mod transaction;

pub use decimal::Decimal;
pub use holding::{AssetHolding, PurchaseRecord};
pub use money::{Money, MoneyError};
pub use ordering::sort_chronologically;
pub use portfolio::{
    CostBasisMethod, HoldingBook, PortfolioError, ReplayParts, UserPortfolio, Wallet,
};
pub use price::{CurrencyPair, PriceRecord};
pub use primitives::{CurrencyCode, PortfolioId, TransactionId, WalletId};
pub use transaction::{
    ErrorType, FinancialTransaction, TransactionShapeError, TransactionType,
    UnknownTransactionType,
};
