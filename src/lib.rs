pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use datasource::{CryptoCompareProvider, DataSourceError, MockPriceProvider, PriceProvider};
pub use db::{init_db, Repository};
pub use domain::{
    AssetHolding, CostBasisMethod, CurrencyCode, Decimal, ErrorType, FinancialTransaction, Money,
    PortfolioId, TransactionType, UserPortfolio, WalletId,
};
pub use engine::{
    PriceHistoryService, RecalculationReport, ReplayPolicy, TransactionProcessor,
};
pub use error::AppError;
pub use orchestration::{PortfolioDefaults, PortfolioService, RecalculationError};
