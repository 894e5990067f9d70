//! Recalculation service tying storage, prices and the replay engine together.

pub mod service;

pub use service::{PortfolioDefaults, PortfolioService, RecalculationError};
