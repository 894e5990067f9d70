//! Replay engine: strategies, cost basis, price resolution and the
//! processor that drives them over a portfolio's transaction log.

pub mod cost_basis;
pub mod events;
pub mod price_history;
pub mod processor;
pub mod realized;
pub mod replay;
pub mod strategies;

pub use cost_basis::{CostBasisError, LotMatch};
pub use events::{
    DomainEvent, EventHandler, HandlerChain, HandlerError, NoopHandler, RealizationEvent,
};
pub use price_history::{
    is_fiat, PriceError, PriceHistoryService, PriceLookup, PriceQuote, PriceServiceSettings,
};
pub use processor::{ProcessingError, ReplayOutcome, ReplayPolicy, TransactionProcessor};
pub use realized::{RealizedGain, RealizedGainLedger};
pub use replay::RecalculationReport;
pub use strategies::{StrategyContext, StrategyError, TransactionStrategy};
