//! Typed events produced by a replay.
//!
//! Strategies return these values instead of publishing them; the processor
//! hands each one to the caller's [`EventHandler`] in replay order.

use crate::domain::{AssetHolding, Money, PortfolioId, TransactionId};
use crate::engine::cost_basis::CostBasisError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Disposal of a non-reporting asset by a Withdrawal or the sent leg of a Trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizationEvent {
    pub transaction_id: TransactionId,
    pub date_time: DateTime<Utc>,
    /// Amount and asset leaving the portfolio.
    pub disposed: Money,
    /// Market price per unit in the reporting currency.
    pub price_per_unit: Money,
    /// True when the price came from the average-cost fallback.
    pub price_is_fallback: bool,
    /// The holding as it was before the disposal was applied.
    pub holding: AssetHolding,
}

impl RealizationEvent {
    pub fn proceeds(&self) -> Money {
        self.price_per_unit.times(self.disposed.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    FinancialEventAdded(RealizationEvent),
    RecalculationNeeded {
        portfolio_id: PortfolioId,
    },
    RecalculationCompleted {
        portfolio_id: PortfolioId,
        transactions: usize,
    },
}

impl DomainEvent {
    pub fn recalculation_needed(portfolio_id: PortfolioId) -> Self {
        Self::RecalculationNeeded { portfolio_id }
    }

    pub fn recalculation_completed(portfolio_id: PortfolioId, transactions: usize) -> Self {
        Self::RecalculationCompleted {
            portfolio_id,
            transactions,
        }
    }

    pub fn as_realization(&self) -> Option<&RealizationEvent> {
        match self {
            Self::FinancialEventAdded(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error(transparent)]
    CostBasis(#[from] CostBasisError),
    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Consumer of replay events.
pub trait EventHandler: Send {
    fn handle(&mut self, event: &DomainEvent) -> Result<(), HandlerError>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn handle(&mut self, _event: &DomainEvent) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Fans one event out to several handlers in order. The first failure wins.
pub struct HandlerChain<'a> {
    handlers: Vec<&'a mut dyn EventHandler>,
}

impl<'a> HandlerChain<'a> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: &'a mut dyn EventHandler) -> Self {
        self.handlers.push(handler);
        self
    }
}

impl Default for HandlerChain<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for HandlerChain<'_> {
    fn handle(&mut self, event: &DomainEvent) -> Result<(), HandlerError> {
        for handler in self.handlers.iter_mut() {
            handler.handle(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter(usize);

    impl EventHandler for Counter {
        fn handle(&mut self, _event: &DomainEvent) -> Result<(), HandlerError> {
            self.0 += 1;
            Ok(())
        }
    }

    struct Rejecting;

    impl EventHandler for Rejecting {
        fn handle(&mut self, _event: &DomainEvent) -> Result<(), HandlerError> {
            Err(HandlerError::Rejected("nope".to_string()))
        }
    }

    #[test]
    fn test_serialized_tag() {
        let event = DomainEvent::recalculation_completed(PortfolioId::new("p1"), 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recalculation_completed");
        assert_eq!(json["portfolio_id"], "p1");
        assert_eq!(json["transactions"], 3);
        assert!(event.as_realization().is_none());
    }

    #[test]
    fn test_chain_stops_at_first_failure() {
        let mut first = Counter::default();
        let mut rejecting = Rejecting;
        let mut last = Counter::default();
        {
            let mut chain = HandlerChain::new()
                .with(&mut first)
                .with(&mut rejecting)
                .with(&mut last);
            let event = DomainEvent::recalculation_needed(PortfolioId::new("p1"));
            assert!(chain.handle(&event).is_err());
        }
        assert_eq!(first.0, 1);
        assert_eq!(last.0, 0);
    }
}
