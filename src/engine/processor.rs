//! Sequential replay of a portfolio's transactions through the strategies.

use crate::domain::{sort_chronologically, ErrorType, ReplayParts, TransactionId};
use crate::engine::cost_basis::CostBasisError;
use crate::engine::events::{DomainEvent, EventHandler, HandlerError};
use crate::engine::price_history::PriceLookup;
use crate::engine::strategies::{StrategyContext, StrategyError, TransactionStrategy};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// What a hard failure does to the rest of the replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// The first hard failure aborts the replay.
    #[default]
    Halt,
    /// Hard failures are recorded on the transaction and the replay goes on.
    Continue,
}

impl ReplayPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayPolicy::Halt => "halt",
            ReplayPolicy::Continue => "continue",
        }
    }
}

impl fmt::Display for ReplayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "halt" => Ok(ReplayPolicy::Halt),
            "continue" => Ok(ReplayPolicy::Continue),
            other => Err(format!("must be halt or continue, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("transaction {transaction_id} rejected: {source}")]
    Strategy {
        transaction_id: TransactionId,
        #[source]
        source: StrategyError,
    },
    #[error("realization for transaction {transaction_id} failed: {source}")]
    Event {
        transaction_id: TransactionId,
        #[source]
        source: HandlerError,
    },
}

impl ProcessingError {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            ProcessingError::Strategy { transaction_id, .. }
            | ProcessingError::Event { transaction_id, .. } => transaction_id,
        }
    }
}

/// Result of one completed replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub processed: usize,
    /// Transactions rejected or failed under the `Continue` policy.
    pub failed: Vec<TransactionId>,
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionProcessor {
    policy: ReplayPolicy,
}

impl TransactionProcessor {
    pub fn new(policy: ReplayPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    /// Apply every transaction in `parts` in date order.
    ///
    /// Derived fields of each transaction are cleared before its strategy
    /// runs. Events go to `handler` in the order they are produced and are
    /// also returned in the outcome.
    ///
    /// # Errors
    /// Under `Halt`, the first rejected transaction or failed event handler
    /// aborts the replay; holdings are then partially rebuilt and stale.
    pub async fn process(
        &self,
        parts: ReplayParts<'_>,
        prices: &dyn PriceLookup,
        handler: &mut dyn EventHandler,
    ) -> Result<ReplayOutcome, ProcessingError> {
        let ReplayParts {
            mut transactions,
            holdings,
            default_currency,
        } = parts;
        sort_chronologically(&mut transactions);

        let mut ctx = StrategyContext {
            holdings,
            default_currency,
            prices,
        };
        let mut outcome = ReplayOutcome::default();

        for transaction in transactions {
            transaction.reset_derived();
            let strategy = TransactionStrategy::for_type(transaction.transaction_type);

            let events = match strategy.process(transaction, &mut ctx).await {
                Ok(events) => events,
                Err(source) => {
                    let transaction_id = transaction.id.clone();
                    if self.policy == ReplayPolicy::Halt {
                        return Err(ProcessingError::Strategy {
                            transaction_id,
                            source,
                        });
                    }
                    warn!(%transaction_id, error = %source, "Skipping rejected transaction");
                    outcome.failed.push(transaction_id);
                    continue;
                }
            };

            for event in events {
                if let Err(source) = handler.handle(&event) {
                    let transaction_id = transaction.id.clone();
                    if self.policy == ReplayPolicy::Halt {
                        return Err(ProcessingError::Event {
                            transaction_id,
                            source,
                        });
                    }
                    let error_type = match source {
                        HandlerError::CostBasis(CostBasisError::InsufficientFunds { .. }) => {
                            ErrorType::InsufficientFunds
                        }
                        _ => ErrorType::EventCreationFailed,
                    };
                    warn!(%transaction_id, error = %source, "Realization event failed");
                    transaction.flag(error_type, source.to_string());
                    outcome.failed.push(transaction_id);
                }
                outcome.events.push(event);
            }

            debug!(
                transaction_id = %transaction.id,
                transaction_type = %transaction.transaction_type,
                error_type = transaction.error_type.as_str(),
                "Transaction applied"
            );
            outcome.processed += 1;
        }

        Ok(outcome)
    }
}
