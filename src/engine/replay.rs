//! Full portfolio recalculation.

use crate::domain::{PortfolioId, TransactionId, UserPortfolio};
use crate::engine::events::{DomainEvent, EventHandler, HandlerChain, NoopHandler};
use crate::engine::price_history::PriceLookup;
use crate::engine::processor::{ProcessingError, TransactionProcessor};
use crate::engine::realized::{RealizedGain, RealizedGainLedger};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationReport {
    pub portfolio_id: PortfolioId,
    pub transactions: usize,
    /// Transactions carrying an error annotation after the replay.
    pub flagged: usize,
    pub failed: Vec<TransactionId>,
    pub events: Vec<DomainEvent>,
    pub realized_gains: Vec<RealizedGain>,
}

impl UserPortfolio {
    /// Discard all holdings and rebuild them from the transaction log.
    pub async fn recalculate(
        &mut self,
        processor: &TransactionProcessor,
        prices: &dyn PriceLookup,
    ) -> Result<RecalculationReport, ProcessingError> {
        self.recalculate_with(processor, prices, &mut NoopHandler)
            .await
    }

    /// Like [`recalculate`](Self::recalculate), also routing every event to
    /// `observer`.
    pub async fn recalculate_with(
        &mut self,
        processor: &TransactionProcessor,
        prices: &dyn PriceLookup,
        observer: &mut dyn EventHandler,
    ) -> Result<RecalculationReport, ProcessingError> {
        let started = Instant::now();
        let portfolio_id = self.id.clone();
        let transactions = self.transaction_count();
        info!(
            %portfolio_id,
            transactions,
            method = %self.cost_basis_method,
            "Recalculating portfolio"
        );

        let mut ledger = RealizedGainLedger::new(self.cost_basis_method);
        let mut events = vec![DomainEvent::recalculation_needed(portfolio_id.clone())];

        let outcome = {
            let mut chain = HandlerChain::new().with(&mut ledger).with(observer);
            processor
                .process(self.prepare_replay(), prices, &mut chain)
                .await?
        };

        events.extend(outcome.events);
        events.push(DomainEvent::recalculation_completed(
            portfolio_id.clone(),
            outcome.processed,
        ));

        let flagged = self.transactions().filter(|t| t.has_error()).count();
        info!(
            %portfolio_id,
            processed = outcome.processed,
            flagged,
            holdings = self.holdings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recalculation completed"
        );

        Ok(RecalculationReport {
            portfolio_id,
            transactions,
            flagged,
            failed: outcome.failed,
            events,
            realized_gains: ledger.into_gains(),
        })
    }
}
