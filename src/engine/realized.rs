//! Realized gains computed from realization events with the portfolio's
//! cost-basis method.

use crate::domain::{
    AssetHolding, CostBasisMethod, CurrencyCode, Decimal, Money, PurchaseRecord, TransactionId,
};
use crate::engine::cost_basis::CostBasisError;
use crate::engine::events::{DomainEvent, EventHandler, HandlerError, RealizationEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedGain {
    pub transaction_id: TransactionId,
    pub date_time: DateTime<Utc>,
    pub asset: CurrencyCode,
    pub disposed_amount: Decimal,
    pub method: CostBasisMethod,
    pub proceeds: Money,
    pub cost_basis: Money,
    pub gain: Money,
}

/// Remaining quantity of every lot seen so far for one asset, in the order
/// the lots were opened.
#[derive(Debug, Default)]
struct OpenLots {
    lots: Vec<PurchaseRecord>,
}

impl OpenLots {
    /// Pick up lots opened since the last disposal. Lot history only grows
    /// within a replay, so new lots are the tail of the holding's list.
    fn sync(&mut self, holding: &AssetHolding) {
        let known = self.lots.len();
        self.lots
            .extend(holding.purchase_records().iter().skip(known).cloned());
    }

    fn as_holding(&self, holding: &AssetHolding) -> AssetHolding {
        AssetHolding::from_parts(
            holding.asset.clone(),
            holding.balance,
            holding.average_bought_price,
            self.lots.clone(),
        )
    }
}

/// Event handler that turns each disposal into a [`RealizedGain`].
///
/// FIFO and LIFO consume lots as disposals arrive; a disposal the open lots
/// cannot cover fails with `InsufficientFunds` and consumes nothing.
#[derive(Debug)]
pub struct RealizedGainLedger {
    method: CostBasisMethod,
    open: BTreeMap<CurrencyCode, OpenLots>,
    gains: Vec<RealizedGain>,
}

impl RealizedGainLedger {
    pub fn new(method: CostBasisMethod) -> Self {
        Self {
            method,
            open: BTreeMap::new(),
            gains: Vec::new(),
        }
    }

    pub fn gains(&self) -> &[RealizedGain] {
        &self.gains
    }

    pub fn into_gains(self) -> Vec<RealizedGain> {
        self.gains
    }

    /// Sum of all gains in `currency`.
    pub fn total_gain(&self, currency: &CurrencyCode) -> Money {
        let total = self
            .gains
            .iter()
            .filter(|g| g.gain.is_in(currency))
            .map(|g| g.gain.amount)
            .sum();
        Money::new(total, currency.clone())
    }

    fn record(&mut self, event: &RealizationEvent) -> Result<(), CostBasisError> {
        let disposed = event.disposed.amount;
        let lots = self.open.entry(event.disposed.currency_code.clone()).or_default();
        lots.sync(&event.holding);

        let cost = match self.method {
            CostBasisMethod::Average => self.method.calculate_cost_basis(&event.holding, disposed)?,
            CostBasisMethod::Fifo | CostBasisMethod::Lifo => {
                let matches = self
                    .method
                    .match_lots(&lots.as_holding(&event.holding), disposed)?;
                let mut cost = Decimal::zero();
                for m in &matches {
                    lots.lots[m.lot_index].amount -= m.amount;
                    cost += m.cost();
                }
                cost
            }
        };

        let currency = event.price_per_unit.currency_code.clone();
        let proceeds = event.proceeds();
        let gain = Money::new(proceeds.amount - cost, currency.clone());
        debug!(
            transaction_id = %event.transaction_id,
            asset = %event.disposed.currency_code,
            %disposed,
            gain = %gain,
            "Realized gain recorded"
        );
        self.gains.push(RealizedGain {
            transaction_id: event.transaction_id.clone(),
            date_time: event.date_time,
            asset: event.disposed.currency_code.clone(),
            disposed_amount: disposed,
            method: self.method,
            proceeds,
            cost_basis: Money::new(cost, currency),
            gain,
        });
        Ok(())
    }
}

impl EventHandler for RealizedGainLedger {
    fn handle(&mut self, event: &DomainEvent) -> Result<(), HandlerError> {
        match event {
            DomainEvent::FinancialEventAdded(realization) => Ok(self.record(realization)?),
            _ => Ok(()),
        }
    }
}
