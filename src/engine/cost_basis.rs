//! Cost-basis calculation: average cost, FIFO and LIFO lot matching.

use crate::domain::{AssetHolding, CostBasisMethod, CurrencyCode, Decimal, PurchaseRecord};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CostBasisError {
    /// The lot history cannot explain the disposal.
    #[error("insufficient funds: {remaining} {asset} of the disposal is not covered by purchase records")]
    InsufficientFunds {
        asset: CurrencyCode,
        remaining: Decimal,
    },
    #[error("disposed amount must be positive, got {0}")]
    InvalidAmount(Decimal),
}

/// Portion of one lot consumed by a disposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotMatch {
    /// Index into the holding's purchase records.
    pub lot_index: usize,
    pub amount: Decimal,
    pub price_per_unit: Decimal,
}

impl LotMatch {
    pub fn cost(&self) -> Decimal {
        self.amount * self.price_per_unit
    }
}

impl CostBasisMethod {
    /// Cost attributed to disposing `disposed` units out of `holding`.
    ///
    /// # Errors
    /// `InvalidAmount` for a non-positive disposal; `InsufficientFunds` when
    /// FIFO/LIFO run out of lots before the disposal is matched.
    pub fn calculate_cost_basis(
        &self,
        holding: &AssetHolding,
        disposed: Decimal,
    ) -> Result<Decimal, CostBasisError> {
        if !disposed.is_positive() {
            return Err(CostBasisError::InvalidAmount(disposed));
        }
        match self {
            CostBasisMethod::Average => Ok(holding.average_bought_price * disposed),
            CostBasisMethod::Fifo | CostBasisMethod::Lifo => Ok(self
                .match_lots(holding, disposed)?
                .iter()
                .map(LotMatch::cost)
                .sum()),
        }
    }

    /// Walk the lots in this method's consumption order until `disposed` is
    /// covered. Average cost does not consume lots and yields no matches.
    pub fn match_lots(
        &self,
        holding: &AssetHolding,
        disposed: Decimal,
    ) -> Result<Vec<LotMatch>, CostBasisError> {
        if !disposed.is_positive() {
            return Err(CostBasisError::InvalidAmount(disposed));
        }
        let order = match self {
            CostBasisMethod::Average => return Ok(Vec::new()),
            CostBasisMethod::Fifo => oldest_first(holding.purchase_records()),
            CostBasisMethod::Lifo => newest_first(holding.purchase_records()),
        };

        let records = holding.purchase_records();
        let mut remaining = disposed;
        let mut matches = Vec::new();
        for lot_index in order {
            if !remaining.is_positive() {
                break;
            }
            let lot = &records[lot_index];
            if !lot.amount.is_positive() {
                continue;
            }
            let amount = remaining.min(lot.amount);
            matches.push(LotMatch {
                lot_index,
                amount,
                price_per_unit: lot.price_per_unit,
            });
            remaining -= amount;
        }

        if remaining.is_positive() {
            return Err(CostBasisError::InsufficientFunds {
                asset: holding.asset.clone(),
                remaining,
            });
        }
        Ok(matches)
    }
}

// Stable sorts: lots sharing a purchase date stay in insertion order.
fn oldest_first(records: &[PurchaseRecord]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by_key(|&i| records[i].purchase_date);
    order
}

fn newest_first(records: &[PurchaseRecord]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| records[b].purchase_date.cmp(&records[a].purchase_date));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, n, 0, 0, 0).unwrap()
    }

    fn btc_with_lots(lots: &[(&str, &str, u32)]) -> AssetHolding {
        let mut holding = AssetHolding::new(CurrencyCode::new("BTC"));
        for (amount, price, n) in lots {
            holding.record_acquisition(d(amount), d(price), day(*n));
        }
        holding
    }

    #[test]
    fn test_average_cost() {
        let holding = btc_with_lots(&[("1", "10000", 1), ("1", "15000", 2)]);
        assert_eq!(
            CostBasisMethod::Average
                .calculate_cost_basis(&holding, d("1.5"))
                .unwrap(),
            d("18750")
        );
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let holding = btc_with_lots(&[("1", "10000", 1), ("1", "15000", 2)]);
        assert_eq!(
            CostBasisMethod::Fifo
                .calculate_cost_basis(&holding, d("1.5"))
                .unwrap(),
            d("17500")
        );
    }

    #[test]
    fn test_lifo_consumes_newest_first() {
        let holding = btc_with_lots(&[("1", "10000", 1), ("1", "15000", 2)]);
        assert_eq!(
            CostBasisMethod::Lifo
                .calculate_cost_basis(&holding, d("1.5"))
                .unwrap(),
            d("20000")
        );
    }

    #[test]
    fn test_fifo_reports_unmatched_remainder() {
        let holding = btc_with_lots(&[("1", "10000", 1), ("1", "15000", 2)]);
        let err = CostBasisMethod::Fifo
            .calculate_cost_basis(&holding, d("2.5"))
            .unwrap_err();
        assert_eq!(
            err,
            CostBasisError::InsufficientFunds {
                asset: CurrencyCode::new("BTC"),
                remaining: d("0.5"),
            }
        );
        assert!(err.to_string().contains("0.5 BTC"));
    }

    #[test]
    fn test_lots_out_of_date_order_are_sorted() {
        // Inserted newest first.
        let holding = btc_with_lots(&[("1", "15000", 2), ("1", "10000", 1)]);
        assert_eq!(
            CostBasisMethod::Fifo
                .calculate_cost_basis(&holding, d("1"))
                .unwrap(),
            d("10000")
        );
        assert_eq!(
            CostBasisMethod::Lifo
                .calculate_cost_basis(&holding, d("1"))
                .unwrap(),
            d("15000")
        );
    }

    #[test]
    fn test_same_date_lots_keep_insertion_order() {
        let holding = btc_with_lots(&[("1", "100", 3), ("1", "200", 3), ("1", "300", 3)]);

        let fifo = CostBasisMethod::Fifo.match_lots(&holding, d("1.5")).unwrap();
        assert_eq!(fifo.iter().map(|m| m.lot_index).collect::<Vec<_>>(), vec![0, 1]);

        let lifo = CostBasisMethod::Lifo.match_lots(&holding, d("1.5")).unwrap();
        assert_eq!(lifo.iter().map(|m| m.lot_index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(lifo[1].amount, d("0.5"));
    }

    #[test]
    fn test_non_positive_disposal_rejected() {
        let holding = btc_with_lots(&[("1", "100", 1)]);
        assert_eq!(
            CostBasisMethod::Fifo.calculate_cost_basis(&holding, Decimal::zero()),
            Err(CostBasisError::InvalidAmount(Decimal::zero()))
        );
    }

    #[test]
    fn test_average_match_lots_is_empty() {
        let holding = btc_with_lots(&[("1", "100", 1)]);
        assert!(CostBasisMethod::Average
            .match_lots(&holding, d("5"))
            .unwrap()
            .is_empty());
    }
}
