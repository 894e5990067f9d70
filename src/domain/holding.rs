//! Per-asset holding state and its acquisition lots.

use crate::domain::{CurrencyCode, Decimal, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One acquisition lot. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub amount: Decimal,
    pub price_per_unit: Decimal,
    pub purchase_date: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn new(amount: Decimal, price_per_unit: Decimal, purchase_date: DateTime<Utc>) -> Self {
        Self {
            amount,
            price_per_unit,
            purchase_date,
        }
    }

    pub fn cost(&self) -> Decimal {
        self.amount * self.price_per_unit
    }
}

/// Running state of one asset inside one portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHolding {
    pub asset: CurrencyCode,
    /// May go negative; that is a flagged data-quality condition, never clamped.
    pub balance: Decimal,
    /// Weighted average acquisition price in the reporting currency.
    pub average_bought_price: Decimal,
    purchase_records: Vec<PurchaseRecord>,
    pub current_price: Option<Money>,
    pub error_message: String,
}

impl AssetHolding {
    pub fn new(asset: CurrencyCode) -> Self {
        Self {
            asset,
            balance: Decimal::zero(),
            average_bought_price: Decimal::zero(),
            purchase_records: Vec::new(),
            current_price: None,
            error_message: String::new(),
        }
    }

    /// Rebuild a holding from persisted state.
    pub fn from_parts(
        asset: CurrencyCode,
        balance: Decimal,
        average_bought_price: Decimal,
        purchase_records: Vec<PurchaseRecord>,
    ) -> Self {
        Self {
            balance,
            average_bought_price,
            purchase_records,
            ..Self::new(asset)
        }
    }

    /// Lots in insertion order.
    pub fn purchase_records(&self) -> &[PurchaseRecord] {
        &self.purchase_records
    }

    pub fn is_overdrawn(&self) -> bool {
        self.balance.is_negative()
    }

    /// Add units bought at `price_per_unit` and fold them into the weighted
    /// average: `(avg * held + amount * price) / (held + amount)`.
    ///
    /// A deficit (negative balance) carries no cost, so only the positive part
    /// of the old balance is weighted.
    pub fn record_acquisition(
        &mut self,
        amount: Decimal,
        price_per_unit: Decimal,
        purchase_date: DateTime<Utc>,
    ) {
        let held = self.balance.clamp_non_negative();
        let old_cost = self.average_bought_price * held;
        let new_cost = old_cost + amount * price_per_unit;

        self.balance += amount;
        self.purchase_records
            .push(PurchaseRecord::new(amount, price_per_unit, purchase_date));

        if self.balance.is_zero() {
            self.average_bought_price = Decimal::zero();
        } else if let Some(avg) = new_cost.checked_div(held + amount) {
            self.average_bought_price = avg;
        }
    }

    /// Increase the balance without touching cost basis or lots.
    pub fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
        if self.balance.is_zero() {
            self.average_bought_price = Decimal::zero();
        }
    }

    /// Remove units. Returns the resulting balance, which the caller flags when
    /// negative. An exactly-zero balance resets the average price.
    pub fn debit(&mut self, amount: Decimal) -> Decimal {
        self.balance -= amount;
        if self.balance.is_zero() {
            self.average_bought_price = Decimal::zero();
        }
        self.balance
    }

    /// Value of the current balance at `current_price`, when known.
    pub fn market_value(&self) -> Option<Money> {
        self.current_price
            .as_ref()
            .map(|price| price.times(self.balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_weighted_average_over_acquisitions() {
        let mut holding = AssetHolding::new(CurrencyCode::new("BTC"));
        holding.record_acquisition(d("1"), d("10000"), day(1));
        assert_eq!(holding.average_bought_price, d("10000"));

        holding.record_acquisition(d("3"), d("20000"), day(2));
        // (1*10000 + 3*20000) / 4
        assert_eq!(holding.average_bought_price, d("17500"));
        assert_eq!(holding.balance, d("4"));
        assert_eq!(holding.purchase_records().len(), 2);
    }

    #[test]
    fn test_debit_to_zero_resets_average() {
        let mut holding = AssetHolding::new(CurrencyCode::new("BTC"));
        holding.record_acquisition(d("2"), d("100"), day(1));

        assert_eq!(holding.debit(d("0.5")), d("1.5"));
        assert_eq!(holding.average_bought_price, d("100"));

        assert_eq!(holding.debit(d("1.5")), Decimal::zero());
        assert_eq!(holding.average_bought_price, Decimal::zero());
    }

    #[test]
    fn test_overdraw_is_recorded_not_clamped() {
        let mut holding = AssetHolding::new(CurrencyCode::new("ETH"));
        holding.record_acquisition(d("1"), d("2000"), day(1));
        let balance = holding.debit(d("1.25"));
        assert_eq!(balance, d("-0.25"));
        assert!(holding.is_overdrawn());
        assert_eq!(holding.average_bought_price, d("2000"));
    }

    #[test]
    fn test_acquisition_after_deficit_prices_only_new_units() {
        let mut holding = AssetHolding::new(CurrencyCode::new("ETH"));
        holding.debit(d("1"));
        holding.record_acquisition(d("3"), d("10"), day(2));
        assert_eq!(holding.balance, d("2"));
        assert_eq!(holding.average_bought_price, d("10"));
    }

    #[test]
    fn test_overdraft_does_not_drag_down_the_next_average() {
        let mut holding = AssetHolding::new(CurrencyCode::new("ETH"));
        holding.record_acquisition(d("1"), d("100"), day(1));
        holding.debit(d("2"));
        assert_eq!(holding.average_bought_price, d("100"));

        // Weighting the -1 deficit at 100 would give (-100 + 30) / 2.
        holding.record_acquisition(d("3"), d("10"), day(3));
        assert_eq!(holding.balance, d("2"));
        assert_eq!(holding.average_bought_price, d("10"));
    }

    #[test]
    fn test_market_value() {
        let mut holding = AssetHolding::new(CurrencyCode::new("BTC"));
        holding.record_acquisition(d("0.5"), d("20000"), day(1));
        assert_eq!(holding.market_value(), None);

        holding.current_price = Some(Money::new(d("30000"), CurrencyCode::new("USD")));
        assert_eq!(
            holding.market_value(),
            Some(Money::new(d("15000"), CurrencyCode::new("USD")))
        );
    }
}
