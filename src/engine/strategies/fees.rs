use super::{flag_if_overdrawn, resolve_unit_price, StrategyContext};
use crate::domain::{FinancialTransaction, Money};

/// Value the fee in the reporting currency and take it out of the fee
/// asset's holding.
///
/// A fee paid in the received currency is assumed to be netted out of the
/// received amount already and only gets valued.
pub(super) async fn apply(transaction: &mut FinancialTransaction, ctx: &mut StrategyContext<'_>) {
    let Some(fee) = transaction.fee_amount.clone().map(|f| f.abs()) else {
        return;
    };
    if fee.is_zero() {
        transaction.fee_value_in_default_currency = Some(Money::zero(ctx.default_currency.clone()));
        return;
    }

    let unit = resolve_unit_price(ctx, transaction, &fee.currency_code).await;
    transaction.fee_value_in_default_currency = Some(Money::new(
        fee.amount * unit.price,
        ctx.default_currency.clone(),
    ));

    let netted = transaction
        .received_amount
        .as_ref()
        .is_some_and(|received| received.currency_code == fee.currency_code);
    if !netted {
        let holding = ctx.holdings.get_or_create(&fee.currency_code);
        holding.debit(fee.amount);
        flag_if_overdrawn(transaction, holding);
    }
}
