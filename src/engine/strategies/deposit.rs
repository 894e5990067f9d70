use super::{
    fees, flag_if_overdrawn, require_positive, resolve_unit_price, StrategyContext, StrategyError,
    UnitPrice,
};
use crate::domain::{FinancialTransaction, Money};
use crate::engine::events::DomainEvent;

/// Credit the received asset at its close price and open a new lot.
pub(super) async fn process(
    transaction: &mut FinancialTransaction,
    ctx: &mut StrategyContext<'_>,
) -> Result<Vec<DomainEvent>, StrategyError> {
    let received = transaction.received_amount.clone();
    let received = require_positive(transaction, "received", received)?;
    let asset = received.currency_code.clone();

    let unit = if received.is_in(ctx.default_currency) {
        UnitPrice::par()
    } else {
        resolve_unit_price(ctx, transaction, &asset).await
    };
    transaction.value_in_default_currency = Some(Money::new(
        received.amount * unit.price,
        ctx.default_currency.clone(),
    ));

    let holding = ctx.holdings.get_or_create(&asset);
    holding.record_acquisition(received.amount, unit.price, transaction.date_time);
    flag_if_overdrawn(transaction, holding);

    fees::apply(transaction, ctx).await;
    Ok(Vec::new())
}
