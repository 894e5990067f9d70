use super::{
    fees, flag_if_overdrawn, require_positive, resolve_unit_price, StrategyContext, StrategyError,
};
use crate::domain::{FinancialTransaction, Money};
use crate::engine::events::{DomainEvent, RealizationEvent};

/// Debit the sent asset. Disposals of anything but the reporting currency
/// produce a realization event priced at the close.
pub(super) async fn process(
    transaction: &mut FinancialTransaction,
    ctx: &mut StrategyContext<'_>,
) -> Result<Vec<DomainEvent>, StrategyError> {
    let sent = transaction.sent_amount.clone();
    let sent = require_positive(transaction, "sent", sent)?;
    let asset = sent.currency_code.clone();

    let unit = resolve_unit_price(ctx, transaction, &asset).await;
    let default_currency = ctx.default_currency.clone();
    transaction.value_in_default_currency =
        Some(Money::new(sent.amount * unit.price, default_currency.clone()));

    let mut events = Vec::new();
    let holding = ctx.holdings.get_or_create(&asset);
    if !sent.is_in(&default_currency) {
        events.push(DomainEvent::FinancialEventAdded(RealizationEvent {
            transaction_id: transaction.id.clone(),
            date_time: transaction.date_time,
            disposed: sent.clone(),
            price_per_unit: Money::new(unit.price, default_currency),
            price_is_fallback: unit.fallback,
            holding: holding.clone(),
        }));
    }
    holding.debit(sent.amount);
    flag_if_overdrawn(transaction, holding);

    fees::apply(transaction, ctx).await;
    Ok(events)
}
