use super::{
    fees, flag_if_overdrawn, require_positive, resolve_unit_price, StrategyContext, StrategyError,
    UnitPrice,
};
use crate::domain::{Decimal, FinancialTransaction, Money};
use crate::engine::events::{DomainEvent, RealizationEvent};

/// Exchange the sent asset for the received one.
///
/// Valuation precedence: the received leg when it is in the reporting
/// currency, else the sent leg when it is, else the sent asset's close price.
pub(super) async fn process(
    transaction: &mut FinancialTransaction,
    ctx: &mut StrategyContext<'_>,
) -> Result<Vec<DomainEvent>, StrategyError> {
    let received = transaction.received_amount.clone();
    let received = require_positive(transaction, "received", received)?;
    let sent = transaction.sent_amount.clone();
    let sent = require_positive(transaction, "sent", sent)?;
    let default_currency = ctx.default_currency.clone();

    let (value, sent_unit) = if received.is_in(&default_currency) {
        (received.amount, implied_unit(received.amount, sent.amount))
    } else if sent.is_in(&default_currency) {
        (sent.amount, UnitPrice::par())
    } else {
        let unit = resolve_unit_price(ctx, transaction, &sent.currency_code).await;
        (sent.amount * unit.price, unit)
    };
    transaction.value_in_default_currency = Some(Money::new(value, default_currency.clone()));

    let mut events = Vec::new();
    if !sent.is_in(&default_currency) {
        let snapshot = ctx.holdings.get_or_create(&sent.currency_code).clone();
        events.push(DomainEvent::FinancialEventAdded(RealizationEvent {
            transaction_id: transaction.id.clone(),
            date_time: transaction.date_time,
            disposed: sent.clone(),
            price_per_unit: Money::new(sent_unit.price, default_currency.clone()),
            price_is_fallback: sent_unit.fallback,
            holding: snapshot,
        }));
    }

    let received_unit = implied_unit(value, received.amount).price;
    let receiver = ctx.holdings.get_or_create(&received.currency_code);
    receiver.record_acquisition(received.amount, received_unit, transaction.date_time);
    flag_if_overdrawn(transaction, receiver);

    let sender = ctx.holdings.get_or_create(&sent.currency_code);
    sender.debit(sent.amount);
    flag_if_overdrawn(transaction, sender);

    fees::apply(transaction, ctx).await;
    Ok(events)
}

/// Price per unit implied by `value` spread over `amount`. Both are positive here.
fn implied_unit(value: Decimal, amount: Decimal) -> UnitPrice {
    UnitPrice {
        price: value.checked_div(amount).unwrap_or_default(),
        fallback: false,
    }
}
