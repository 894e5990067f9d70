//! Replay ordering for ledger transactions.

use crate::domain::FinancialTransaction;
use std::borrow::Borrow;

/// Sort transactions chronologically.
///
/// The sort is stable: transactions sharing a timestamp keep the order they
/// were supplied in (wallet order, then insertion order), so replay is
/// reproducible without inventing a secondary key.
pub fn sort_chronologically<T: Borrow<FinancialTransaction>>(transactions: &mut [T]) {
    transactions.sort_by_key(|t| t.borrow().date_time);
}
