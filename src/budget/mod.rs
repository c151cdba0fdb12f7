//! Two-scope budget accounting: per-document caps and per-tenant daily
//! quotas, with reserve/consume/refund semantics.

mod ledger;
mod store;

pub use ledger::{BudgetDecision, BudgetError, BudgetLedger, BudgetScope, LedgerView, Reservation};
pub use store::{CounterStore, InMemoryCounterStore};

use crate::tier::Tier;

/// Read-only budget answers for the router's fallback walk.
pub trait BudgetView {
    /// Whether one more call on `tier` would be granted right now.
    fn has_allowance(&self, tier: Tier) -> bool;
}
