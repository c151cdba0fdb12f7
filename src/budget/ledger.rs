//! The budget ledger: reservations against per-document caps and
//! per-tenant daily quotas.
//!
//! This is the most contended resource in the core. Document counters are
//! plain atomics mutated with CAS loops; the daily scope delegates to the
//! [`CounterStore`]. A reservation is a one-way state machine
//! (`Held → Consumed`, `Held/Consumed → Refunded`) driven by atomic
//! compare-exchange, so a given reservation can be refunded at most once no
//! matter how many tasks race on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::BudgetView;
use super::store::CounterStore;
use crate::config::BudgetConfig;
use crate::tier::Tier;

/// Daily counters live a full day past first touch; refunds that arrive
/// after the window expired become no-ops.
const DAILY_TTL: Duration = Duration::from_secs(24 * 3600);

const HELD: u8 = 0;
const CONSUMED: u8 = 1;
const REFUNDED: u8 = 2;

/// Which scope refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetScope {
    Document,
    TenantDaily,
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("budget exhausted on tier {tier} ({scope:?} scope, {remaining} remaining)")]
    Exhausted {
        tier: Tier,
        scope: BudgetScope,
        remaining: i64,
    },

    #[error("document {0} is not registered with the ledger")]
    UnknownDocument(String),
}

/// Answer to a budget check: the governing (smaller) remaining value wins.
#[derive(Debug, Clone, Copy)]
pub struct BudgetDecision {
    pub ok: bool,
    pub remaining: i64,
    pub limited_by: Option<BudgetScope>,
}

/// A provisional hold on budget that must be consumed or refunded.
#[derive(Debug)]
pub struct Reservation {
    pub id: Uuid,
    pub tenant: String,
    pub tier: Tier,
    pub document_id: String,
    pub amount: i64,
    /// The `(tenant, tier, UTC day)` counter key this hold was taken
    /// against; refunds target this key even across a day boundary.
    day_key: String,
    state: AtomicU8,
}

impl Reservation {
    fn free(tenant: &str, tier: Tier, document_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            tier,
            document_id: document_id.to_string(),
            amount: 0,
            day_key: String::new(),
            state: AtomicU8::new(HELD),
        }
    }
}

#[derive(Debug)]
struct DocBudget {
    remaining_small: AtomicI64,
    remaining_big: AtomicI64,
}

impl DocBudget {
    fn counter(&self, tier: Tier) -> Option<&AtomicI64> {
        match tier {
            Tier::NoLlm => None,
            Tier::Small => Some(&self.remaining_small),
            Tier::Big => Some(&self.remaining_big),
        }
    }
}

/// The shared ledger. One instance serves every concurrent job.
pub struct BudgetLedger {
    config: BudgetConfig,
    docs: dashmap::DashMap<String, DocBudget>,
    store: Arc<dyn CounterStore>,
}

impl BudgetLedger {
    pub fn new(config: BudgetConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            config,
            docs: dashmap::DashMap::new(),
            store,
        }
    }

    /// Registers a document's per-tier caps. Called by the supervisor at
    /// INIT; idempotent for an already-registered document.
    pub fn register_document(&self, document_id: &str) {
        self.docs
            .entry(document_id.to_string())
            .or_insert_with(|| DocBudget {
                remaining_small: AtomicI64::new(self.config.doc_cap_small),
                remaining_big: AtomicI64::new(self.config.doc_cap_big),
            });
    }

    /// Drops a document's counters once its job reaches a terminal state.
    pub fn release_document(&self, document_id: &str) {
        self.docs.remove(document_id);
    }

    fn day_key(tenant: &str, tier: Tier) -> String {
        format!("{tenant}:{tier}:{}", Utc::now().format("%Y-%m-%d"))
    }

    /// Checks whether `n` calls on `tier` would be granted. The smaller of
    /// the two remaining values governs the decision.
    pub fn check(&self, tenant: &str, tier: Tier, n: i64, document_id: &str) -> BudgetDecision {
        if !tier.is_paid() {
            return BudgetDecision {
                ok: true,
                remaining: i64::MAX,
                limited_by: None,
            };
        }

        let doc_remaining = self
            .docs
            .get(document_id)
            .and_then(|doc| doc.counter(tier).map(|c| c.load(Ordering::Acquire)))
            .unwrap_or(0);

        let quota = self.config.daily_quota(tier).unwrap_or(0);
        let daily_remaining = quota - self.store.get(&Self::day_key(tenant, tier));

        let (remaining, limited_by) = if doc_remaining <= daily_remaining {
            (doc_remaining, BudgetScope::Document)
        } else {
            (daily_remaining, BudgetScope::TenantDaily)
        };

        BudgetDecision {
            ok: remaining >= n,
            remaining,
            limited_by: Some(limited_by),
        }
    }

    /// Reserves `n` calls on `tier`, decrementing both scopes. Either both
    /// decrements land or neither does: a daily-quota refusal rolls the
    /// document counter back.
    pub fn reserve(
        &self,
        tenant: &str,
        tier: Tier,
        n: i64,
        document_id: &str,
    ) -> Result<Reservation, BudgetError> {
        if !tier.is_paid() {
            return Ok(Reservation::free(tenant, tier, document_id));
        }

        let doc = self
            .docs
            .get(document_id)
            .ok_or_else(|| BudgetError::UnknownDocument(document_id.to_string()))?;
        let counter = doc.counter(tier).expect("paid tier has a document counter");

        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v >= n).then_some(v - n)
            })
            .map_err(|remaining| BudgetError::Exhausted {
                tier,
                scope: BudgetScope::Document,
                remaining,
            })?;

        let day_key = Self::day_key(tenant, tier);
        let quota = self.config.daily_quota(tier).unwrap_or(0);
        if let Err(used) = self.store.try_add(&day_key, n, quota, DAILY_TTL) {
            // Roll the document decrement back; no partial hold survives.
            counter.fetch_add(n, Ordering::AcqRel);
            return Err(BudgetError::Exhausted {
                tier,
                scope: BudgetScope::TenantDaily,
                remaining: quota - used,
            });
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            tier,
            document_id: document_id.to_string(),
            amount: n,
            day_key,
            state: AtomicU8::new(HELD),
        };
        debug!(
            reservation = %reservation.id,
            %tier, amount = n, tenant, document_id, "budget reserved"
        );
        Ok(reservation)
    }

    /// Marks a reservation as spent. Idempotent; a consumed reservation can
    /// still be refunded exactly once if the call later proves retriable.
    pub fn consume(&self, reservation: &Reservation) {
        let _ = reservation.state.compare_exchange(
            HELD,
            CONSUMED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Returns a reservation's amount to both scopes. Legal at most once
    /// per reservation; returns whether this call performed the refund.
    ///
    /// The daily refund targets the counter the hold was taken against. If
    /// that day's window has expired the daily side is a no-op.
    pub fn refund(&self, reservation: &Reservation) -> bool {
        if reservation.amount == 0 {
            return false;
        }
        let flipped = reservation
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != REFUNDED).then_some(REFUNDED)
            })
            .is_ok();
        if !flipped {
            warn!(reservation = %reservation.id, "double refund attempt ignored");
            return false;
        }

        if let Some(doc) = self.docs.get(&reservation.document_id)
            && let Some(counter) = doc.counter(reservation.tier)
        {
            counter.fetch_add(reservation.amount, Ordering::AcqRel);
        }

        if self
            .store
            .sub_if_present(&reservation.day_key, reservation.amount)
            .is_none()
        {
            debug!(
                reservation = %reservation.id,
                tenant = %reservation.tenant,
                day_key = %reservation.day_key,
                "daily counter expired before refund; skipping"
            );
        }
        true
    }

    /// A read-only view scoped to one tenant and document, for the router.
    pub fn view<'a>(&'a self, tenant: &'a str, document_id: &'a str) -> LedgerView<'a> {
        LedgerView {
            ledger: self,
            tenant,
            document_id,
        }
    }
}

/// Router-facing budget answers for one (tenant, document) pair.
pub struct LedgerView<'a> {
    ledger: &'a BudgetLedger,
    tenant: &'a str,
    document_id: &'a str,
}

impl BudgetView for LedgerView<'_> {
    fn has_allowance(&self, tier: Tier) -> bool {
        self.ledger
            .check(self.tenant, tier, 1, self.document_id)
            .ok
    }
}
