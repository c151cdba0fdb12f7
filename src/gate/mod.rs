//! Quality gate: scores, filters, and promotes extraction candidates.

mod candidate;
mod evaluate;
mod profile;
mod rules;

use async_trait::async_trait;

pub use candidate::{Candidate, CandidateStatus, ContextScores};
pub use evaluate::{GateOutcome, evaluate};
pub use profile::{GateProfile, RequiredField};
pub use rules::{RejectReason, hard_reject};

/// Optional external collaborator that scores a candidate against the
/// document's domain (own-vendor vs competitor concepts). Consumed by the
/// supervisor before gate evaluation; candidates it declines to score pass
/// through the gate unmodified.
#[async_trait]
pub trait ContextScorer: Send + Sync {
    async fn score(&self, candidate: &Candidate, domain_context: &str) -> Option<ContextScores>;
}
