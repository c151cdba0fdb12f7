//! Gate evaluation: contextual cascade, hard rules, profile scoring.

use serde::{Deserialize, Serialize};

use super::candidate::{Candidate, CandidateStatus};
use super::profile::GateProfile;
use super::rules::hard_reject;

/// Margin by which one context score must dominate the other before the
/// cascade adjusts confidence at all.
const CONTEXT_MARGIN: f64 = 0.2;

/// Suppression factor for competitor-dominant candidates.
const COMPETITOR_SUPPRESSION: f64 = 0.5;

/// Result of one gate evaluation over a candidate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub promoted: Vec<Candidate>,
    pub rejected: Vec<Candidate>,
    pub promotion_rate: f64,
    pub retry_recommended: bool,
}

/// Scores and filters `candidates` under `profile`.
///
/// Pure with respect to its inputs: the same candidate set and profile
/// always yield the same promote/reject partition and promotion rate. The
/// only mutation is tagging each candidate with its terminal status (and
/// writing the cascade-adjusted confidence).
pub fn evaluate(candidates: Vec<Candidate>, profile: &GateProfile) -> GateOutcome {
    let total = candidates.len();
    let mut promoted = Vec::new();
    let mut rejected = Vec::new();

    for mut candidate in candidates {
        candidate.confidence = contextual_adjust(&candidate);

        if let Some(reason) = hard_reject(&candidate) {
            candidate.status = CandidateStatus::Rejected {
                reason: reason.to_string(),
            };
            rejected.push(candidate);
            continue;
        }

        if candidate.confidence < profile.min_confidence {
            candidate.status = CandidateStatus::Rejected {
                reason: format!(
                    "confidence {:.2} below profile minimum {:.2}",
                    candidate.confidence, profile.min_confidence
                ),
            };
            rejected.push(candidate);
            continue;
        }

        if let Some(missing) = profile
            .required_fields
            .iter()
            .find(|f| !f.present_on(&candidate))
        {
            candidate.status = CandidateStatus::Rejected {
                reason: format!("missing required field {missing:?}"),
            };
            rejected.push(candidate);
            continue;
        }

        candidate.status = CandidateStatus::Promoted;
        promoted.push(candidate);
    }

    let promotion_rate = if total == 0 {
        0.0
    } else {
        promoted.len() as f64 / total as f64
    };

    GateOutcome {
        retry_recommended: promotion_rate < profile.min_promotion_rate,
        promoted,
        rejected,
        promotion_rate,
    }
}

/// Contextual confidence cascade.
///
/// Primary-dominant candidates (the subject's own concepts) are lifted
/// halfway toward 1.0; competitor-dominant candidates are suppressed into a
/// low band. Candidates without context scores pass through unmodified.
fn contextual_adjust(candidate: &Candidate) -> f64 {
    let confidence = candidate.confidence;
    let Some(scores) = candidate.context_scores else {
        return confidence;
    };

    if scores.primary > scores.competitor + CONTEXT_MARGIN {
        confidence + (1.0 - confidence) * 0.5
    } else if scores.competitor > scores.primary + CONTEXT_MARGIN {
        confidence * COMPETITOR_SUPPRESSION
    } else {
        confidence
    }
}
