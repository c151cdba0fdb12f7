use serde::{Deserialize, Serialize};

/// Scores from the external contextual scorer: how strongly the candidate
/// belongs to the document's own domain versus a named competitor's.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextScores {
    pub primary: f64,
    pub competitor: f64,
}

/// Terminal judgment on a candidate. Candidates are tagged, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Promoted,
    Rejected { reason: String },
}

/// A proposed knowledge item awaiting quality-gate judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    /// Concept type label ("Product", "Technology", ...).
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    /// Confidence in `[0, 1]`. Raw from extraction; the gate's contextual
    /// cascade writes the adjusted value here.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_scores: Option<ContextScores>,
    /// Index of the source segment within the job.
    pub source_segment: usize,
    pub status: CandidateStatus,
}

impl Candidate {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        confidence: f64,
        source_segment: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            definition: None,
            confidence: confidence.clamp(0.0, 1.0),
            context_scores: None,
            source_segment,
            status: CandidateStatus::Pending,
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_context_scores(mut self, primary: f64, competitor: f64) -> Self {
        self.context_scores = Some(ContextScores {
            primary,
            competitor,
        });
        self
    }

    pub fn is_promoted(&self) -> bool {
        self.status == CandidateStatus::Promoted
    }
}
