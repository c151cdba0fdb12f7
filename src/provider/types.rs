//! Wire types for the reasoning-service Messages endpoint, plus the
//! structured-output contract extraction calls rely on.
//!
//! The service is asked to answer with a single JSON object of the form
//! `{"candidates": [{"name", "type", "definition", "confidence"}]}`;
//! [`parse_candidates`] turns that text back into [`Candidate`]s.

use serde::{Deserialize, Serialize};

use crate::gate::Candidate;
use crate::tier::Tier;

/// What the core hands the dispatcher for one extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPayload {
    pub document_id: String,
    /// Index of the segment within its job, echoed into candidate refs.
    pub segment_index: usize,
    pub text: String,
}

/// What a completed call yields back to the core.
#[derive(Debug, Clone)]
pub struct CallOutput {
    /// Raw model output text (expected: the candidates JSON object).
    pub text: String,
    /// Dollar cost of the call, computed from token usage.
    pub cost: f64,
    pub latency_ms: u64,
}

/// Request body for the `/v1/messages` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
}

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Response body from the `/v1/messages` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

/// A content block within the response; only text blocks are expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Token accounting for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Dollar cost of this usage on the given tier.
    ///
    /// Rates are per million tokens (input, output).
    pub fn cost(&self, tier: Tier) -> f64 {
        let (input_rate, output_rate) = match tier {
            Tier::NoLlm => (0.0, 0.0),
            Tier::Small => (1.0, 5.0),
            Tier::Big => (3.0, 15.0),
        };
        (self.input_tokens as f64 * input_rate + self.output_tokens as f64 * output_rate)
            / 1_000_000.0
    }
}

/// Builds the extraction prompt for one segment.
pub fn extraction_prompt(payload: &CallPayload) -> String {
    format!(
        "Extract the named concepts from this text. Respond with ONLY valid JSON, no other text.\n\
         Format: {{\"candidates\": [\n\
           {{\"name\": \"<concept name>\", \"type\": \"<Product|Technology|Process|Organization|Concept>\", \"definition\": \"<one sentence or null>\", \"confidence\": <0.0-1.0>}}\n\
         ]}}\n\
         \n\
         Rules:\n\
         - Only include concepts the text actually names\n\
         - confidence reflects how clearly the text establishes the concept\n\
         - definition must come from the text, never invented\n\
         \n\
         Text: {}",
        payload.text
    )
}

/// Raw candidate item as the model emits it.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    definition: Option<String>,
    confidence: f64,
}

/// Wrapper for the model's JSON response.
#[derive(Debug, Deserialize)]
struct RawCandidateList {
    candidates: Vec<RawCandidate>,
}

/// Parses model output text into candidates referencing `segment_index`.
pub fn parse_candidates(text: &str, segment_index: usize) -> anyhow::Result<Vec<Candidate>> {
    let parsed: RawCandidateList = serde_json::from_str(text.trim())
        .map_err(|e| anyhow::anyhow!("failed to parse extraction output: {e}"))?;

    Ok(parsed
        .candidates
        .into_iter()
        .map(|raw| {
            let mut candidate = Candidate::new(raw.name, raw.kind, raw.confidence, segment_index);
            candidate.definition = raw.definition.filter(|d| !d.trim().is_empty());
            candidate
        })
        .collect())
}
