//! Seam for the external pattern-mining collaborator.
//!
//! Between extraction and the quality gate, a miner may derive additional
//! candidates from cross-segment patterns. The core only defines the
//! boundary; [`NoopMiner`] stands in when no mining intelligence is wired.

use async_trait::async_trait;

use crate::gate::Candidate;

#[async_trait]
pub trait PatternMiner: Send + Sync {
    /// Returns additional candidates derived from the extracted set.
    async fn mine(&self, candidates: &[Candidate]) -> Vec<Candidate>;
}

/// Mines nothing.
pub struct NoopMiner;

#[async_trait]
impl PatternMiner for NoopMiner {
    async fn mine(&self, _candidates: &[Candidate]) -> Vec<Candidate> {
        Vec::new()
    }
}
