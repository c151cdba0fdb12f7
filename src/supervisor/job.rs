use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::state::{State, allowed};
use crate::config::SupervisorConfig;
use crate::gate::Candidate;
use crate::tier::Tier;

/// Why a transition was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvanceError {
    #[error("illegal transition {from} → {to}")]
    Illegal { from: State, to: State },

    #[error("step limit exceeded")]
    StepLimit,
}

/// One document's run. Owned exclusively by the supervisor from INIT until
/// the final report is emitted.
#[derive(Debug)]
pub struct ProcessingJob {
    pub id: String,
    pub document_id: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    /// Deadline in seconds; provisional (the configured ceiling) until the
    /// segment count is known.
    pub timeout_seconds: u64,
    pub max_steps: u32,
    pub step_count: u32,
    pub current_state: State,
    pub state_history: Vec<State>,
    pub retry_used: bool,
    pub errors: Vec<String>,
}

impl ProcessingJob {
    pub fn new(document_id: &str, tenant_id: &str, config: &SupervisorConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            tenant_id: tenant_id.to_string(),
            started_at: Utc::now(),
            timeout_seconds: config.timeout_ceiling_secs,
            max_steps: config.max_steps,
            step_count: 0,
            current_state: State::Init,
            state_history: Vec::new(),
            retry_used: false,
            errors: Vec::new(),
        }
    }

    /// Fixes the job deadline once the segment count is known, clamped to
    /// the configured floor and ceiling.
    pub fn set_deadline(&mut self, segment_count: usize, config: &SupervisorConfig) {
        let raw = config.per_segment_secs.saturating_mul(segment_count as u64);
        self.timeout_seconds = raw.clamp(config.timeout_floor_secs, config.timeout_ceiling_secs);
    }

    /// Wall-clock time left before the job deadline.
    pub fn remaining(&self) -> Duration {
        let elapsed = (Utc::now() - self.started_at).to_std().unwrap_or_default();
        Duration::from_secs(self.timeout_seconds).saturating_sub(elapsed)
    }

    /// Moves to `to` if the edge exists and the step budget allows it.
    /// Transitions into ERROR and DONE are exempt from the step cap so a
    /// capped job can still terminate.
    pub fn advance(&mut self, to: State) -> Result<(), AdvanceError> {
        let from = self.current_state;
        if !allowed(from, to) {
            return Err(AdvanceError::Illegal { from, to });
        }
        if self.step_count >= self.max_steps && !matches!(to, State::Error | State::Done) {
            return Err(AdvanceError::StepLimit);
        }
        self.state_history.push(from);
        self.current_state = to;
        self.step_count += 1;
        Ok(())
    }

    /// Forces the job into ERROR, recording the reason. Always succeeds:
    /// every working state has an ERROR edge.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.errors.push(reason);
        if self.current_state != State::Error {
            self.state_history.push(self.current_state);
            self.current_state = State::Error;
            self.step_count += 1;
        }
    }
}

/// The result every job yields, success or not. Downstream consumers never
/// see a throw; "no concepts found" and "pipeline error" share this shape.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub document_id: String,
    pub tenant_id: String,
    /// `Done` for a clean run, `Error` when the job failed (the FSM still
    /// terminated in DONE either way).
    pub final_state: State,
    pub promoted: Vec<Candidate>,
    pub rejected: Vec<Candidate>,
    pub promotion_rate: f64,
    pub cost_incurred: f64,
    pub calls_per_tier: HashMap<Tier, u32>,
    pub steps: u32,
    pub errors: Vec<String>,
    pub state_transitions: Vec<State>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}
