//! Drives jobs through the full pipeline lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{info, warn};

use super::job::{AdvanceError, JobReport, ProcessingJob};
use super::state::{State, validate_transitions};
use crate::budget::BudgetLedger;
use crate::config::GleanerConfig;
use crate::dispatch::{DispatchError, DispatchTicket, Dispatcher, Priority};
use crate::freepath;
use crate::gate::{self, Candidate, ContextScorer, GateOutcome, GateProfile};
use crate::mining::PatternMiner;
use crate::provider::CallPayload;
use crate::provider::types::parse_candidates;
use crate::router::select_route;
use crate::segment::{Segment, SegmentSource};
use crate::tier::Tier;

/// One supervisor serves many concurrent jobs; the ledger and dispatcher it
/// holds are the shared, contended resources.
pub struct Supervisor {
    config: GleanerConfig,
    profile: GateProfile,
    ledger: Arc<BudgetLedger>,
    dispatcher: Dispatcher,
    scorer: Option<Arc<dyn ContextScorer>>,
    miner: Option<Arc<dyn PatternMiner>>,
}

/// Running totals carried across stages and retries.
#[derive(Default)]
struct Accumulator {
    cost: f64,
    calls: HashMap<Tier, u32>,
    last_outcome: Option<GateOutcome>,
}

/// What one segment's extraction produced.
#[derive(Default)]
struct SegmentYield {
    candidates: Vec<Candidate>,
    cost: f64,
    calls: Vec<(Tier, u32)>,
    errors: Vec<String>,
}

impl Supervisor {
    /// Validates the transition table and gate profile before anything runs.
    pub fn new(
        config: GleanerConfig,
        ledger: Arc<BudgetLedger>,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        validate_transitions().map_err(|e| anyhow::anyhow!("broken transition table: {e}"))?;
        let profile = GateProfile::from_name(&config.gate.profile)
            .with_context(|| format!("unknown gate profile {:?}", config.gate.profile))?;
        Ok(Self {
            config,
            profile,
            ledger,
            dispatcher,
            scorer: None,
            miner: None,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ContextScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_miner(mut self, miner: Arc<dyn PatternMiner>) -> Self {
        self.miner = Some(miner);
        self
    }

    /// Runs one document through the pipeline. Never panics and never
    /// throws: every job, failed or not, yields a well-formed report.
    pub async fn submit_job(
        &self,
        document_id: &str,
        tenant_id: &str,
        segments: SegmentSource,
    ) -> JobReport {
        let mut job = ProcessingJob::new(document_id, tenant_id, &self.config.supervisor);
        let mut acc = Accumulator::default();

        if let Err(reason) = self.run(&mut job, segments, &mut acc).await {
            warn!(document_id, %reason, "job failed");
            job.fail(reason);
        }
        if job.current_state != State::Done {
            let _ = job.advance(State::Done);
        }
        self.ledger.release_document(document_id);

        self.build_report(job, acc)
    }

    async fn run(
        &self,
        job: &mut ProcessingJob,
        segments: SegmentSource,
        acc: &mut Accumulator,
    ) -> Result<(), String> {
        // INIT
        self.ledger.register_document(&job.document_id);
        step(job, State::BudgetCheck)?;

        // BUDGET_CHECK: exhaustion is not fatal, the free path absorbs it.
        let small = self
            .ledger
            .check(&job.tenant_id, Tier::Small, 1, &job.document_id);
        let big = self
            .ledger
            .check(&job.tenant_id, Tier::Big, 1, &job.document_id);
        if !small.ok && !big.ok {
            warn!(
                document_id = %job.document_id,
                tenant_id = %job.tenant_id,
                "paid tiers exhausted, document rides the free path"
            );
        }
        step(job, State::Segment)?;

        // SEGMENT: the provider sequence is finite and consumed once.
        let segments: Vec<Segment> = segments.collect();
        job.set_deadline(segments.len(), &self.config.supervisor);
        info!(
            document_id = %job.document_id,
            segments = segments.len(),
            deadline_secs = job.timeout_seconds,
            "segmented"
        );
        step(job, State::Extract)?;

        // EXTRACT: first pass at P1; a retry re-enters at P0, escalated.
        let mut candidates = self
            .extract_stage(job, &segments, Priority::P1, false, acc)
            .await?;
        step(job, State::MinePatterns)?;

        loop {
            // MINE_PATTERNS
            if let Some(miner) = &self.miner {
                let mined = timeout(job.remaining(), miner.mine(&candidates))
                    .await
                    .map_err(|_| "TIMEOUT: pattern mining overran the job deadline")?;
                candidates.extend(mined);
            }
            step(job, State::GateCheck)?;

            // GATE_CHECK
            if let Some(scorer) = &self.scorer {
                candidates = timeout(
                    job.remaining(),
                    score_candidates(scorer.as_ref(), &job.tenant_id, candidates),
                )
                .await
                .map_err(|_| "TIMEOUT: contextual scoring overran the job deadline")?;
            }
            let outcome = gate::evaluate(std::mem::take(&mut candidates), &self.profile);
            info!(
                document_id = %job.document_id,
                promoted = outcome.promoted.len(),
                rejected = outcome.rejected.len(),
                rate = outcome.promotion_rate,
                retry_recommended = outcome.retry_recommended,
                "gate evaluated"
            );
            let retry = outcome.retry_recommended && !job.retry_used;
            acc.last_outcome = Some(outcome);

            if !retry {
                break;
            }
            // The single permitted back-edge: escalate and go again.
            job.retry_used = true;
            step(job, State::Extract)?;
            candidates = self
                .extract_stage(job, &segments, Priority::P0, true, acc)
                .await?;
            step(job, State::MinePatterns)?;
        }

        // PROMOTE: candidates are already tagged; storage consumes the report.
        step(job, State::Promote)?;
        step(job, State::Finalize)?;

        // FINALIZE: emit the job's final metrics.
        info!(
            document_id = %job.document_id,
            cost = acc.cost,
            steps = job.step_count,
            retry_used = job.retry_used,
            "job finalized"
        );
        step(job, State::Done)?;
        Ok(())
    }

    /// Fans segments out concurrently; the dispatcher's global in-flight
    /// ceiling bounds the parallelism. Overrunning the job deadline abandons
    /// the stage: in-flight calls complete inside the dispatcher but their
    /// results are discarded.
    async fn extract_stage(
        &self,
        job: &mut ProcessingJob,
        segments: &[Segment],
        priority: Priority,
        escalate: bool,
        acc: &mut Accumulator,
    ) -> Result<Vec<Candidate>, String> {
        let mut tasks = JoinSet::new();
        for (index, segment) in segments.iter().cloned().enumerate() {
            let ledger = Arc::clone(&self.ledger);
            let dispatcher = self.dispatcher.clone();
            let tenant = job.tenant_id.clone();
            let document_id = job.document_id.clone();
            tasks.spawn(async move {
                process_segment(
                    &ledger,
                    &dispatcher,
                    &tenant,
                    &document_id,
                    segment,
                    index,
                    priority,
                    escalate,
                )
                .await
            });
        }

        let gather = async {
            let mut yields = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                yields.push(joined);
            }
            yields
        };
        let yields = timeout(job.remaining(), gather)
            .await
            .map_err(|_| "TIMEOUT: extraction overran the job deadline".to_string())?;

        let mut candidates = Vec::new();
        for joined in yields {
            match joined {
                Ok(segment_yield) => {
                    candidates.extend(segment_yield.candidates);
                    acc.cost += segment_yield.cost;
                    for (tier, n) in segment_yield.calls {
                        *acc.calls.entry(tier).or_insert(0) += n;
                    }
                    job.errors.extend(segment_yield.errors);
                }
                Err(join_err) => {
                    job.errors.push(format!("segment task failed: {join_err}"));
                }
            }
        }
        Ok(candidates)
    }

    fn build_report(&self, job: ProcessingJob, acc: Accumulator) -> JobReport {
        let failed =
            job.state_history.contains(&State::Error) || job.current_state == State::Error;
        let (promoted, rejected, promotion_rate) = match acc.last_outcome {
            Some(outcome) => (outcome.promoted, outcome.rejected, outcome.promotion_rate),
            None => (Vec::new(), Vec::new(), 0.0),
        };

        let completed_at = Utc::now();
        let mut state_transitions = job.state_history;
        state_transitions.push(job.current_state);

        JobReport {
            job_id: job.id,
            document_id: job.document_id,
            tenant_id: job.tenant_id,
            final_state: if failed { State::Error } else { State::Done },
            promoted,
            rejected,
            promotion_rate,
            cost_incurred: acc.cost,
            calls_per_tier: acc.calls,
            steps: job.step_count,
            errors: job.errors,
            state_transitions,
            started_at: job.started_at,
            completed_at,
            duration_ms: (completed_at - job.started_at).num_milliseconds(),
        }
    }
}

/// Advances the FSM, converting deadline and step-cap violations into the
/// stage failure strings the error path records.
fn step(job: &mut ProcessingJob, to: State) -> Result<(), String> {
    if job.remaining().is_zero() && !matches!(to, State::Error | State::Done) {
        return Err("TIMEOUT: job deadline exceeded".to_string());
    }
    job.advance(to).map_err(|e| match e {
        AdvanceError::StepLimit => "STEP_LIMIT_EXCEEDED".to_string(),
        AdvanceError::Illegal { .. } => format!("supervisor defect: {e}"),
    })
}

async fn score_candidates(
    scorer: &dyn ContextScorer,
    domain: &str,
    mut candidates: Vec<Candidate>,
) -> Vec<Candidate> {
    for candidate in &mut candidates {
        if candidate.context_scores.is_none()
            && let Some(scores) = scorer.score(candidate, domain).await
        {
            candidate.context_scores = Some(scores);
        }
    }
    candidates
}

/// Extracts one segment: route, reserve, dispatch, with the fallback walk
/// on exhaustion or an open circuit. The free path is the floor; a segment
/// is never dropped.
#[allow(clippy::too_many_arguments)]
async fn process_segment(
    ledger: &BudgetLedger,
    dispatcher: &Dispatcher,
    tenant: &str,
    document_id: &str,
    segment: Segment,
    index: usize,
    priority: Priority,
    escalate: bool,
) -> SegmentYield {
    let mut result = SegmentYield::default();
    let mut tier = {
        let view = ledger.view(tenant, document_id);
        let chosen = select_route(&segment, &view);
        if escalate { chosen.escalated() } else { chosen }
    };

    loop {
        if tier == Tier::NoLlm {
            result.candidates = freepath::extract(&segment, index);
            return result;
        }

        let reservation = match ledger.reserve(tenant, tier, 1, document_id) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(segment = index, %tier, %e, "reservation refused, walking down");
                tier = tier.cheaper();
                continue;
            }
        };

        let payload = CallPayload {
            document_id: document_id.to_string(),
            segment_index: index,
            text: segment.text.clone(),
        };
        match dispatcher
            .dispatch(DispatchTicket::new(tier, payload, priority))
            .await
        {
            Ok(output) => {
                ledger.consume(&reservation);
                result.cost += output.cost;
                result.calls.push((tier, 1));
                match parse_candidates(&output.text, index) {
                    Ok(candidates) => result.candidates = candidates,
                    Err(e) => {
                        result.errors.push(format!("segment {index}: {e}"));
                        result.candidates = freepath::extract(&segment, index);
                    }
                }
                return result;
            }
            Err(err) => {
                if err.refundable() {
                    ledger.refund(&reservation);
                } else {
                    ledger.consume(&reservation);
                }
                match err {
                    DispatchError::CircuitOpen(_) | DispatchError::RateLimited => {
                        result
                            .errors
                            .push(format!("segment {index}: {err}, walking down"));
                        tier = tier.cheaper();
                    }
                    DispatchError::Provider(ref e) if !e.retriable() => {
                        result.calls.push((tier, 1));
                        result
                            .errors
                            .push(format!("segment {index}: request defect: {err}"));
                        result.candidates = freepath::extract(&segment, index);
                        return result;
                    }
                    DispatchError::Provider(_) | DispatchError::Timeout => {
                        result.calls.push((tier, 1));
                        result.errors.push(format!("segment {index}: {err}"));
                        result.candidates = freepath::extract(&segment, index);
                        return result;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::InMemoryCounterStore;
    use crate::config::{BudgetConfig, SupervisorConfig};
    use crate::gate::ContextScores;
    use crate::provider::{CallOutput, ProviderError, ReasoningProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider whose nth call returns the nth scripted body.
    struct ScriptedProvider {
        bodies: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(bodies: Vec<String>) -> Self {
            Self {
                bodies,
                calls: AtomicUsize::new(0),
            }
        }

        fn repeating(body: &str) -> Self {
            Self::new(vec![body.to_string()])
        }
    }

    #[async_trait]
    impl ReasoningProvider for ScriptedProvider {
        async fn call(
            &self,
            tier: Tier,
            _payload: &CallPayload,
        ) -> Result<CallOutput, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self
                .bodies
                .get(n)
                .or_else(|| self.bodies.last())
                .cloned()
                .unwrap_or_default();
            Ok(CallOutput {
                text: body,
                cost: if tier == Tier::Big { 0.03 } else { 0.01 },
                latency_ms: 5,
            })
        }
    }

    fn strong_body() -> String {
        r#"{"candidates": [
            {"name": "Alpha Engine", "type": "Product", "definition": "The flagship runtime", "confidence": 0.92}
        ]}"#
            .to_string()
    }

    fn weak_body() -> String {
        r#"{"candidates": [
            {"name": "Faint Notion", "type": "Concept", "definition": "Barely there", "confidence": 0.2}
        ]}"#
            .to_string()
    }

    fn dense_segment() -> Segment {
        Segment {
            text: "Alpha Engine connects Beta Store, Gamma Queue, Delta Cache, Epsilon Bus, \
                   Zeta Mesh, Eta Proxy, Theta Vault and Iota Gateway."
                .to_string(),
            entity_count: 9,
            token_length: 120,
        }
    }

    fn medium_segment() -> Segment {
        Segment {
            text: "Alpha Engine talks to Beta Store and Gamma Queue nightly.".to_string(),
            entity_count: 5,
            token_length: 60,
        }
    }

    fn source_of(segments: Vec<Segment>) -> SegmentSource {
        Box::new(segments.into_iter())
    }

    fn supervisor_with(
        provider: Arc<dyn ReasoningProvider>,
        config: GleanerConfig,
    ) -> Supervisor {
        let ledger = Arc::new(BudgetLedger::new(
            config.budget.clone(),
            Arc::new(InMemoryCounterStore::new()),
        ));
        let dispatcher = Dispatcher::new(provider, &config.dispatch);
        Supervisor::new(config, ledger, dispatcher).unwrap()
    }

    #[tokio::test]
    async fn happy_path_walks_the_full_state_sequence() {
        let provider = Arc::new(ScriptedProvider::repeating(&strong_body()));
        let supervisor = supervisor_with(provider.clone(), GleanerConfig::default());

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![dense_segment()]))
            .await;

        assert_eq!(report.final_state, State::Done);
        assert_eq!(report.promoted.len(), 1);
        assert_eq!(report.promoted[0].name, "Alpha Engine");
        assert_eq!(report.promotion_rate, 1.0);
        assert!(report.cost_incurred > 0.0);
        assert_eq!(report.calls_per_tier.get(&Tier::Big), Some(&1));
        assert!(report.errors.is_empty());
        assert_eq!(
            report.state_transitions,
            vec![
                State::Init,
                State::BudgetCheck,
                State::Segment,
                State::Extract,
                State::MinePatterns,
                State::GateCheck,
                State::Promote,
                State::Finalize,
                State::Done,
            ]
        );
    }

    #[tokio::test]
    async fn low_promotion_rate_retries_once_at_escalated_tier() {
        let provider = Arc::new(ScriptedProvider::new(vec![weak_body(), strong_body()]));
        let supervisor = supervisor_with(provider.clone(), GleanerConfig::default());

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![medium_segment()]))
            .await;

        assert_eq!(report.final_state, State::Done);
        assert_eq!(report.promoted.len(), 1);
        // First pass on SMALL, retry escalated to BIG.
        assert_eq!(report.calls_per_tier.get(&Tier::Small), Some(&1));
        assert_eq!(report.calls_per_tier.get(&Tier::Big), Some(&1));
        let extract_entries = report
            .state_transitions
            .iter()
            .filter(|s| **s == State::Extract)
            .count();
        assert_eq!(extract_entries, 2);
    }

    #[tokio::test]
    async fn retry_is_capped_at_exactly_one() {
        let provider = Arc::new(ScriptedProvider::repeating(&weak_body()));
        let supervisor = supervisor_with(provider.clone(), GleanerConfig::default());

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![medium_segment()]))
            .await;

        // Both passes disappoint; the job accepts the best effort.
        assert_eq!(report.final_state, State::Done);
        assert!(report.promoted.is_empty());
        let extract_entries = report
            .state_transitions
            .iter()
            .filter(|s| **s == State::Extract)
            .count();
        assert_eq!(extract_entries, 2);
        let gate_entries = report
            .state_transitions
            .iter()
            .filter(|s| **s == State::GateCheck)
            .count();
        assert_eq!(gate_entries, 2);
    }

    #[tokio::test]
    async fn exhausted_budget_rides_the_free_path_without_calls() {
        let provider = Arc::new(ScriptedProvider::repeating(&strong_body()));
        let mut config = GleanerConfig::default();
        config.budget = BudgetConfig {
            doc_cap_small: 0,
            doc_cap_big: 0,
            ..BudgetConfig::default()
        };
        let supervisor = supervisor_with(provider.clone(), config);

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![dense_segment()]))
            .await;

        assert_eq!(report.final_state, State::Done);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(report.calls_per_tier.is_empty());
        assert_eq!(report.cost_incurred, 0.0);
    }

    #[tokio::test]
    async fn step_limit_forces_error_with_well_formed_report() {
        let provider = Arc::new(ScriptedProvider::repeating(&strong_body()));
        let mut config = GleanerConfig::default();
        config.supervisor = SupervisorConfig {
            max_steps: 3,
            ..SupervisorConfig::default()
        };
        let supervisor = supervisor_with(provider, config);

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![dense_segment()]))
            .await;

        assert_eq!(report.final_state, State::Error);
        assert!(report.errors.iter().any(|e| e.contains("STEP_LIMIT")));
        assert_eq!(*report.state_transitions.last().unwrap(), State::Done);
    }

    struct HangingMiner {
        hang_from_call: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PatternMiner for HangingMiner {
        async fn mine(&self, _candidates: &[Candidate]) -> Vec<Candidate> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.hang_from_call {
                std::future::pending().await
            } else {
                Vec::new()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_the_deadline_forces_error() {
        let provider = Arc::new(ScriptedProvider::repeating(&strong_body()));
        let mut config = GleanerConfig::default();
        config.supervisor = SupervisorConfig {
            per_segment_secs: 1,
            timeout_floor_secs: 2,
            timeout_ceiling_secs: 2,
            ..SupervisorConfig::default()
        };
        config.dispatch.call_timeout_secs = 1;
        let supervisor = supervisor_with(provider, config).with_miner(Arc::new(HangingMiner {
            hang_from_call: 0,
            calls: AtomicUsize::new(0),
        }));

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![dense_segment()]))
            .await;

        assert_eq!(report.final_state, State::Error);
        assert!(report.errors.iter().any(|e| e.contains("TIMEOUT")));
        assert_eq!(*report.state_transitions.last().unwrap(), State::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_gate_check_preserves_partial_results() {
        // First pass: one strong among four candidates → rate 0.25 → retry.
        // The miner hangs on the retry pass, timing the job out after the
        // first gate already promoted a candidate.
        let first_pass = r#"{"candidates": [
            {"name": "Alpha Engine", "type": "Product", "definition": "The flagship runtime", "confidence": 0.92},
            {"name": "Faint One", "type": "Concept", "definition": "x", "confidence": 0.2},
            {"name": "Faint Two", "type": "Concept", "definition": "x", "confidence": 0.2},
            {"name": "Faint Three", "type": "Concept", "definition": "x", "confidence": 0.2}
        ]}"#;
        let provider = Arc::new(ScriptedProvider::repeating(first_pass));
        let mut config = GleanerConfig::default();
        config.supervisor = SupervisorConfig {
            per_segment_secs: 30,
            timeout_floor_secs: 30,
            timeout_ceiling_secs: 30,
            ..SupervisorConfig::default()
        };
        let supervisor = supervisor_with(provider, config).with_miner(Arc::new(HangingMiner {
            hang_from_call: 1,
            calls: AtomicUsize::new(0),
        }));

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![medium_segment()]))
            .await;

        assert_eq!(report.final_state, State::Error);
        // The first gate's promotion survives the failure.
        assert_eq!(report.promoted.len(), 1);
        assert_eq!(report.promoted[0].name, "Alpha Engine");
        assert!(report.errors.iter().any(|e| e.contains("TIMEOUT")));
    }

    struct RivalScorer;

    #[async_trait]
    impl ContextScorer for RivalScorer {
        async fn score(&self, candidate: &Candidate, _domain: &str) -> Option<ContextScores> {
            if candidate.name.starts_with("Rival") {
                Some(ContextScores {
                    primary: 0.1,
                    competitor: 0.9,
                })
            } else {
                Some(ContextScores {
                    primary: 0.9,
                    competitor: 0.1,
                })
            }
        }
    }

    #[tokio::test]
    async fn contextual_scorer_suppresses_competitor_concepts() {
        let body = r#"{"candidates": [
            {"name": "Own Platform", "type": "Product", "definition": "Ours", "confidence": 0.75},
            {"name": "Rival Suite", "type": "Product", "definition": "Theirs", "confidence": 0.75}
        ]}"#;
        let provider = Arc::new(ScriptedProvider::repeating(body));
        let supervisor =
            supervisor_with(provider, GleanerConfig::default()).with_scorer(Arc::new(RivalScorer));

        let report = supervisor
            .submit_job("doc-1", "acme", source_of(vec![medium_segment()]))
            .await;

        assert_eq!(report.final_state, State::Done);
        let promoted: Vec<&str> = report.promoted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(promoted, vec!["Own Platform"]);
        assert!(
            report
                .rejected
                .iter()
                .any(|c| c.name == "Rival Suite" && c.confidence < 0.70)
        );
    }

    #[tokio::test]
    async fn empty_document_completes_with_empty_report() {
        let provider = Arc::new(ScriptedProvider::repeating(&strong_body()));
        let supervisor = supervisor_with(provider.clone(), GleanerConfig::default());

        let report = supervisor
            .submit_job("doc-empty", "acme", source_of(vec![]))
            .await;

        assert_eq!(report.final_state, State::Done);
        assert!(report.promoted.is_empty());
        assert_eq!(report.promotion_rate, 0.0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
