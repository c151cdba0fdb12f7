mod budget;
mod cli;
mod config;
mod dispatch;
mod freepath;
mod gate;
mod mining;
mod provider;
mod router;
mod segment;
mod supervisor;
mod tier;
mod ui;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::budget::{BudgetLedger, InMemoryCounterStore};
use crate::cli::{Cli, Command};
use crate::config::GleanerConfig;
use crate::dispatch::Dispatcher;
use crate::provider::{CallOutput, CallPayload, HttpProvider, ProviderError, ReasoningProvider};
use crate::segment::{ParagraphSegmenter, Segment};
use crate::supervisor::Supervisor;
use crate::tier::Tier;
use crate::ui::JobProgress;

const DEMO_DOCUMENT: &str = "\
The procurement team finished migrating purchase orders from SAP Ariba to the \
new Coupa Platform last quarter. Invoice matching now flows through an Apache \
Kafka event bus before settling in PostgreSQL.

Contract renewals still live in Salesforce, which the integration squad syncs \
nightly over the MuleSoft API gateway. OAuth2 tokens rotate every twelve hours.

The data science group prototyped a Demand Forecasting pipeline on Databricks, \
feeding Delta Lake tables consumed by the Tableau dashboards the finance \
controllers review each Monday morning.";

/// Offline provider used when no API key is configured: harvests the same
/// heuristics as the free path but reports them at paid-tier confidence, so
/// the demo exercises the full pipeline without network traffic.
struct OfflineProvider;

#[async_trait]
impl ReasoningProvider for OfflineProvider {
    async fn call(&self, tier: Tier, payload: &CallPayload) -> Result<CallOutput, ProviderError> {
        let segment = Segment {
            text: payload.text.clone(),
            entity_count: 0,
            token_length: 0,
        };
        let candidates: Vec<serde_json::Value> = freepath::extract(&segment, payload.segment_index)
            .into_iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "type": c.kind,
                    "definition": null,
                    "confidence": (c.confidence + 0.25).min(0.95),
                })
            })
            .collect();

        Ok(CallOutput {
            text: json!({ "candidates": candidates }).to_string(),
            cost: match tier {
                Tier::Big => 0.03,
                _ => 0.01,
            },
            latency_ms: 40,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "gleaner=debug" } else { "gleaner=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let mut config = GleanerConfig::load()?;
    if let Some(profile) = cli.profile {
        config.gate.profile = profile.as_config_name().to_string();
        config.validate()?;
    }

    let provider: Arc<dyn ReasoningProvider> = if config.api_key.is_empty() {
        tracing::info!("no API key configured, using the offline provider");
        Arc::new(OfflineProvider)
    } else {
        Arc::new(HttpProvider::new(config.api_key.clone()))
    };

    let ledger = Arc::new(BudgetLedger::new(
        config.budget.clone(),
        Arc::new(InMemoryCounterStore::new()),
    ));
    let dispatcher = Dispatcher::new(provider, &config.dispatch);
    let supervisor = Supervisor::new(config.clone(), ledger, dispatcher)?;

    match cli.command {
        Command::Run { file, document_id } => {
            let text = std::fs::read_to_string(&file)?;
            let document_id = document_id.unwrap_or(file);
            run_document(&supervisor, &document_id, &cli.tenant, &text).await;
        }
        Command::Demo => {
            run_document(&supervisor, "demo-document", &cli.tenant, DEMO_DOCUMENT).await;
        }
        Command::Status => {
            print_status(&config);
        }
    }

    Ok(())
}

async fn run_document(supervisor: &Supervisor, document_id: &str, tenant: &str, text: &str) {
    let progress = JobProgress::start(document_id);
    let report = supervisor
        .submit_job(document_id, tenant, ParagraphSegmenter::source(text))
        .await;
    progress.complete(&report);
    progress.print_report(&report);
}

fn print_status(config: &GleanerConfig) {
    println!("gate profile:        {}", config.gate.profile);
    println!(
        "per-document caps:   SMALL {} / BIG {}",
        config.budget.doc_cap_small, config.budget.doc_cap_big
    );
    println!(
        "tenant daily quotas: SMALL {} / BIG {}",
        config.budget.daily_quota_small, config.budget.daily_quota_big
    );
    println!(
        "rate limits:         SMALL {}/{}s, BIG {}/{}s",
        config.dispatch.rate_limit_small,
        config.dispatch.rate_window_secs,
        config.dispatch.rate_limit_big,
        config.dispatch.rate_window_secs
    );
    println!(
        "dispatcher:          {} in flight, {}s call timeout",
        config.dispatch.max_in_flight, config.dispatch.call_timeout_secs
    );
    println!(
        "circuit breaker:     opens at {} failures/100, {}s cool-down",
        config.dispatch.breaker_failure_threshold, config.dispatch.breaker_cooldown_secs
    );
    println!(
        "job deadlines:       {}s/segment within [{}s, {}s], max {} steps",
        config.supervisor.per_segment_secs,
        config.supervisor.timeout_floor_secs,
        config.supervisor.timeout_ceiling_secs,
        config.supervisor.max_steps
    );
    println!(
        "api key:             {}",
        if config.api_key.is_empty() {
            "not configured (offline provider)"
        } else {
            "configured"
        }
    );
}
