//! Configuration loaded once from `gleaner.toml`.
//!
//! [`GleanerConfig`] holds every tunable of the orchestration core: budget
//! caps, dispatcher limits, circuit-breaker knobs, gate profile, and the
//! supervisor's deadline bounds. Missing fields fall back to defaults.
//! The `ANTHROPIC_API_KEY` environment variable takes precedence over the
//! file. The struct is immutable after [`GleanerConfig::load`] — components
//! receive it by reference and never re-read the file.

use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::Path;

use crate::tier::Tier;

/// Top-level configuration loaded from `gleaner.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GleanerConfig {
    /// Reasoning-service API key.
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Per-document caps and per-tenant daily quotas, by paid tier.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Calls allowed per document on the SMALL tier.
    #[serde(default = "default_doc_cap_small")]
    pub doc_cap_small: i64,
    /// Calls allowed per document on the BIG tier.
    #[serde(default = "default_doc_cap_big")]
    pub doc_cap_big: i64,
    /// Calls allowed per tenant per UTC day on the SMALL tier.
    #[serde(default = "default_daily_quota_small")]
    pub daily_quota_small: i64,
    /// Calls allowed per tenant per UTC day on the BIG tier.
    #[serde(default = "default_daily_quota_big")]
    pub daily_quota_big: i64,
}

fn default_doc_cap_small() -> i64 {
    40
}
fn default_doc_cap_big() -> i64 {
    8
}
fn default_daily_quota_small() -> i64 {
    2000
}
fn default_daily_quota_big() -> i64 {
    400
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            doc_cap_small: default_doc_cap_small(),
            doc_cap_big: default_doc_cap_big(),
            daily_quota_small: default_daily_quota_small(),
            daily_quota_big: default_daily_quota_big(),
        }
    }
}

impl BudgetConfig {
    /// Per-document cap for a tier. The free tier is un-metered.
    pub fn doc_cap(&self, tier: Tier) -> Option<i64> {
        match tier {
            Tier::NoLlm => None,
            Tier::Small => Some(self.doc_cap_small),
            Tier::Big => Some(self.doc_cap_big),
        }
    }

    /// Per-tenant daily quota for a tier. The free tier is un-metered.
    pub fn daily_quota(&self, tier: Tier) -> Option<i64> {
        match tier {
            Tier::NoLlm => None,
            Tier::Small => Some(self.daily_quota_small),
            Tier::Big => Some(self.daily_quota_big),
        }
    }
}

/// Dispatcher throughput ceilings and circuit-breaker knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// SMALL-tier calls allowed per rolling window.
    #[serde(default = "default_rate_limit_small")]
    pub rate_limit_small: u32,
    /// BIG-tier calls allowed per rolling window.
    #[serde(default = "default_rate_limit_big")]
    pub rate_limit_big: u32,
    /// Rolling rate-limit window in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Maximum in-flight calls across all tiers.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Per-call timeout in seconds. Kept below the supervisor's timeout
    /// floor so a hung call can never pin a slot for a whole job.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Queued tickets allowed per priority level before submissions bounce.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Failures within the 100-call outcome window that open the breaker.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: usize,
    /// Breaker cool-down before the HALF_OPEN probe, in seconds.
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

fn default_rate_limit_small() -> u32 {
    60
}
fn default_rate_limit_big() -> u32 {
    20
}
fn default_rate_window_secs() -> u64 {
    60
}
fn default_max_in_flight() -> usize {
    8
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_queue_capacity() -> usize {
    256
}
fn default_breaker_failure_threshold() -> usize {
    30
}
fn default_breaker_cooldown_secs() -> u64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_small: default_rate_limit_small(),
            rate_limit_big: default_rate_limit_big(),
            rate_window_secs: default_rate_window_secs(),
            max_in_flight: default_max_in_flight(),
            call_timeout_secs: default_call_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

impl DispatchConfig {
    /// Rate-limit ceiling for a tier within the rolling window.
    pub fn rate_limit(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::NoLlm => None,
            Tier::Small => Some(self.rate_limit_small),
            Tier::Big => Some(self.rate_limit_big),
        }
    }
}

/// Quality-gate profile selection.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// One of "strict", "balanced", "permissive".
    #[serde(default = "default_profile")]
    pub profile: String,
}

fn default_profile() -> String {
    "balanced".to_string()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
        }
    }
}

/// Supervisor deadline and step-cap bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds of deadline granted per segment.
    #[serde(default = "default_per_segment_secs")]
    pub per_segment_secs: u64,
    /// Minimum job deadline in seconds.
    #[serde(default = "default_timeout_floor_secs")]
    pub timeout_floor_secs: u64,
    /// Maximum job deadline in seconds.
    #[serde(default = "default_timeout_ceiling_secs")]
    pub timeout_ceiling_secs: u64,
    /// Hard cap on FSM transitions per job.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_per_segment_secs() -> u64 {
    20
}
fn default_timeout_floor_secs() -> u64 {
    60
}
fn default_timeout_ceiling_secs() -> u64 {
    900
}
fn default_max_steps() -> u32 {
    32
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            per_segment_secs: default_per_segment_secs(),
            timeout_floor_secs: default_timeout_floor_secs(),
            timeout_ceiling_secs: default_timeout_ceiling_secs(),
            max_steps: default_max_steps(),
        }
    }
}

impl GleanerConfig {
    /// Loads configuration from `gleaner.toml` in the current directory,
    /// falling back to defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("gleaner.toml"))
    }

    /// Loads configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<GleanerConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment variable takes precedence over the file for the API key.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would make the core misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.timeout_floor_secs > self.supervisor.timeout_ceiling_secs {
            bail!("supervisor.timeout_floor_secs exceeds timeout_ceiling_secs");
        }
        if self.dispatch.call_timeout_secs >= self.supervisor.timeout_floor_secs {
            bail!("dispatch.call_timeout_secs must be below supervisor.timeout_floor_secs");
        }
        if self.dispatch.max_in_flight == 0 {
            bail!("dispatch.max_in_flight must be at least 1");
        }
        if self.dispatch.breaker_failure_threshold == 0
            || self.dispatch.breaker_failure_threshold > 100
        {
            bail!("dispatch.breaker_failure_threshold must be within 1..=100");
        }
        if !matches!(self.gate.profile.as_str(), "strict" | "balanced" | "permissive") {
            bail!("gate.profile must be one of: strict, balanced, permissive");
        }
        if self.supervisor.max_steps == 0 {
            bail!("supervisor.max_steps must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = GleanerConfig::default();
        assert_eq!(config.budget.doc_cap_big, 8);
        assert_eq!(config.budget.doc_cap_small, 40);
        assert_eq!(config.dispatch.rate_window_secs, 60);
        assert_eq!(config.dispatch.breaker_failure_threshold, 30);
        assert_eq!(config.dispatch.breaker_cooldown_secs, 60);
        assert_eq!(config.gate.profile, "balanced");
        assert_eq!(config.supervisor.max_steps, 32);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"

            [budget]
            doc_cap_big = 4

            [gate]
            profile = "strict"
        "#;
        let config: GleanerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.budget.doc_cap_big, 4);
        assert_eq!(config.budget.doc_cap_small, 40);
        assert_eq!(config.gate.profile, "strict");
        assert_eq!(config.dispatch.max_in_flight, 8);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gleaner.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[supervisor]\nmax_steps = 16").unwrap();

        let config = GleanerConfig::load_from(&path).unwrap();
        assert_eq!(config.supervisor.max_steps, 16);
        assert_eq!(config.supervisor.timeout_floor_secs, 60);
    }

    #[test]
    fn validate_rejects_inverted_timeout_bounds() {
        let mut config = GleanerConfig::default();
        config.supervisor.timeout_floor_secs = 1000;
        config.supervisor.timeout_ceiling_secs = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_call_timeout_above_floor() {
        let mut config = GleanerConfig::default();
        config.dispatch.call_timeout_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_profile() {
        let mut config = GleanerConfig::default();
        config.gate.profile = "lenient".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tier_lookups_skip_free_tier() {
        let config = GleanerConfig::default();
        assert_eq!(config.budget.doc_cap(Tier::NoLlm), None);
        assert_eq!(config.budget.doc_cap(Tier::Big), Some(8));
        assert_eq!(config.dispatch.rate_limit(Tier::NoLlm), None);
        assert_eq!(config.dispatch.rate_limit(Tier::Small), Some(60));
    }
}
