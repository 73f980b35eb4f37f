//! Layered configuration: a `synapse.toml` file overridden by
//! `SYNAPSE_`-prefixed environment variables, following the same figment
//! layering the coordinator and every engine share.

use crate::error::{Result, SynapseError};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration object. Loaded once at process start and threaded
/// down as an explicit dependency rather than read from globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseConfig {
    pub mailbox: MailboxConfig,
    pub coordinator: CoordinatorConfig,
    pub memory: MemoryConfig,
    pub ratelimit: RateLimiterConfig,
    pub experts: ExpertsConfig,
    pub refinement: RefinementConfig,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            mailbox: MailboxConfig::default(),
            coordinator: CoordinatorConfig::default(),
            memory: MemoryConfig::default(),
            ratelimit: RateLimiterConfig::default(),
            experts: ExpertsConfig::default(),
            refinement: RefinementConfig::default(),
        }
    }
}

impl SynapseConfig {
    /// Load `synapse.toml` from the current directory, merged with
    /// `SYNAPSE_`-prefixed env var overrides (`SYNAPSE_COORDINATOR_MAXCONCURRENT=10`
    /// style, split on `_`), and an optional second file named by
    /// `SYNAPSE_CONFIG_PATH`.
    pub fn load() -> Result<Self> {
        Self::from_file("synapse.toml")
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            SynapseConfig::default(),
        ));

        if path.exists() {
            figment = figment.merge(Toml::file(&path));
        }

        if let Ok(extra) = std::env::var("SYNAPSE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(extra));
        }

        figment = figment.merge(Env::prefixed("SYNAPSE_").split("_"));

        let config: SynapseConfig = figment
            .extract()
            .map_err(|e| SynapseError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.coordinator.max_concurrent == 0 {
            return Err(SynapseError::Configuration(
                "coordinator.max_concurrent must be >= 1".into(),
            ));
        }
        if self.memory.importance_weights.sum() < 0.999
            || self.memory.importance_weights.sum() > 1.001
        {
            return Err(SynapseError::Configuration(
                "memory.importance_weights must sum to 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// File-mailbox layout and polling cadence (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub root: PathBuf,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub context_inline_threshold_chars: usize,
    pub max_depth: u32,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./mailbox"),
            poll_interval: Duration::from_millis(500),
            context_inline_threshold_chars: 500,
            max_depth: 2,
        }
    }
}

/// Process supervision and progressive-timeout parameters (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub max_concurrent: usize,
    #[serde(with = "humantime_serde")]
    pub health_check_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub silence_warning_threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub silence_kill_threshold: Duration,
    pub timeout_tiers: TimeoutTiers,
    #[serde(with = "humantime_serde")]
    pub timeout_extension: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout_cap: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    pub log_retention_days: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            health_check_timeout: Duration::from_secs(8),
            heartbeat_interval: Duration::from_secs(15),
            silence_warning_threshold: Duration::from_secs(45),
            silence_kill_threshold: Duration::from_secs(90),
            timeout_tiers: TimeoutTiers::default(),
            timeout_extension: Duration::from_secs(60),
            timeout_cap: Duration::from_secs(240),
            shutdown_grace: Duration::from_secs(5),
            log_retention_days: 7,
        }
    }
}

/// Complexity-derived initial timeout budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutTiers {
    #[serde(with = "humantime_serde")]
    pub small: Duration,
    #[serde(with = "humantime_serde")]
    pub medium: Duration,
    #[serde(with = "humantime_serde")]
    pub large: Duration,
}

impl Default for TimeoutTiers {
    fn default() -> Self {
        Self {
            small: Duration::from_secs(30),
            medium: Duration::from_secs(120),
            large: Duration::from_secs(180),
        }
    }
}

/// Importance-score component weights (spec §4.1); must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportanceWeights {
    pub recency: f64,
    pub frequency: f64,
    pub salience: f64,
    pub relevance: f64,
}

impl ImportanceWeights {
    pub fn sum(&self) -> f64 {
        self.recency + self.frequency + self.salience + self.relevance
    }
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            recency: 0.25,
            frequency: 0.20,
            salience: 0.35,
            relevance: 0.20,
        }
    }
}

/// Retrieval-ranking weights (open question #1 in DESIGN.md).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalWeights {
    pub semantic: f64,
    pub importance: f64,
    pub recency: f64,
    pub frequency: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            semantic: 0.40,
            importance: 0.25,
            recency: 0.20,
            frequency: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub importance_weights: ImportanceWeights,
    pub retrieval_weights: RetrievalWeights,
    pub decay_lambda: f64,
    pub archive_threshold: f64,
    pub compress_threshold: f64,
    pub delete_threshold: f64,
    #[serde(with = "humantime_serde")]
    pub delete_grace_period: Duration,
    pub never_forget_importance: f64,
    pub never_forget_access_count: u64,
    pub consolidation_similarity_threshold: f64,
    #[serde(with = "humantime_serde")]
    pub warm_ttl: Duration,
    pub hot_capacity: usize,
    pub cold_root: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            importance_weights: ImportanceWeights::default(),
            retrieval_weights: RetrievalWeights::default(),
            decay_lambda: 0.05,
            archive_threshold: 0.30,
            compress_threshold: 0.15,
            delete_threshold: 0.05,
            delete_grace_period: Duration::from_secs(86_400),
            never_forget_importance: 0.9,
            never_forget_access_count: 50,
            consolidation_similarity_threshold: 0.7,
            warm_ttl: Duration::from_secs(7 * 86_400),
            hot_capacity: 1024,
            cold_root: PathBuf::from("./memory/cold"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub default_capacity: u64,
    pub default_refill_per_sec: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_success_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub circuit_reset_timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_capacity: 60,
            default_refill_per_sec: 1,
            circuit_failure_threshold: 5,
            circuit_success_threshold: 2,
            circuit_reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertsConfig {
    pub duplicate_distance_threshold: f64,
    pub duplicate_penalty: f64,
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

impl Default for ExpertsConfig {
    fn default() -> Self {
        Self {
            duplicate_distance_threshold: 0.15,
            duplicate_penalty: 0.3,
            deadline: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    pub max_iterations: u32,
    pub threshold_correctness: f64,
    pub threshold_efficiency: f64,
    pub threshold_safety: f64,
    pub threshold_evidence_alignment: f64,
    pub threshold_artifact_quality: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            threshold_correctness: 0.8,
            threshold_efficiency: 0.6,
            threshold_safety: 1.0,
            threshold_evidence_alignment: 0.7,
            threshold_artifact_quality: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = SynapseConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn importance_weights_sum_to_one() {
        assert!((ImportanceWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cfg = SynapseConfig::from_file(path).unwrap();
        assert_eq!(cfg.coordinator.max_concurrent, 5);
    }
}
