//! Entities for the multi-expert engine (spec §3.1, §4.3): the task handed
//! to every expert, each expert's behavior profile, its raw attempt, and the
//! consensus recorded once voting completes.

use super::archetype::Archetype;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Behavior profile of one expert, immutable for the duration of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertConfig {
    pub id: String,
    pub archetype: Archetype,
    pub temperature: f64,
    pub max_iterations: u32,
    pub satisfaction_threshold: f64,
    pub prompt_prefix: String,
}

impl ExpertConfig {
    /// Build a config from an archetype's preset, overriding only the id.
    pub fn from_archetype(id: impl Into<String>, archetype: Archetype) -> Self {
        let preset = archetype.preset();
        Self {
            id: id.into(),
            archetype,
            temperature: preset.temperature,
            max_iterations: 3,
            satisfaction_threshold: 0.7,
            prompt_prefix: preset.prompt_prefix.to_string(),
        }
    }
}

/// A task handed identically to every expert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertTask {
    pub id: String,
    pub description: String,
    pub task_type: String,
    pub input: Value,
}

/// The raw attempt an `Executor` produces for one expert, before diversity
/// classing and voting. Distinct from [`ExpertResult`], which also carries
/// the effective (post-penalty) score once computed.
#[derive(Debug, Clone)]
pub struct RawExpertOutput {
    pub output: Value,
    pub score: f64,
    pub confidence: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub embedding: Option<Vec<f32>>,
    pub iterations: u32,
}

/// Abstract executor: `(task, config) -> result` (spec §9). Implementations
/// call out to an LLM backend through the rate limiter; the engine never
/// calls a backend directly. Executor failures must surface as `Err` here —
/// the engine converts them into a zero-score `ExpertResult`, never an
/// exception that escapes the vote.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, task: &ExpertTask, config: &ExpertConfig) -> Result<RawExpertOutput>;
}

/// One expert's attempt, as recorded for voting and the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertResult {
    pub expert_id: String,
    pub output: Value,
    pub score: f64,
    pub confidence: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
    pub iterations: u32,
}

/// A non-winning class's representative, preserved rather than discarded
/// (spec §4.3 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservedConflict {
    pub representative_expert_id: String,
    pub output: Value,
    pub score: f64,
    pub explanation: String,
}

/// One recorded vote, for the `ConsensusRecord::votes` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub expert_id: String,
    pub class_id: usize,
    pub weight: f64,
}

/// Voting strategy (spec §4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    Majority,
    Weighted,
    Ranked,
    Borda,
}

/// The persistent remnant of a vote, stored as an `expert_consensus` memory
/// record (spec §3.1's `ConsensusRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub task_type: String,
    pub votes: Vec<Vote>,
    pub decision: Value,
    pub agreement_level: f64,
    pub diversity_score: f64,
    pub preserved_conflicts: Vec<PreservedConflict>,
}

/// Full result of one multi-expert run (spec §4.3's execution contract
/// output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub consensus: Value,
    pub experts: Vec<ExpertResult>,
    pub diversity_score: f64,
    pub agreement_level: f64,
    pub preserved_conflicts: Vec<PreservedConflict>,
    /// Set when fewer than two experts returned usable output (spec §4.3's
    /// degraded-quorum fallback): `consensus` is then the best single
    /// output, not a genuine vote.
    pub degraded: bool,
}
