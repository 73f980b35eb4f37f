//! Entities for the refinement loop engine (spec §3.1, §4.4): the task
//! handed to one run, the runtime state that survives across iterations,
//! the five-dimension self-audit, and the append-only trace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// What the caller wants accomplished, and the bound on how hard to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub goal: String,
    pub success_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub max_iterations: u32,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            goal: String::new(),
            success_criteria: Vec::new(),
            constraints: Vec::new(),
            max_iterations: 3,
        }
    }
}

/// Derived at adapt time (step 1) from similar past traces, then amended by
/// each iteration's refine step (step 2e).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub strategy: Option<String>,
    pub prefer_in_process_actions: bool,
    pub resource_budget: Option<f64>,
    pub carried_feedback: Vec<Feedback>,
}

/// One self-audit dimension's score in [0,1]. A score without a
/// justification is clamped to 0.5 and flagged (spec §4.4 step 2b).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub justification: Option<String>,
    pub clamped: bool,
}

impl DimensionScore {
    pub fn justified(score: f64, justification: impl Into<String>) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            justification: Some(justification.into()),
            clamped: false,
        }
    }

    /// An unjustified claim is clamped to 0.5 regardless of the score the
    /// caller tried to assert.
    pub fn unjustified() -> Self {
        Self {
            score: 0.5,
            justification: None,
            clamped: true,
        }
    }
}

/// The five self-audit dimensions (spec §4.4 step 2b); `safety` is a hard
/// gate, the other four are soft thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfAudit {
    pub correctness: DimensionScore,
    pub efficiency: DimensionScore,
    pub safety: DimensionScore,
    pub evidence_alignment: DimensionScore,
    pub artifact_quality: DimensionScore,
}

impl SelfAudit {
    /// Average of the five dimension scores, used to rank iterations when a
    /// run exhausts without success.
    pub fn mean(&self) -> f64 {
        (self.correctness.score
            + self.efficiency.score
            + self.safety.score
            + self.evidence_alignment.score
            + self.artifact_quality.score)
            / 5.0
    }
}

/// A structured critique of one failed dimension (spec §4.4 step 2d).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub dimension: String,
    pub what_failed: String,
    pub suggestion: String,
    pub step_reference: Option<String>,
}

/// Raw output of one attempt, before self-audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub output: Value,
    /// Discrete steps the supervisor observed, for the trace and for the
    /// auditor's evidence-alignment dimension.
    pub steps: Vec<String>,
}

/// One executed, audited, possibly-refined pass (spec §4.4's per-iteration
/// state machine `planning→executing→supervising→auditing→{refining|
/// succeeding|exhausting}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub number: u32,
    pub action: Value,
    pub observation: Value,
    pub self_audit: SelfAudit,
    pub feedback: Vec<Feedback>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Partial,
    AbortedSafety,
}

/// Step-by-step record of one refinement execution (spec §3.1). Append-only
/// during the run; iterations are numbered monotonically from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTrace {
    pub task_id: String,
    pub iterations: Vec<IterationRecord>,
    pub outcome: Outcome,
    pub learnings: Vec<String>,
    /// Which iteration's output the run returns as its result: the final
    /// iteration on success, the best-scoring one on exhaustion.
    pub outcome_iteration: u32,
}

/// Runs one attempt under supervision (spec §4.4 step 2a). Exceptions must
/// surface as `Err`; the engine converts them into a failed iteration with
/// `correctness = 0` rather than letting them propagate (spec §4.4 failure
/// semantics).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn attempt(
        &self,
        task: &TaskSpec,
        runtime: &RuntimeConfig,
        iteration: u32,
    ) -> Result<ExecutionOutcome>;
}

/// Scores one attempt across the five dimensions (spec §4.4 step 2b). A
/// single expert or the multi-expert engine (treated as one virtual expert,
/// spec §4.4's inputs) can equally serve as the `Executor`; the `Auditor` is
/// a separate seam so the judge can be swapped independently (e.g. for an
/// LLM-as-judge backend vs. a deterministic test double).
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, task: &TaskSpec, outcome: &ExecutionOutcome) -> Result<SelfAudit>;
}
