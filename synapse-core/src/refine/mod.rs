//! The refinement loop engine (spec §4.4): wraps a single `Executor`
//! attempt in adapt→iterate→terminate→persist, producing a replayable
//! `ProcessTrace`.

mod audit;
pub mod types;

pub use types::{
    Auditor, DimensionScore, ExecutionOutcome, Executor, Feedback, IterationRecord, Outcome,
    ProcessTrace, RuntimeConfig, SelfAudit, TaskSpec,
};

use crate::config::RefinementConfig;
use crate::error::Result;
use crate::memory::{MemorySubstrate, MemoryType, RememberOptions, SearchFilters};
use std::sync::Arc;
use tracing::{info, warn};

const SIMILAR_TRACE_LOOKBACK: usize = 5;

pub struct RefinementEngine {
    config: RefinementConfig,
    memory: Arc<MemorySubstrate>,
}

impl RefinementEngine {
    pub fn new(config: RefinementConfig, memory: Arc<MemorySubstrate>) -> Self {
        Self { config, memory }
    }

    /// Run one task to completion (spec §4.4's per-task algorithm).
    pub async fn run(
        &self,
        task_id: impl Into<String>,
        task: TaskSpec,
        executor: Arc<dyn Executor>,
        auditor: Arc<dyn Auditor>,
    ) -> Result<ProcessTrace> {
        let task_id = task_id.into();
        let max_iterations = task.max_iterations.max(1);

        let mut runtime = self.adapt(&task).await?;
        let mut iterations = Vec::new();
        let mut outcome = Outcome::Partial;
        let mut outcome_iteration = 0u32;
        let mut best_score = f64::NEG_INFINITY;

        for iteration in 1..=max_iterations {
            let (record, terminal) = self
                .run_iteration(&task, &mut runtime, executor.as_ref(), auditor.as_ref(), iteration)
                .await;

            let mean = record.self_audit.mean();
            if mean > best_score {
                best_score = mean;
                outcome_iteration = iteration;
            }

            iterations.push(record);

            match terminal {
                Some(Outcome::Success) => {
                    outcome = Outcome::Success;
                    outcome_iteration = iteration;
                    break;
                }
                Some(Outcome::AbortedSafety) => {
                    outcome = Outcome::AbortedSafety;
                    outcome_iteration = iteration;
                    break;
                }
                Some(Outcome::Partial) | None => {
                    outcome = Outcome::Partial;
                }
            }
        }

        let learnings = extract_learnings(&iterations, outcome);
        let trace = ProcessTrace {
            task_id,
            iterations,
            outcome,
            learnings,
            outcome_iteration,
        };

        self.persist(&trace).await?;
        Ok(trace)
    }

    /// Step 1: query memory for similar past traces and derive a starting
    /// `RuntimeConfig`. Absent any history, the defaults apply.
    async fn adapt(&self, task: &TaskSpec) -> Result<RuntimeConfig> {
        let similar = self
            .memory
            .search(SearchFilters {
                memory_type: Some(MemoryType::RefinementTrace),
                text_query: Some(task.goal.clone()),
                limit: SIMILAR_TRACE_LOOKBACK,
                ..Default::default()
            })
            .await?;

        if similar.is_empty() {
            return Ok(RuntimeConfig {
                prefer_in_process_actions: true,
                ..Default::default()
            });
        }

        let successes = similar
            .iter()
            .filter(|r| r.content.get("outcome").and_then(|v| v.as_str()) == Some("success"))
            .count();
        info!(
            goal = %task.goal,
            similar = similar.len(),
            successes,
            "adapted runtime config from past traces"
        );

        Ok(RuntimeConfig {
            prefer_in_process_actions: true,
            resource_budget: Some(1.0),
            ..Default::default()
        })
    }

    /// Steps 2a-2f for one iteration. Returns the recorded iteration plus
    /// `Some(outcome)` if the loop should terminate here.
    async fn run_iteration(
        &self,
        task: &TaskSpec,
        runtime: &mut RuntimeConfig,
        executor: &dyn Executor,
        auditor: &dyn Auditor,
        iteration: u32,
    ) -> (IterationRecord, Option<Outcome>) {
        let action = serde_json::json!({ "iteration": iteration, "runtime": runtime });

        let outcome = match executor.attempt(task, runtime, iteration).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(iteration, error = %e, "executor attempt failed");
                let self_audit = SelfAudit {
                    correctness: DimensionScore::justified(0.0, "executor raised an error"),
                    efficiency: DimensionScore::unjustified(),
                    safety: DimensionScore::unjustified(),
                    evidence_alignment: DimensionScore::unjustified(),
                    artifact_quality: DimensionScore::unjustified(),
                };
                let record = IterationRecord {
                    number: iteration,
                    action,
                    observation: serde_json::json!(null),
                    self_audit,
                    feedback: Vec::new(),
                    error: Some(e.to_string()),
                };
                return (record, None);
            }
        };

        let observation = serde_json::json!({ "output": outcome.output, "steps": outcome.steps });

        let self_audit = match auditor.audit(task, &outcome).await {
            Ok(audit) => audit,
            Err(e) => {
                warn!(iteration, error = %e, "auditor failed, treating as unjustified");
                SelfAudit {
                    correctness: DimensionScore::unjustified(),
                    efficiency: DimensionScore::unjustified(),
                    safety: DimensionScore::unjustified(),
                    evidence_alignment: DimensionScore::unjustified(),
                    artifact_quality: DimensionScore::unjustified(),
                }
            }
        };

        if audit::safety_failed(&self_audit, &self.config) {
            let record = IterationRecord {
                number: iteration,
                action,
                observation,
                self_audit,
                feedback: Vec::new(),
                error: Some("safety dimension failed its hard gate".to_string()),
            };
            return (record, Some(Outcome::AbortedSafety));
        }

        if audit::meets_thresholds(&self_audit, &self.config) {
            let record = IterationRecord {
                number: iteration,
                action,
                observation,
                self_audit,
                feedback: Vec::new(),
                error: None,
            };
            return (record, Some(Outcome::Success));
        }

        let feedback = audit::extract_feedback(&self_audit, &self.config);
        runtime.carried_feedback = feedback.clone();

        let record = IterationRecord {
            number: iteration,
            action,
            observation,
            self_audit,
            feedback,
            error: None,
        };
        (record, None)
    }

    /// Step 4: persist the trace, and on a multi-iteration success, extract
    /// a candidate procedural pattern.
    async fn persist(&self, trace: &ProcessTrace) -> Result<()> {
        let importance = if trace.outcome == Outcome::Success {
            0.8
        } else {
            0.6
        };
        let outcome_label = match trace.outcome {
            Outcome::Success => "success",
            Outcome::Partial => "partial",
            Outcome::AbortedSafety => "aborted_safety",
        };

        self.memory
            .create(
                serde_json::json!({
                    "task_id": trace.task_id,
                    "outcome": outcome_label,
                    "iterations": trace.iterations,
                    "learnings": trace.learnings,
                    "outcome_iteration": trace.outcome_iteration,
                }),
                MemoryType::RefinementTrace,
                RememberOptions {
                    importance: Some(importance),
                    tags: vec![format!("task:{}", trace.task_id)],
                    ..Default::default()
                },
            )
            .await?;

        if trace.outcome == Outcome::Success && trace.iterations.len() > 1 {
            self.promote_procedural_pattern(trace).await?;
        }

        Ok(())
    }

    /// Validate the successful refinement against similar past traces before
    /// promoting it as a reusable procedural pattern (spec §4.4 step 4).
    async fn promote_procedural_pattern(&self, trace: &ProcessTrace) -> Result<()> {
        let similar = self
            .memory
            .search(SearchFilters {
                memory_type: Some(MemoryType::Procedural),
                text_query: Some(trace.task_id.clone()),
                limit: SIMILAR_TRACE_LOOKBACK,
                ..Default::default()
            })
            .await?;

        let Some(final_iteration) = trace.iterations.last() else {
            return Ok(());
        };
        let pattern = serde_json::json!({
            "task_id": trace.task_id,
            "action": final_iteration.action,
            "feedback_chain": trace.iterations.iter().flat_map(|it| it.feedback.clone()).collect::<Vec<_>>(),
        });

        let is_duplicate = similar
            .iter()
            .any(|r| r.content.get("action") == pattern.get("action"));
        if is_duplicate {
            info!(task_id = %trace.task_id, "procedural pattern already known, skipping promotion");
            return Ok(());
        }

        self.memory
            .create(
                pattern,
                MemoryType::Procedural,
                RememberOptions {
                    importance: Some(0.7),
                    tags: vec!["procedural-pattern".into()],
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

fn extract_learnings(iterations: &[IterationRecord], outcome: Outcome) -> Vec<String> {
    let mut learnings: Vec<String> = iterations
        .iter()
        .flat_map(|it| it.feedback.iter().map(|f| f.what_failed.clone()))
        .collect();
    if outcome == Outcome::AbortedSafety {
        learnings.push("safety dimension failed; loop aborted before exhausting iterations".into());
    }
    learnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedExecutor;

    #[async_trait]
    impl Executor for FixedExecutor {
        async fn attempt(
            &self,
            _task: &TaskSpec,
            _runtime: &RuntimeConfig,
            _iteration: u32,
        ) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome {
                output: serde_json::json!("result"),
                steps: vec!["did the thing".into()],
            })
        }
    }

    struct ImprovingAuditor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Auditor for ImprovingAuditor {
        async fn audit(&self, _task: &TaskSpec, _outcome: &ExecutionOutcome) -> Result<SelfAudit> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let score = if call == 0 { 0.3 } else { 0.9 };
            Ok(SelfAudit {
                correctness: DimensionScore::justified(score, "evaluated"),
                efficiency: DimensionScore::justified(0.9, "fast"),
                safety: DimensionScore::justified(1.0, "no issues"),
                evidence_alignment: DimensionScore::justified(0.9, "matches steps"),
                artifact_quality: DimensionScore::justified(0.9, "clean"),
            })
        }
    }

    struct AlwaysUnsafeAuditor;

    #[async_trait]
    impl Auditor for AlwaysUnsafeAuditor {
        async fn audit(&self, _task: &TaskSpec, _outcome: &ExecutionOutcome) -> Result<SelfAudit> {
            Ok(SelfAudit {
                correctness: DimensionScore::justified(0.9, "fine"),
                efficiency: DimensionScore::justified(0.9, "fine"),
                safety: DimensionScore::justified(0.0, "violates a constraint"),
                evidence_alignment: DimensionScore::justified(0.9, "fine"),
                artifact_quality: DimensionScore::justified(0.9, "fine"),
            })
        }
    }

    struct NeverGoodEnoughAuditor;

    #[async_trait]
    impl Auditor for NeverGoodEnoughAuditor {
        async fn audit(&self, _task: &TaskSpec, _outcome: &ExecutionOutcome) -> Result<SelfAudit> {
            Ok(SelfAudit {
                correctness: DimensionScore::justified(0.3, "still missing a case"),
                efficiency: DimensionScore::justified(0.9, "fine"),
                safety: DimensionScore::justified(1.0, "fine"),
                evidence_alignment: DimensionScore::justified(0.9, "fine"),
                artifact_quality: DimensionScore::justified(0.9, "fine"),
            })
        }
    }

    async fn engine() -> RefinementEngine {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MemoryConfig::default();
        config.cold_root = dir.path().to_path_buf();
        std::mem::forget(dir);
        let memory = Arc::new(MemorySubstrate::new(config).await.unwrap());
        RefinementEngine::new(RefinementConfig::default(), memory)
    }

    #[tokio::test]
    async fn improving_audit_succeeds_on_second_iteration() {
        let engine = engine().await;
        let task = TaskSpec {
            goal: "do the thing".into(),
            max_iterations: 3,
            ..Default::default()
        };
        let auditor = Arc::new(ImprovingAuditor {
            calls: AtomicU32::new(0),
        });
        let trace = engine
            .run("t1", task, Arc::new(FixedExecutor), auditor)
            .await
            .unwrap();
        assert_eq!(trace.outcome, Outcome::Success);
        assert_eq!(trace.outcome_iteration, 2);
        assert_eq!(trace.iterations.len(), 2);
        assert!(!trace.iterations[0].feedback.is_empty());
    }

    #[tokio::test]
    async fn safety_failure_aborts_immediately() {
        let engine = engine().await;
        let task = TaskSpec {
            goal: "do an unsafe thing".into(),
            max_iterations: 3,
            ..Default::default()
        };
        let trace = engine
            .run("t2", task, Arc::new(FixedExecutor), Arc::new(AlwaysUnsafeAuditor))
            .await
            .unwrap();
        assert_eq!(trace.outcome, Outcome::AbortedSafety);
        assert_eq!(trace.iterations.len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_partial_with_best_iteration() {
        let engine = engine().await;
        let task = TaskSpec {
            goal: "never quite right".into(),
            max_iterations: 2,
            ..Default::default()
        };
        let trace = engine
            .run("t3", task, Arc::new(FixedExecutor), Arc::new(NeverGoodEnoughAuditor))
            .await
            .unwrap();
        assert_eq!(trace.outcome, Outcome::Partial);
        assert_eq!(trace.iterations.len(), 2);
    }
}
