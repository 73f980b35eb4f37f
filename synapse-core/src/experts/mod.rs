//! Multi-expert parallel execution (spec §4.3): run N diverse experts
//! concurrently through the rate limiter, fold near-duplicate outputs into
//! equivalence classes, apply the soft-scoring penalty, vote, and persist a
//! `ConsensusRecord` while preserving the losing classes' representatives.

mod archetype;
mod diversity;
mod voting;
pub mod types;

pub use archetype::{Archetype, ArchetypePreset};
pub use types::{
    ConsensusOutcome, ConsensusRecord, Executor, ExpertConfig, ExpertResult, ExpertTask,
    PreservedConflict, RawExpertOutput, Vote, VotingStrategy,
};

use crate::config::ExpertsConfig;
use crate::error::{Result, SynapseError};
use crate::memory::{MemorySubstrate, MemoryType, RememberOptions};
use crate::ratelimit::RateLimiter;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

const BACKEND_ID: &str = "experts";

pub struct ExpertsEngine {
    rate_limiter: Arc<RateLimiter>,
    config: ExpertsConfig,
}

impl ExpertsEngine {
    pub fn new(rate_limiter: Arc<RateLimiter>, config: ExpertsConfig) -> Self {
        Self {
            rate_limiter,
            config,
        }
    }

    /// Run `configs.len()` experts on `task` and return the consensus
    /// (spec §4.3's execution contract). `memory`, when given, receives the
    /// resulting `ConsensusRecord` as an `expert_consensus` record.
    pub async fn run(
        &self,
        task: ExpertTask,
        configs: Vec<ExpertConfig>,
        executor: Arc<dyn Executor>,
        strategy: VotingStrategy,
        memory: Option<&MemorySubstrate>,
    ) -> Result<ConsensusOutcome> {
        if configs.is_empty() {
            return Err(SynapseError::MalformedRequest(
                "experts::run requires at least one ExpertConfig".into(),
            ));
        }
        let n = configs.len();

        // N=1 collapse (spec §9 open question #2): no voting dispatch at all.
        if n == 1 {
            let cfg = configs.into_iter().next().unwrap();
            let (result, embedding) = self.execute_one(&task, &cfg, &executor).await;
            let outcome = ConsensusOutcome {
                consensus: result.output.clone(),
                experts: vec![result],
                diversity_score: 0.0,
                agreement_level: 1.0,
                preserved_conflicts: Vec::new(),
                degraded: false,
            };
            let _ = embedding;
            self.persist(&task, &outcome, &[], memory).await?;
            return Ok(outcome);
        }

        let mut set: JoinSet<(usize, ExpertResult, Option<Vec<f32>>)> = JoinSet::new();
        for (idx, cfg) in configs.into_iter().enumerate() {
            let task = task.clone();
            let executor = executor.clone();
            let rate_limiter = self.rate_limiter.clone();
            let deadline = self.config.deadline;
            set.spawn(async move {
                let engine = ExpertsEngineCall { rate_limiter, deadline };
                let (result, embedding) = engine.execute_one(&task, &cfg, &executor).await;
                (idx, result, embedding)
            });
        }

        let mut slots: Vec<Option<(ExpertResult, Option<Vec<f32>>)>> = (0..n).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result, embedding)) => slots[idx] = Some((result, embedding)),
                Err(e) => warn!("expert task panicked: {e}"),
            }
        }

        let mut results = Vec::with_capacity(n);
        let mut embeddings = Vec::with_capacity(n);
        for (idx, slot) in slots.into_iter().enumerate() {
            let (result, embedding) = slot.unwrap_or_else(|| {
                (
                    ExpertResult {
                        expert_id: format!("expert-{idx}"),
                        output: serde_json::Value::Null,
                        score: 0.0,
                        confidence: 0.0,
                        tokens_in: 0,
                        tokens_out: 0,
                        latency_ms: 0,
                        iterations: 0,
                    },
                    None,
                )
            });
            results.push(result);
            embeddings.push(embedding);
        }

        let usable = results.iter().filter(|r| r.score > 0.0).count();
        if usable < 2 {
            return self.degraded(task, results, embeddings, memory).await;
        }

        let classification = diversity::classify(
            &results,
            &embeddings,
            self.config.duplicate_distance_threshold,
            self.config.duplicate_penalty,
        );
        let decision = voting::decide(
            strategy,
            &results,
            &classification.class_of,
            &classification.effective_scores,
        );

        let winning_indices: Vec<usize> = classification
            .class_of
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == decision.winning_class)
            .map(|(i, _)| i)
            .collect();
        let winner_idx = *winning_indices
            .iter()
            .max_by(|&&a, &&b| results[a].score.partial_cmp(&results[b].score).unwrap())
            .unwrap();

        let preserved_conflicts = preserved_conflicts_for(
            &results,
            &classification.class_of,
            &classification.effective_scores,
            decision.winning_class,
        );

        let outcome = ConsensusOutcome {
            consensus: results[winner_idx].output.clone(),
            experts: results,
            diversity_score: classification.diversity_score,
            agreement_level: decision.agreement_level,
            preserved_conflicts,
            degraded: false,
        };

        info!(
            agreement = outcome.agreement_level,
            diversity = outcome.diversity_score,
            "multi-expert consensus reached"
        );
        self.persist(&task, &outcome, &decision.votes, memory).await?;
        Ok(outcome)
    }

    async fn execute_one(
        &self,
        task: &ExpertTask,
        cfg: &ExpertConfig,
        executor: &Arc<dyn Executor>,
    ) -> (ExpertResult, Option<Vec<f32>>) {
        let call = ExpertsEngineCall {
            rate_limiter: self.rate_limiter.clone(),
            deadline: self.config.deadline,
        };
        call.execute_one(task, cfg, executor).await
    }

    async fn degraded(
        &self,
        task: ExpertTask,
        results: Vec<ExpertResult>,
        embeddings: Vec<Option<Vec<f32>>>,
        memory: Option<&MemorySubstrate>,
    ) -> Result<ConsensusOutcome> {
        let n = results.len().max(1);
        let best_idx = results
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0);

        let diversity_score = if results.len() < 2 {
            0.0
        } else {
            diversity::classify(&results, &embeddings, self.config.duplicate_distance_threshold, self.config.duplicate_penalty)
                .diversity_score
        };

        let preserved_conflicts: Vec<PreservedConflict> = results
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best_idx)
            .map(|(_, r)| PreservedConflict {
                representative_expert_id: r.expert_id.clone(),
                output: r.output.clone(),
                score: r.score,
                explanation: "insufficient quorum: fewer than two experts returned usable output"
                    .to_string(),
            })
            .collect();

        warn!(usable = results.iter().filter(|r| r.score > 0.0).count(), "degraded consensus: insufficient quorum");

        let outcome = ConsensusOutcome {
            consensus: results[best_idx].output.clone(),
            agreement_level: 1.0 / n as f64,
            diversity_score,
            experts: results,
            preserved_conflicts,
            degraded: true,
        };
        self.persist(&task, &outcome, &[], memory).await?;
        Ok(outcome)
    }

    async fn persist(
        &self,
        task: &ExpertTask,
        outcome: &ConsensusOutcome,
        votes: &[Vote],
        memory: Option<&MemorySubstrate>,
    ) -> Result<()> {
        let Some(memory) = memory else {
            return Ok(());
        };
        let record = ConsensusRecord {
            task_type: task.task_type.clone(),
            votes: votes.to_vec(),
            decision: outcome.consensus.clone(),
            agreement_level: outcome.agreement_level,
            diversity_score: outcome.diversity_score,
            preserved_conflicts: outcome.preserved_conflicts.clone(),
        };
        memory
            .create(
                serde_json::to_value(&record)?,
                MemoryType::ExpertConsensus,
                RememberOptions {
                    importance: Some(outcome.agreement_level.clamp(0.0, 1.0)),
                    tags: vec![task.task_type.clone()],
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

/// Owns just enough to run one expert call through the rate limiter;
/// split out of `ExpertsEngine` so a `JoinSet`-spawned task can own its own
/// copy without borrowing `self` across an `.await`.
struct ExpertsEngineCall {
    rate_limiter: Arc<RateLimiter>,
    deadline: std::time::Duration,
}

impl ExpertsEngineCall {
    async fn execute_one(
        &self,
        task: &ExpertTask,
        cfg: &ExpertConfig,
        executor: &Arc<dyn Executor>,
    ) -> (ExpertResult, Option<Vec<f32>>) {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.deadline, async {
            let permit = self
                .rate_limiter
                .acquire(BACKEND_ID, 1, 0, self.deadline)
                .await?;
            let raw = executor.run(task, cfg).await;
            self.rate_limiter.release(permit, raw.is_ok());
            raw
        })
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(raw)) => (
                ExpertResult {
                    expert_id: cfg.id.clone(),
                    output: raw.output,
                    score: raw.score,
                    confidence: raw.confidence,
                    tokens_in: raw.tokens_in,
                    tokens_out: raw.tokens_out,
                    latency_ms,
                    iterations: raw.iterations,
                },
                raw.embedding,
            ),
            // Executor failures produce a zero-score result, never an
            // exception that escapes the vote (spec §4.3 step 1).
            Ok(Err(e)) => {
                warn!(expert = %cfg.id, error = %e, "expert executor failed");
                (zero_result(&cfg.id), None)
            }
            Err(_) => {
                warn!(expert = %cfg.id, "expert hit its deadline and was treated as a zero-score slot");
                (zero_result(&cfg.id), None)
            }
        }
    }
}

fn zero_result(expert_id: &str) -> ExpertResult {
    ExpertResult {
        expert_id: expert_id.to_string(),
        output: serde_json::Value::Null,
        score: 0.0,
        confidence: 0.0,
        tokens_in: 0,
        tokens_out: 0,
        latency_ms: 0,
        iterations: 0,
    }
}

fn preserved_conflicts_for(
    results: &[ExpertResult],
    class_of: &[usize],
    effective_scores: &[f64],
    winning_class: usize,
) -> Vec<PreservedConflict> {
    let num_classes = class_of.iter().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut best_in_class: Vec<Option<usize>> = vec![None; num_classes];
    for (i, &c) in class_of.iter().enumerate() {
        best_in_class[c] = Some(match best_in_class[c] {
            None => i,
            Some(cur) if effective_scores[i] > effective_scores[cur] => i,
            Some(cur) => cur,
        });
    }

    best_in_class
        .into_iter()
        .enumerate()
        .filter(|(c, _)| *c != winning_class)
        .filter_map(|(_, idx)| idx)
        .map(|idx| PreservedConflict {
            representative_expert_id: results[idx].expert_id.clone(),
            output: results[idx].output.clone(),
            score: results[idx].score,
            explanation: format!(
                "non-winning equivalence class; effective score {:.2} vs. winner's class",
                effective_scores[idx]
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct CannedExecutor {
        outputs: std::collections::HashMap<String, RawExpertOutput>,
    }

    #[async_trait]
    impl Executor for CannedExecutor {
        async fn run(&self, _task: &ExpertTask, cfg: &ExpertConfig) -> Result<RawExpertOutput> {
            self.outputs
                .get(&cfg.id)
                .cloned()
                .ok_or_else(|| SynapseError::Other("no canned output".into()))
        }
    }

    fn task() -> ExpertTask {
        ExpertTask {
            id: "t1".into(),
            description: "do it".into(),
            task_type: "implement".into(),
            input: json!({}),
        }
    }

    fn raw(score: f64, output: serde_json::Value) -> RawExpertOutput {
        RawExpertOutput {
            output,
            score,
            confidence: 0.8,
            tokens_in: 10,
            tokens_out: 10,
            embedding: None,
            iterations: 1,
        }
    }

    #[tokio::test]
    async fn single_expert_collapses_to_its_own_result() {
        let engine = ExpertsEngine::new(
            Arc::new(RateLimiter::new(crate::config::RateLimiterConfig::default())),
            ExpertsConfig::default(),
        );
        let cfg = ExpertConfig::from_archetype("solo", Archetype::Balanced);
        let mut outputs = std::collections::HashMap::new();
        outputs.insert("solo".to_string(), raw(90.0, json!("the answer")));
        let executor = Arc::new(CannedExecutor { outputs });

        let outcome = engine
            .run(task(), vec![cfg], executor, VotingStrategy::Majority, None)
            .await
            .unwrap();

        assert_eq!(outcome.agreement_level, 1.0);
        assert_eq!(outcome.diversity_score, 0.0);
        assert!(!outcome.degraded);
        assert_eq!(outcome.consensus, json!("the answer"));
    }

    #[tokio::test]
    async fn failing_executor_never_wins_against_a_succeeding_one() {
        let engine = ExpertsEngine::new(
            Arc::new(RateLimiter::new(crate::config::RateLimiterConfig::default())),
            ExpertsConfig::default(),
        );
        let configs = vec![
            ExpertConfig::from_archetype("good", Archetype::Balanced),
            ExpertConfig::from_archetype("bad", Archetype::Performance),
        ];
        let mut outputs = std::collections::HashMap::new();
        outputs.insert("good".to_string(), raw(70.0, json!("a real answer")));
        // "bad" has no canned output, so the executor returns Err for it.
        let executor = Arc::new(CannedExecutor { outputs });

        let outcome = engine
            .run(task(), configs, executor, VotingStrategy::Majority, None)
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.consensus, json!("a real answer"));
    }

    #[tokio::test]
    async fn diverse_experts_preserve_losing_conflicts() {
        let engine = ExpertsEngine::new(
            Arc::new(RateLimiter::new(crate::config::RateLimiterConfig::default())),
            ExpertsConfig::default(),
        );
        let configs = vec![
            ExpertConfig::from_archetype("a", Archetype::Performance),
            ExpertConfig::from_archetype("b", Archetype::Safety),
            ExpertConfig::from_archetype("c", Archetype::Simplicity),
        ];
        let mut outputs = std::collections::HashMap::new();
        outputs.insert("a".to_string(), raw(80.0, json!("fast but risky approach")));
        outputs.insert("b".to_string(), raw(85.0, json!("conservative careful approach")));
        outputs.insert("c".to_string(), raw(60.0, json!("minimal small approach")));
        let executor = Arc::new(CannedExecutor { outputs });

        let outcome = engine
            .run(task(), configs, executor, VotingStrategy::Weighted, None)
            .await
            .unwrap();

        assert!(!outcome.degraded);
        assert!(!outcome.preserved_conflicts.is_empty());
        assert!((0.0..=1.0).contains(&outcome.diversity_score));
    }
}
