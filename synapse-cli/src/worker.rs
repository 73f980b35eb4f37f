//! Worker entry point (spec §6 worker protocol): reads its assigned
//! Request file from argv, emits a readiness marker, runs the objective
//! under the refinement loop engine, and writes a terminal Result.
//!
//! This binary is what `synapse start` spawns as a child process per
//! request; it is never invoked directly by a user.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use synapse_core::config::SynapseConfig;
use synapse_core::refine::{
    DimensionScore, ExecutionOutcome, Executor as RefineExecutor, Auditor, RefinementEngine,
    RuntimeConfig, SelfAudit, TaskSpec,
};
use synapse_core::{MemorySubstrate, Result as CoreResult};
use synapse_coordinator::{Mailbox, Request, ResultStatus, TaskResult};

/// Runs a Request's objective as a shell command. This is the platform's
/// baseline executor; richer executors (LLM-backed, tool-using) plug into
/// the same `Executor` seam without changing the refinement loop.
struct ShellExecutor;

#[async_trait]
impl RefineExecutor for ShellExecutor {
    async fn attempt(
        &self,
        task: &TaskSpec,
        _runtime: &RuntimeConfig,
        _iteration: u32,
    ) -> CoreResult<ExecutionOutcome> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&task.goal)
            .output()
            .await
            .map_err(|e| synapse_core::SynapseError::Other(format!("shell spawn failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok(ExecutionOutcome {
            output: serde_json::json!({ "message": stdout, "stderr": stderr, "exit_success": output.status.success() }),
            steps: vec![
                format!("ran shell command: {}", task.goal),
                format!("exit status success={}", output.status.success()),
            ],
        })
    }
}

/// Scores the shell executor's result heuristically: correctness tracks
/// exit status, the other four dimensions default to their ceiling absent
/// any richer judge. Safety is never at issue for a direct shell echo.
struct HeuristicAuditor;

#[async_trait]
impl Auditor for HeuristicAuditor {
    async fn audit(&self, _task: &TaskSpec, outcome: &ExecutionOutcome) -> CoreResult<SelfAudit> {
        let exit_success = outcome
            .output
            .get("exit_success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let correctness = if exit_success {
            DimensionScore::justified(0.95, "command exited successfully")
        } else {
            DimensionScore::justified(0.2, "command exited with a non-zero status")
        };
        Ok(SelfAudit {
            correctness,
            efficiency: DimensionScore::justified(0.9, "single shell invocation"),
            safety: DimensionScore::justified(1.0, "no destructive operation requested"),
            evidence_alignment: DimensionScore::justified(0.9, "observation captured the command's own output"),
            artifact_quality: DimensionScore::justified(0.85, "plain text output"),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    synapse_core::logging::init();
    let started = Instant::now();

    let request_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: synapse-worker <request-file>"))?;

    let request_bytes = tokio::fs::read(&request_path).await?;
    let request: Request = serde_json::from_slice(&request_bytes)?;

    // requestPath is mailbox_root/processing/<id>.json.
    let mailbox_root = request_path
        .parent()
        .and_then(|p| p.parent())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("request path missing expected mailbox layout"))?;
    let mailbox = Mailbox::new(&mailbox_root);

    println!(
        "{}",
        serde_json::json!({ "ready": true, "requestId": request.request_id })
    );

    let config = SynapseConfig::from_file(mailbox_root.join("synapse.toml")).unwrap_or_default();
    let memory = Arc::new(MemorySubstrate::new(config.memory.clone()).await?);
    let engine = RefinementEngine::new(config.refinement.clone(), memory);

    let heartbeat_line = format!("processing request {}", request.request_id);
    mailbox.append_log(&request.request_id, &heartbeat_line).await.ok();
    println!("{heartbeat_line}");

    let task = TaskSpec {
        goal: request.objective.clone(),
        success_criteria: request.requirements.clone(),
        constraints: Vec::new(),
        max_iterations: 3,
    };

    let result = match engine
        .run(
            request.request_id.clone(),
            task,
            Arc::new(ShellExecutor),
            Arc::new(HeuristicAuditor),
        )
        .await
    {
        Ok(trace) => {
            let last = trace.iterations.last();
            let output = last.map(|it| it.observation.clone()).unwrap_or(serde_json::Value::Null);
            let status = match trace.outcome {
                synapse_core::refine::Outcome::Success => ResultStatus::Success,
                synapse_core::refine::Outcome::Partial => ResultStatus::Failure,
                synapse_core::refine::Outcome::AbortedSafety => ResultStatus::Failure,
            };
            TaskResult {
                request_id: request.request_id.clone(),
                status,
                completed_at: chrono::Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
                output,
                trace_ref: Some(format!("refinement_trace:{}", request.request_id)),
            }
        }
        Err(e) => TaskResult::synthesized_failure(
            request.request_id.clone(),
            ResultStatus::Failure,
            e.to_string(),
            started.elapsed().as_millis() as u64,
        ),
    };

    mailbox.write_result(&result).await?;
    Ok(())
}
