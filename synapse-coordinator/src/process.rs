//! Worker process lifecycle (spec §4.5): spawn, wait for the readiness
//! marker, monitor heartbeats, enforce the progressive timeout schedule,
//! and produce a terminal Result either from the worker itself or
//! synthesized by the coordinator on crash/timeout.
//!
//! Grounded on the teacher's `ProcessSupervisor` (spawn → wait-for-ready →
//! SIGTERM-then-force-kill shutdown), generalized from a long-lived
//! HTTP-backed agent to a short-lived worker that communicates over stdout.

use crate::error::{CoordinatorError, Result};
use crate::mailbox::{Mailbox, Request, ResultStatus, TaskResult};
use serde::Deserialize;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_core::config::CoordinatorConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ReadinessMarker {
    ready: bool,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

/// Derived health of a running `AgentProcess`, exposed via the coordinator's
/// `status()` as an additional field (SUPPLEMENTED FEATURES, SPEC_FULL.md):
/// not a new entity, just a read of the heartbeat state `monitor()` already
/// tracks, for an outside observer who doesn't want to wait on the full
/// silence-kill threshold to learn a worker has gone quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A cheap, cloneable handle onto a running process's last-output
/// timestamp, so the scheduler can compute `HealthStatus` from `status()`
/// without holding the process's own monitor loop hostage.
#[derive(Clone)]
pub struct HeartbeatHandle {
    last_output: Arc<Mutex<Instant>>,
}

impl HeartbeatHandle {
    /// `Unhealthy` once a worker has been silent past the warning
    /// threshold (spec §4.5's "silence warning" point), `Healthy`
    /// otherwise.
    pub async fn health(&self, config: &CoordinatorConfig) -> HealthStatus {
        let elapsed = self.last_output.lock().await.elapsed();
        if elapsed >= config.silence_warning_threshold {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Which complexity tier's initial budget a request gets. Chosen from the
/// request's `timeoutHint`, defaulting to `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Small,
    Medium,
    Large,
}

impl Complexity {
    fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("small") => Complexity::Small,
            Some("large") => Complexity::Large,
            _ => Complexity::Medium,
        }
    }

    fn initial_budget(self, tiers: &synapse_core::config::TimeoutTiers) -> Duration {
        match self {
            Complexity::Small => tiers.small,
            Complexity::Medium => tiers.medium,
            Complexity::Large => tiers.large,
        }
    }
}

/// A running (or just-completed) worker and the heartbeat state the
/// coordinator tracks independently per process (spec §4.5's child
/// isolation guarantee).
pub struct AgentProcess {
    pub request_id: String,
    pub pid: Option<u32>,
    started_at: Instant,
    last_output: Arc<Mutex<Instant>>,
    output_bursts: Arc<AtomicU64>,
    budget: Duration,
    extensions_granted: u32,
}

impl AgentProcess {
    /// Spawn `binary` for `request`, wait for the readiness marker within
    /// `config.health_check_timeout`, then drive it to completion —
    /// monitoring heartbeats and enforcing the progressive timeout — and
    /// return the terminal Result. The worker is expected to write its own
    /// Result file (spec §6 step 4); if it exits without one, the
    /// coordinator synthesizes a failure Result per the contract-violation
    /// error category.
    ///
    /// `heartbeat_slot` is filled in with a [`HeartbeatHandle`] as soon as
    /// the process starts monitoring, so a caller holding the other side
    /// (the scheduler's `status()`) can read derived health without
    /// waiting for this call to return.
    pub async fn spawn_and_run(
        binary: &std::path::Path,
        request_path: &std::path::Path,
        request: &Request,
        mailbox: &Mailbox,
        config: &CoordinatorConfig,
        heartbeat_slot: &Mutex<Option<HeartbeatHandle>>,
    ) -> Result<TaskResult> {
        let started_at = Instant::now();
        let mut cmd = Command::new(binary);
        cmd.arg(request_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            CoordinatorError::WorkerNoReadiness(format!("failed to spawn worker: {e}"))
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        let ready = timeout(config.health_check_timeout, Self::wait_for_readiness(&mut lines))
            .await;
        let ready = match ready {
            Ok(Ok(marker)) => marker,
            Ok(Err(e)) => {
                Self::force_kill(&mut child, config.shutdown_grace).await;
                return Ok(Self::crash_result(&request.request_id, started_at, e.to_string()));
            }
            Err(_) => {
                Self::force_kill(&mut child, config.shutdown_grace).await;
                return Ok(Self::crash_result(
                    &request.request_id,
                    started_at,
                    "no readiness marker within the health-check budget".to_string(),
                ));
            }
        };
        if !ready.ready {
            Self::force_kill(&mut child, config.shutdown_grace).await;
            return Ok(Self::crash_result(
                &request.request_id,
                started_at,
                "worker reported ready=false".to_string(),
            ));
        }
        info!(request_id = %request.request_id, pid, "worker ready");

        let process = Self {
            request_id: request.request_id.clone(),
            pid,
            started_at,
            last_output: Arc::new(Mutex::new(Instant::now())),
            output_bursts: Arc::new(AtomicU64::new(0)),
            budget: Complexity::from_hint(request.timeout_hint.as_deref())
                .initial_budget(&config.timeout_tiers),
            extensions_granted: 0,
        };

        *heartbeat_slot.lock().await = Some(process.heartbeat_handle());

        let log_task = {
            let last_output = process.last_output.clone();
            let bursts = process.output_bursts.clone();
            let mailbox = mailbox.clone();
            let request_id = request.request_id.clone();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    *last_output.lock().await = Instant::now();
                    bursts.fetch_add(1, Ordering::Relaxed);
                    let _ = mailbox.append_log(&request_id, &line).await;
                }
            })
        };

        let outcome = process.monitor(&mut child, config).await;
        log_task.abort();

        match outcome {
            MonitorOutcome::Exited(status) => {
                let result_path = mailbox.results_dir().join(format!("{}.json", request.request_id));
                if tokio::fs::metadata(&result_path).await.is_ok() {
                    let bytes = tokio::fs::read(&result_path).await?;
                    Ok(serde_json::from_slice(&bytes)?)
                } else if status.success() {
                    Err(CoordinatorError::WorkerNoResult(request.request_id.clone()))
                } else {
                    Ok(Self::crash_result(
                        &request.request_id,
                        started_at,
                        format!("worker exited with {status} and wrote no Result"),
                    ))
                }
            }
            MonitorOutcome::SilenceKilled => {
                Self::force_kill(&mut child, config.shutdown_grace).await;
                Ok(TaskResult {
                    request_id: request.request_id.clone(),
                    status: ResultStatus::Timeout,
                    completed_at: chrono::Utc::now(),
                    duration_ms: started_at.elapsed().as_millis() as u64,
                    output: serde_json::json!({ "reason": "silence_kill" }),
                    trace_ref: None,
                })
            }
            MonitorOutcome::BudgetExhausted => {
                Self::force_kill(&mut child, config.shutdown_grace).await;
                Ok(TaskResult {
                    request_id: request.request_id.clone(),
                    status: ResultStatus::Timeout,
                    completed_at: chrono::Utc::now(),
                    duration_ms: started_at.elapsed().as_millis() as u64,
                    output: serde_json::json!({ "reason": "timeout" }),
                    trace_ref: None,
                })
            }
        }
    }

    /// A clonable handle onto this process's heartbeat state, for a
    /// caller outside the monitor loop to derive [`HealthStatus`] from.
    pub fn heartbeat_handle(&self) -> HeartbeatHandle {
        HeartbeatHandle {
            last_output: self.last_output.clone(),
        }
    }

    async fn wait_for_readiness(
        lines: &mut tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    ) -> std::result::Result<ReadinessMarker, std::io::Error> {
        loop {
            match lines.next_line().await? {
                Some(line) => {
                    if let Ok(marker) = serde_json::from_str::<ReadinessMarker>(&line) {
                        return Ok(marker);
                    }
                    debug!(line, "ignoring non-readiness stdout line before ready");
                }
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "worker closed stdout before emitting readiness",
                    ))
                }
            }
        }
    }

    /// Progressive timeout monitor (spec §4.5): checks heartbeats every
    /// `heartbeat_interval`, escalating from silence-warning to
    /// silence-kill, and extends the budget when the worker shows progress
    /// near its current budget.
    async fn monitor(&self, child: &mut Child, config: &CoordinatorConfig) -> MonitorOutcome {
        let mut extensions_granted = self.extensions_granted;
        let mut budget = self.budget;
        let mut warned = false;

        loop {
            let tick = tokio::time::sleep(config.heartbeat_interval);
            tokio::select! {
                status = child.wait() => {
                    return MonitorOutcome::Exited(status.unwrap_or_default());
                }
                _ = tick => {}
            }

            let elapsed_since_output = {
                let last = *self.last_output.lock().await;
                last.elapsed()
            };
            let elapsed_total = self.started_at.elapsed();

            if elapsed_since_output >= config.silence_kill_threshold {
                warn!(request_id = %self.request_id, "worker silent past kill threshold");
                return MonitorOutcome::SilenceKilled;
            }
            if elapsed_since_output >= config.silence_warning_threshold && !warned {
                warn!(request_id = %self.request_id, "worker silent past warning threshold");
                warned = true;
            }

            if elapsed_total >= budget {
                let bursts = self.output_bursts.load(Ordering::Relaxed);
                let making_progress = elapsed_since_output < Duration::from_secs(30) && bursts >= 2;
                let can_extend = budget + config.timeout_extension <= config.timeout_cap;
                if making_progress && can_extend {
                    budget += config.timeout_extension;
                    extensions_granted += 1;
                    info!(
                        request_id = %self.request_id,
                        extensions_granted,
                        new_budget_secs = budget.as_secs(),
                        "extended worker timeout budget"
                    );
                } else {
                    return MonitorOutcome::BudgetExhausted;
                }
            }
        }
    }

    async fn force_kill(child: &mut Child, grace: Duration) {
        if let Some(pid) = child.id() {
            #[cfg(unix)]
            {
                let _ = tokio::process::Command::new("kill")
                    .arg("-TERM")
                    .arg(pid.to_string())
                    .status()
                    .await;
            }
        }
        if timeout(grace, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
    }

    fn crash_result(request_id: &str, started_at: Instant, reason: String) -> TaskResult {
        TaskResult {
            request_id: request_id.to_string(),
            status: ResultStatus::Crash,
            completed_at: chrono::Utc::now(),
            duration_ms: started_at.elapsed().as_millis() as u64,
            output: serde_json::json!({ "reason": reason }),
            trace_ref: None,
        }
    }
}

enum MonitorOutcome {
    Exited(std::process::ExitStatus),
    SilenceKilled,
    BudgetExhausted,
}
