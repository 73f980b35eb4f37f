//! The coordinator's scheduling loop (spec §4.5 Operations): polls
//! `requests/`, promotes up to `maxConcurrent` requests to running
//! `AgentProcess`es, and exposes `start/submit/status/stop`.

use crate::error::{CoordinatorError, Result};
use crate::mailbox::{Mailbox, Request, ResultStatus, TaskResult};
use crate::process::{AgentProcess, HealthStatus, HeartbeatHandle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use synapse_core::config::CoordinatorConfig;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RequestStatus {
    pub phase: Phase,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub elapsed_ms: u64,
    pub health: HealthStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Queued,
    Processing,
    Completed,
}

struct ActiveEntry {
    started_at: Instant,
    handle: JoinHandle<()>,
    heartbeat: Arc<Mutex<Option<HeartbeatHandle>>>,
}

/// Drives the mailbox: polling, admission control, spawning, and recovery.
/// Owns no business logic beyond scheduling — workers and the refinement/
/// expert engines run inside the spawned binary, not here.
pub struct Coordinator {
    mailbox: Mailbox,
    worker_binary: PathBuf,
    config: CoordinatorConfig,
    max_depth: u32,
    active: Arc<Mutex<HashMap<String, ActiveEntry>>>,
    stopped: Arc<RwLock<bool>>,
}

impl Coordinator {
    pub fn new(
        mailbox_root: impl Into<PathBuf>,
        worker_binary: impl Into<PathBuf>,
        config: CoordinatorConfig,
        max_depth: u32,
    ) -> Self {
        Self {
            mailbox: Mailbox::new(mailbox_root),
            worker_binary: worker_binary.into(),
            config,
            max_depth,
            active: Arc::new(Mutex::new(HashMap::new())),
            stopped: Arc::new(RwLock::new(false)),
        }
    }

    /// `start()`: ensure the mailbox layout, recover orphaned `processing/`
    /// entries from a prior crash, then poll until `stop()` is called.
    /// Only fatal if the mailbox root itself is unavailable.
    pub async fn start(&self) -> Result<()> {
        self.mailbox.ensure_layout().await?;
        let recovered = self.mailbox.recover_orphaned_processing().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered orphaned processing entries on startup");
        }

        loop {
            if *self.stopped.read().await {
                break;
            }
            self.poll_once().await?;
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(())
    }

    async fn poll_once(&self) -> Result<()> {
        let active_count = self.active.lock().await.len();
        if active_count >= self.config.max_concurrent {
            return Ok(());
        }

        let pending = self.mailbox.poll_requests().await?;
        let mut available_slots = self.config.max_concurrent - active_count;

        for path in pending {
            if available_slots == 0 {
                break;
            }
            let Ok(request) = self.mailbox.read_request(&path).await else {
                warn!(path = %path.display(), "rejecting malformed request");
                continue;
            };

            let depth = self.mailbox.ancestry_depth(&request).await;
            if depth > self.max_depth {
                warn!(request_id = %request.request_id, depth, "rejecting request: exceeds maxDepth");
                let result = TaskResult::synthesized_failure(
                    request.request_id.clone(),
                    ResultStatus::Failure,
                    "sub-request ancestry exceeds the configured maxDepth",
                    0,
                );
                self.mailbox.complete(&result).await?;
                tokio::fs::remove_file(&path).await.ok();
                continue;
            }

            self.promote(request).await?;
            available_slots -= 1;
        }
        Ok(())
    }

    async fn promote(&self, request: Request) -> Result<()> {
        let processing_path = self.mailbox.promote(&request.request_id).await?;
        let request_id = request.request_id.clone();
        info!(request_id = %request_id, "promoted request to processing");

        let mailbox = self.mailbox.clone();
        let worker_binary = self.worker_binary.clone();
        let config = self.config.clone();
        let active = self.active.clone();
        let heartbeat = Arc::new(Mutex::new(None));
        let heartbeat_for_task = heartbeat.clone();

        let handle = tokio::spawn(async move {
            let outcome = AgentProcess::spawn_and_run(
                &worker_binary,
                &processing_path,
                &request,
                &mailbox,
                &config,
                &heartbeat_for_task,
            )
            .await;
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(request_id = %request.request_id, error = %e, "worker lifecycle failed, synthesizing crash result");
                    TaskResult::synthesized_failure(request.request_id.clone(), ResultStatus::Crash, e.to_string(), 0)
                }
            };
            if let Err(e) = mailbox.complete(&result).await {
                warn!(request_id = %request.request_id, error = %e, "failed to write terminal result");
            }
            active.lock().await.remove(&request.request_id);
        });

        self.active.lock().await.insert(
            request_id,
            ActiveEntry {
                started_at: Instant::now(),
                handle,
                heartbeat,
            },
        );
        Ok(())
    }

    /// `submit(request)`: validate and write a new Request file. Rejects
    /// malformed requests at the boundary without ever entering processing.
    pub async fn submit(&self, request: Request) -> Result<String> {
        if request.objective.trim().is_empty() {
            return Err(CoordinatorError::RequestRejected("objective must not be empty".into()));
        }
        self.mailbox.ensure_layout().await?;
        self.mailbox.submit(&request).await?;
        Ok(request.request_id)
    }

    /// `status(requestId)`. `health` is a derived field (SUPPLEMENTED
    /// FEATURES, SPEC_FULL.md): `Unknown` until the worker's heartbeat
    /// tracking comes online (still spawning/health-checking), then
    /// `Healthy`/`Unhealthy` off the same silence-warning threshold the
    /// progressive-timeout monitor uses.
    pub async fn status(&self, request_id: &str) -> Result<RequestStatus> {
        if let Some(entry) = self.active.lock().await.get(request_id) {
            let health = match entry.heartbeat.lock().await.as_ref() {
                Some(handle) => handle.health(&self.config).await,
                None => HealthStatus::Unknown,
            };
            return Ok(RequestStatus {
                phase: Phase::Processing,
                last_heartbeat: Some(chrono::Utc::now()),
                elapsed_ms: entry.started_at.elapsed().as_millis() as u64,
                health,
            });
        }
        let result_path = self.mailbox.results_dir().join(format!("{request_id}.json"));
        if tokio::fs::metadata(&result_path).await.is_ok() {
            return Ok(RequestStatus {
                phase: Phase::Completed,
                last_heartbeat: None,
                elapsed_ms: 0,
                health: HealthStatus::Unknown,
            });
        }
        let request_path = self.mailbox.requests_dir().join(format!("{request_id}.json"));
        if tokio::fs::metadata(&request_path).await.is_ok() {
            return Ok(RequestStatus {
                phase: Phase::Queued,
                last_heartbeat: None,
                elapsed_ms: 0,
                health: HealthStatus::Unknown,
            });
        }
        Err(CoordinatorError::NotFound(request_id.to_string()))
    }

    /// `stop(drain)`: stop polling for new work. When `drain` is true, wait
    /// for all active processes to finish; otherwise abort them immediately.
    pub async fn stop(&self, drain: bool) -> (usize, usize) {
        *self.stopped.write().await = true;
        let mut active = self.active.lock().await;
        let total = active.len();
        let mut completed = 0;
        if drain {
            for (_, entry) in active.drain() {
                if entry.handle.await.is_ok() {
                    completed += 1;
                }
            }
        } else {
            for (_, entry) in active.drain() {
                entry.handle.abort();
            }
        }
        (completed, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Role;

    fn coordinator() -> (Coordinator, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        let coordinator = Coordinator::new(&path, "/bin/nonexistent-worker", CoordinatorConfig::default(), 2);
        (coordinator, path)
    }

    #[tokio::test]
    async fn submit_rejects_empty_objective() {
        let (coordinator, _dir) = coordinator();
        let request = Request::new(Role::Implement, "   ");
        let result = coordinator.submit(request).await;
        assert!(matches!(result, Err(CoordinatorError::RequestRejected(_))));
    }

    #[tokio::test]
    async fn submit_then_status_reports_queued() {
        let (coordinator, _dir) = coordinator();
        let request = Request::new(Role::Implement, "echo ok");
        let request_id = coordinator.submit(request).await.unwrap();

        let status = coordinator.status(&request_id).await.unwrap();
        assert_eq!(status.phase, Phase::Queued);
    }

    #[tokio::test]
    async fn status_of_unknown_request_is_not_found() {
        let (coordinator, _dir) = coordinator();
        let result = coordinator.status("does-not-exist").await;
        assert!(matches!(result, Err(CoordinatorError::NotFound(_))));
    }
}
