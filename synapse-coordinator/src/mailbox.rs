//! File-based mailbox (spec §4.5, §6): the `requests/processing/results/
//! handoffs/logs` folder layout and the atomic rename operations that move
//! a request between them. Only the coordinator renames files between
//! folders; workers write only to `handoffs/`, `results/`, `logs/`, and
//! (for sub-requests) new entries under `requests/`.

use crate::error::{CoordinatorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Research,
    Implement,
    Validate,
    Orchestrate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Context {
    Inline(serde_json::Value),
    Ref { context_ref: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub role: Role,
    pub objective: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_request_id: Option<String>,
    #[serde(default)]
    pub allow_subrequests: bool,
}

impl Request {
    pub fn new(role: Role, objective: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            role,
            objective: objective.into(),
            timestamp: Utc::now(),
            context: None,
            requirements: Vec::new(),
            timeout_hint: None,
            parent_request_id: None,
            allow_subrequests: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
    Timeout,
    Crash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub request_id: String,
    pub status: ResultStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_ref: Option<String>,
}

impl TaskResult {
    pub fn synthesized_failure(request_id: impl Into<String>, status: ResultStatus, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            completed_at: Utc::now(),
            duration_ms,
            output: serde_json::json!({ "reason": reason.into() }),
            trace_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub handoff_id: String,
    pub from_request_id: String,
    pub to_role: Role,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The five standard subdirectories of a mailbox root. Cheap to clone: it
/// is just a root path, safely shared across the log-tailing task and the
/// monitor loop.
#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.root.join("requests")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.root.join("processing")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn handoffs_dir(&self) -> PathBuf {
        self.root.join("handoffs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create every subdirectory if absent. Idempotent.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.requests_dir(),
            self.processing_dir(),
            self.results_dir(),
            self.handoffs_dir(),
            self.logs_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| CoordinatorError::MailboxUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    /// List pending Request files in `requests/`, sorted by mtime ascending
    /// with a filename tie-break (spec §5's FIFO-by-mtime ordering
    /// guarantee).
    pub async fn poll_requests(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(self.requests_dir()).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoordinatorError::MailboxUnavailable(e.to_string())),
        };
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CoordinatorError::MailboxUnavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((modified, path));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(entries.into_iter().map(|(_, p)| p).collect())
    }

    pub async fn read_request(&self, path: &Path) -> Result<Request> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            CoordinatorError::RequestRejected(format!("malformed request {}: {e}", path.display()))
        })
    }

    /// Atomically move a pending Request from `requests/` into `processing/`.
    pub async fn promote(&self, request_id: &str) -> Result<PathBuf> {
        let from = self.requests_dir().join(format!("{request_id}.json"));
        let to = self.processing_dir().join(format!("{request_id}.json"));
        tokio::fs::rename(&from, &to).await?;
        Ok(to)
    }

    /// Write a new Request file into `requests/` via write-then-rename so a
    /// concurrent poller never observes a partial file (spec §6 worker
    /// protocol's atomic-write contract, also used for sub-requests).
    pub async fn submit(&self, request: &Request) -> Result<()> {
        let final_path = self.requests_dir().join(format!("{}.json", request.request_id));
        self.write_atomic(&final_path, &serde_json::to_vec_pretty(request)?)
            .await
    }

    /// Write the terminal Result atomically and remove the Request from
    /// `processing/` (spec invariant: every request reaches `results/`
    /// exactly once). Only the coordinator calls this — it's the one that
    /// moves files between mailbox folders.
    pub async fn complete(&self, result: &TaskResult) -> Result<()> {
        self.write_result(result).await?;
        let processing_path = self
            .processing_dir()
            .join(format!("{}.json", result.request_id));
        tokio::fs::remove_file(&processing_path).await.ok();
        Ok(())
    }

    /// Write the terminal Result atomically without touching `processing/`.
    /// For the worker process itself: it writes its own Result per the
    /// wire protocol (spec §6 step 4), but moving the Request out of
    /// `processing/` stays the coordinator's job, done in `complete()`
    /// once the child has exited.
    pub async fn write_result(&self, result: &TaskResult) -> Result<()> {
        let result_path = self.results_dir().join(format!("{}.json", result.request_id));
        self.write_atomic(&result_path, &serde_json::to_vec_pretty(result)?)
            .await
    }

    async fn write_atomic(&self, final_path: &Path, contents: &[u8]) -> Result<()> {
        let tmp_path = final_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, final_path).await?;
        Ok(())
    }

    /// Depth of `request` in its sub-request ancestry chain, walking
    /// `parentRequestId` links through `processing/` and `results/` (spec
    /// §4.5's `maxDepth` enforcement "by reading ancestry").
    pub async fn ancestry_depth(&self, request: &Request) -> u32 {
        let mut depth = 0;
        let mut current_parent = request.parent_request_id.clone();
        while let Some(parent_id) = current_parent {
            depth += 1;
            current_parent = self.find_parent_of(&parent_id).await;
            if depth > 64 {
                break; // runaway ancestry chain; treat as unbounded depth.
            }
        }
        depth
    }

    async fn find_parent_of(&self, request_id: &str) -> Option<String> {
        for dir in [self.processing_dir(), self.results_dir(), self.requests_dir()] {
            let path = dir.join(format!("{request_id}.json"));
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if let Ok(req) = serde_json::from_slice::<Request>(&bytes) {
                    return req.parent_request_id;
                }
            }
        }
        None
    }

    /// Append one progress line to a request's log stream.
    pub async fn append_log(&self, request_id: &str, line: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let path = self.logs_dir().join(format!("{request_id}.stream"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn tail_log(&self, request_id: &str, max_bytes: usize) -> String {
        let path = self.logs_dir().join(format!("{request_id}.stream"));
        let Ok(contents) = tokio::fs::read_to_string(&path).await else {
            return String::new();
        };
        if contents.len() <= max_bytes {
            contents
        } else {
            contents[contents.len() - max_bytes..].to_string()
        }
    }

    /// Lazy context resolution (spec §4.5): inline context under the
    /// configured char threshold is returned as-is; otherwise load from the
    /// referenced file on first use.
    pub async fn load_context(&self, context: &Context, inline_threshold_chars: usize) -> Result<serde_json::Value> {
        match context {
            Context::Inline(value) => {
                let rendered = value.to_string();
                if rendered.len() > inline_threshold_chars {
                    tracing::warn!(
                        len = rendered.len(),
                        threshold = inline_threshold_chars,
                        "inline context exceeds threshold; consider a context_ref"
                    );
                }
                Ok(value.clone())
            }
            Context::Ref { context_ref } => {
                let bytes = tokio::fs::read(context_ref).await?;
                Ok(serde_json::from_slice(&bytes)?)
            }
        }
    }

    /// Restart recovery (spec §6): files left in `processing/` with no live
    /// process are moved back to `requests/`, or synthesized as a crash
    /// Result if their log shows prior work.
    pub async fn recover_orphaned_processing(&self) -> Result<Vec<String>> {
        let mut recovered = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(self.processing_dir()).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(recovered),
            Err(e) => return Err(CoordinatorError::MailboxUnavailable(e.to_string())),
        };
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CoordinatorError::MailboxUnavailable(e.to_string()))?
        {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let request_id = stem.to_string();
            let log_has_content = tokio::fs::metadata(self.logs_dir().join(format!("{request_id}.stream")))
                .await
                .map(|m| m.len() > 0)
                .unwrap_or(false);

            if log_has_content {
                if let Ok(request) = self.read_request(&path).await {
                    let _ = request;
                }
                let result = TaskResult::synthesized_failure(
                    request_id.clone(),
                    ResultStatus::Crash,
                    "coordinator restarted while this request showed prior activity",
                    0,
                );
                self.write_atomic(
                    &self.results_dir().join(format!("{request_id}.json")),
                    &serde_json::to_vec_pretty(&result)?,
                )
                .await?;
                tokio::fs::remove_file(&path).await.ok();
            } else {
                let to = self.requests_dir().join(format!("{request_id}.json"));
                tokio::fs::rename(&path, &to).await?;
            }
            recovered.push(request_id);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mailbox() -> Mailbox {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = Mailbox::new(dir.path());
        std::mem::forget(dir);
        mailbox.ensure_layout().await.unwrap();
        mailbox
    }

    #[tokio::test]
    async fn submit_then_poll_then_promote_round_trips() {
        let mailbox = mailbox().await;
        let request = Request::new(Role::Implement, "echo 'ok'");
        mailbox.submit(&request).await.unwrap();

        let pending = mailbox.poll_requests().await.unwrap();
        assert_eq!(pending.len(), 1);

        let read_back = mailbox.read_request(&pending[0]).await.unwrap();
        assert_eq!(read_back.request_id, request.request_id);

        mailbox.promote(&request.request_id).await.unwrap();
        assert!(mailbox
            .processing_dir()
            .join(format!("{}.json", request.request_id))
            .exists());
        assert!(mailbox.poll_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_removes_from_processing_and_writes_result() {
        let mailbox = mailbox().await;
        let request = Request::new(Role::Implement, "do it");
        mailbox.submit(&request).await.unwrap();
        mailbox.promote(&request.request_id).await.unwrap();

        let result = TaskResult::synthesized_failure(request.request_id.clone(), ResultStatus::Failure, "boom", 5);
        mailbox.complete(&result).await.unwrap();

        assert!(!mailbox
            .processing_dir()
            .join(format!("{}.json", request.request_id))
            .exists());
        assert!(mailbox
            .results_dir()
            .join(format!("{}.json", request.request_id))
            .exists());
    }

    #[tokio::test]
    async fn ancestry_depth_walks_parent_chain() {
        let mailbox = mailbox().await;
        let grandparent = Request::new(Role::Orchestrate, "root task");
        mailbox.submit(&grandparent).await.unwrap();
        mailbox.promote(&grandparent.request_id).await.unwrap();

        let mut parent = Request::new(Role::Implement, "child task");
        parent.parent_request_id = Some(grandparent.request_id.clone());
        mailbox.submit(&parent).await.unwrap();
        mailbox.promote(&parent.request_id).await.unwrap();

        let mut child = Request::new(Role::Validate, "grandchild task");
        child.parent_request_id = Some(parent.request_id.clone());

        assert_eq!(mailbox.ancestry_depth(&child).await, 2);
        assert_eq!(mailbox.ancestry_depth(&parent).await, 1);
        assert_eq!(mailbox.ancestry_depth(&grandparent).await, 0);
    }
}
