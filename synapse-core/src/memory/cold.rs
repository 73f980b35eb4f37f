//! Cold tier: a directory of JSON records plus human-readable markdown
//! summaries, standing in for "a version-controlled repository of
//! markdown/JSON files" (spec §4.1) — the repository's working tree; actual
//! version control is left to whatever wraps this directory (e.g. a git
//! hook), as the spec names the *contents*, not the VCS, as this tier's
//! concern.

use super::types::MemoryRecord;
use crate::error::{Result, SynapseError};
use crate::retry::{with_retry, RetryConfig};
use std::path::{Path, PathBuf};

pub struct ColdTier {
    root: PathBuf,
    retry: RetryConfig,
}

impl ColdTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retry: RetryConfig::default(),
        }
    }

    fn json_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn markdown_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.md"))
    }

    /// Best-effort write, retried with exponential backoff per spec §4.1.
    pub async fn put(&self, record: &MemoryRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let json_path = self.json_path(&record.id);
        let markdown_path = self.markdown_path(&record.id);
        let json = serde_json::to_string_pretty(record)?;
        let summary = render_markdown(record);

        with_retry(&self.retry, || {
            let json_path = json_path.clone();
            let markdown_path = markdown_path.clone();
            let json = json.clone();
            let summary = summary.clone();
            async move {
                tokio::fs::write(&json_path, &json).await?;
                tokio::fs::write(&markdown_path, &summary).await?;
                Ok::<(), std::io::Error>(())
            }
        })
        .await
        .map_err(|e| SynapseError::StorageTemporarilyUnavailable(e.to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let path = self.json_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let _ = tokio::fs::remove_file(self.json_path(id)).await;
        let _ = tokio::fs::remove_file(self.markdown_path(id)).await;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<MemoryRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Ok(bytes) = tokio::fs::read(&path).await {
                    if let Ok(record) = serde_json::from_slice(&bytes) {
                        out.push(record);
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn render_markdown(record: &MemoryRecord) -> String {
    format!(
        "# {id}\n\n- type: {ty:?}\n- importance: {importance:.2}\n- tags: {tags}\n- created: {created}\n\n{content}\n",
        id = record.id,
        ty = record.memory_type,
        importance = record.importance,
        tags = record.tags.join(", "),
        created = record.created_at.to_rfc3339(),
        content = record.content,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryType, RecordState, Tier};
    use chrono::Utc;
    use serde_json::json;

    fn sample(id: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            memory_type: MemoryType::Procedural,
            content: json!({"summary": "do the thing"}),
            importance: 0.95,
            tags: vec!["protected".into()],
            embedding: None,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            tier: Tier::Cold,
            state: RecordState::Archived,
            strength: 0.1,
            updated_at: Utc::now(),
            next_review_at: None,
            review_interval_days: None,
            review_count: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tier = ColdTier::new(dir.path());
        tier.put(&sample("c1")).await.unwrap();
        let fetched = tier.get("c1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "c1");
        assert!(dir.path().join("c1.md").exists());
    }

    #[tokio::test]
    async fn missing_record_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let tier = ColdTier::new(dir.path());
        assert!(tier.get("missing").await.unwrap().is_none());
    }
}
