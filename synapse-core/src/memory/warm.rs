//! Warm tier: an embedded SurrealDB instance standing in for "an indexed
//! document store with an embedding index" (spec §4.1). Holds completed
//! process traces, semantic records, and consensus records.

use super::types::MemoryRecord;
use crate::error::{Result, SynapseError};
use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;

const TABLE: &str = "memory_records";

pub struct WarmTier {
    db: Surreal<Db>,
}

impl WarmTier {
    pub async fn new() -> Result<Self> {
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| SynapseError::StorageUnavailable(e.to_string()))?;
        db.use_ns("synapse")
            .use_db("memory")
            .await
            .map_err(|e| SynapseError::StorageUnavailable(e.to_string()))?;
        Ok(Self { db })
    }

    pub async fn put(&self, record: &MemoryRecord) -> Result<()> {
        self.db
            .update((TABLE, record.id.as_str()))
            .content(record.clone())
            .await
            .map_err(|e| SynapseError::StorageTemporarilyUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        self.db
            .select((TABLE, id))
            .await
            .map_err(|e| SynapseError::StorageUnavailable(e.to_string()))
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let _: Option<MemoryRecord> = self
            .db
            .delete((TABLE, id))
            .await
            .map_err(|e| SynapseError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<MemoryRecord>> {
        self.db
            .select(TABLE)
            .await
            .map_err(|e| SynapseError::StorageUnavailable(e.to_string()))
    }
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
            memory_type: MemoryType::Semantic,
            content: json!("fact"),
            importance: 0.6,
            tags: vec![],
            embedding: None,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            tier: Tier::Warm,
            state: RecordState::Active,
            strength: 1.0,
            updated_at: Utc::now(),
            next_review_at: None,
            review_interval_days: None,
            review_count: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let tier = WarmTier::new().await.unwrap();
        tier.put(&sample("w1")).await.unwrap();
        let fetched = tier.get("w1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "w1");
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let tier = WarmTier::new().await.unwrap();
        tier.put(&sample("w2")).await.unwrap();
        tier.delete("w2").await.unwrap();
        assert!(tier.get("w2").await.unwrap().is_none());
    }
}
