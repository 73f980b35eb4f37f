//! Hot tier: an in-process map, standing in for "a real-time synchronized
//! remote store with TTL" (spec §4.1) — the in-process side of that pair,
//! evicting the least-recently-accessed record once capacity is exceeded.

use super::types::MemoryRecord;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct HotTier {
    records: RwLock<HashMap<String, MemoryRecord>>,
    capacity: usize,
}

impl HotTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn put(&self, record: MemoryRecord) {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity && !records.contains_key(&record.id) {
            if let Some(oldest_id) = records
                .values()
                .min_by_key(|r| r.last_accessed)
                .map(|r| r.id.clone())
            {
                records.remove(&oldest_id);
            }
        }
        records.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &str) -> Option<MemoryRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<MemoryRecord> {
        self.records.write().await.remove(id)
    }

    pub async fn all(&self) -> Vec<MemoryRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{RecordState, Tier};
    use chrono::Utc;
    use serde_json::json;

    fn sample(id: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            memory_type: crate::memory::types::MemoryType::Working,
            content: json!("hello"),
            importance: 0.5,
            tags: vec![],
            embedding: None,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            tier: Tier::Hot,
            state: RecordState::Active,
            strength: 1.0,
            updated_at: Utc::now(),
            next_review_at: None,
            review_interval_days: None,
            review_count: 0,
        }
    }

    #[tokio::test]
    async fn evicts_least_recently_accessed_at_capacity() {
        let tier = HotTier::new(1);
        tier.put(sample("a")).await;
        tier.put(sample("b")).await;
        assert_eq!(tier.len().await, 1);
        assert!(tier.get("a").await.is_none());
        assert!(tier.get("b").await.is_some());
    }
}
