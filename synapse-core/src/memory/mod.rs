//! Tiered memory substrate (spec §4.1): hot (in-process), warm (embedded
//! SurrealDB), and cold (JSON/markdown directory) tiers behind one
//! `MemorySubstrate` handle. Other components hold record ids only; this
//! module is the sole owner of `MemoryRecord` storage.

mod cold;
mod consolidation;
mod hot;
mod importance;
mod spaced_repetition;
pub mod types;
mod warm;

pub use consolidation::ConsolidationAction;
pub use types::{
    MaintenanceReport, MemoryPatch, MemoryRecord, MemoryType, RecordState, RememberOptions,
    SearchFilters, Tier,
};

use crate::config::MemoryConfig;
use crate::distance::output_distance;
use crate::error::{Result, SynapseError};
use chrono::Utc;
use cold::ColdTier;
use hot::HotTier;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warm::WarmTier;

pub struct MemorySubstrate {
    hot: HotTier,
    warm: WarmTier,
    cold: ColdTier,
    config: MemoryConfig,
}

impl MemorySubstrate {
    pub async fn new(config: MemoryConfig) -> Result<Self> {
        let hot = HotTier::new(config.hot_capacity);
        let warm = WarmTier::new().await?;
        let cold = ColdTier::new(config.cold_root.clone());
        Ok(Self {
            hot,
            warm,
            cold,
            config,
        })
    }

    /// `create(content, type, importance?, tags?, embedding?)` (spec §4.1).
    pub async fn create(
        &self,
        content: serde_json::Value,
        memory_type: MemoryType,
        options: RememberOptions,
    ) -> Result<String> {
        if let Some(importance) = options.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(SynapseError::ImportanceOutOfRange(importance));
            }
        }

        let weights = self.config.importance_weights;
        let inputs = importance::ImportanceInputs::at_creation(options.salience, options.relevance);
        let computed = importance::compute_importance(&weights, inputs);
        let importance_value = options.importance.unwrap_or(computed).clamp(0.0, 1.0);

        let now = Utc::now();
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            memory_type,
            content,
            importance: importance_value,
            tags: options.tags,
            embedding: options.embedding,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            tier: Tier::Hot,
            state: RecordState::Active,
            strength: 1.0,
            updated_at: now,
            next_review_at: None,
            review_interval_days: None,
            review_count: 0,
        };

        self.hot.put(record.clone()).await;

        if let Err(e) = self.warm.put(&record).await {
            warn!("warm tier create failed, buffering to cold: {e}");
            self.cold.put(&record).await?;
        }

        debug!(id = %record.id, "memory record created");
        Ok(record.id)
    }

    /// `get(id, reinforce?=true)`.
    pub async fn get(&self, id: &str, reinforce: bool) -> Result<Option<MemoryRecord>> {
        let mut record = if let Some(r) = self.hot.get(id).await {
            Some(r)
        } else if let Some(r) = self.warm.get(id).await? {
            self.hot.put(r.clone()).await;
            Some(r)
        } else if let Some(mut r) = self.cold.get(id).await? {
            if r.state == RecordState::Archived {
                r.state = RecordState::Active;
            }
            self.hot.put(r.clone()).await;
            Some(r)
        } else {
            None
        };

        if let (true, Some(ref mut r)) = (reinforce, &mut record) {
            r.access_count += 1;
            r.last_accessed = Utc::now();
            let weights = self.config.importance_weights;
            let inputs = importance::ImportanceInputs {
                recency: 1.0,
                frequency: importance::frequency_component(r.access_count),
                salience: r.importance,
                relevance: r.importance,
            };
            r.importance = importance::compute_importance(&weights, inputs);
            r.updated_at = Utc::now();
            self.persist_everywhere(r).await?;
        }

        Ok(record)
    }

    /// `search(filters)` — ordered descending by a deterministic, configured
    /// blend of semantic similarity, importance, recency, and frequency.
    pub async fn search(&self, filters: SearchFilters) -> Result<Vec<MemoryRecord>> {
        let mut candidates = self.all_records().await?;

        candidates.retain(|r| {
            if let Some(ty) = filters.memory_type {
                if r.memory_type != ty {
                    return false;
                }
            }
            if let Some(min) = filters.min_importance {
                if r.importance < min {
                    return false;
                }
            }
            if !filters.tags.is_empty() && !filters.tags.iter().all(|t| r.tags.contains(t)) {
                return false;
            }
            if let Some(ref q) = filters.text_query {
                let haystack = r.content.to_string().to_lowercase();
                if !haystack.contains(&q.to_lowercase()) {
                    return false;
                }
            }
            true
        });

        let weights = self.config.retrieval_weights;
        let now = Utc::now();
        candidates.sort_by(|a, b| {
            let score_a = retrieval_score(a, &filters, &weights, now);
            let score_b = retrieval_score(b, &filters, &weights, now);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let limit = if filters.limit == 0 { usize::MAX } else { filters.limit };
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// `update(id, patch)`.
    pub async fn update(&self, id: &str, patch: MemoryPatch) -> Result<MemoryRecord> {
        let mut record = self
            .get(id, false)
            .await?
            .ok_or_else(|| SynapseError::NotFound(id.to_string()))?;

        if let Some(content) = patch.content {
            record.content = content;
        }
        if let Some(importance) = patch.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(SynapseError::ImportanceOutOfRange(importance));
            }
            record.importance = importance;
        }
        if let Some(tags) = patch.tags {
            record.tags = tags;
        }
        record.updated_at = Utc::now();

        self.persist_everywhere(&record).await?;
        Ok(record)
    }

    /// `runMaintenance()`: decay, tier migration, consolidation, spaced
    /// repetition. Never fails; individual record failures are logged.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let now = Utc::now();
        let warm_records = self.warm.all().await.unwrap_or_default();

        for mut record in warm_records {
            if record.is_protected(
                self.config.never_forget_importance,
                self.config.never_forget_access_count,
            ) {
                continue;
            }

            if spaced_repetition::review_if_due(&mut record, now) {
                record.last_accessed = now;
            }

            let delta_hours = importance::hours_since(record.updated_at, now);
            record.strength = importance::decay_strength(
                record.strength,
                self.config.decay_lambda,
                delta_hours,
                record.importance,
            );
            report.decayed += 1;

            if record.strength < self.config.delete_threshold {
                if record.state == RecordState::Archived
                    && now.signed_duration_since(record.updated_at)
                        >= chrono::Duration::from_std(self.config.delete_grace_period)
                            .unwrap_or_default()
                {
                    self.warm.delete(&record.id).await.ok();
                    self.cold.delete(&record.id).await.ok();
                    self.hot.remove(&record.id).await;
                    report.deleted += 1;
                    continue;
                }
                self.archive(&mut record).await?;
                report.archived += 1;
            } else if record.strength < self.config.compress_threshold {
                record.content = serde_json::json!({ "summary": record.content.to_string() });
                self.archive(&mut record).await?;
                report.archived += 1;
            } else if record.strength < self.config.archive_threshold {
                record.state = RecordState::Decaying;
                record.updated_at = now;
                self.warm.put(&record).await?;
            } else {
                self.warm.put(&record).await?;
            }
        }

        let active_warm: Vec<MemoryRecord> = self
            .warm
            .all()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.state == RecordState::Active || r.state == RecordState::Decaying)
            .collect();
        let actions = consolidation::consolidate(
            &active_warm,
            self.config.consolidation_similarity_threshold,
            now,
        );
        for action in actions {
            report.consolidated += self.apply_consolidation(action).await?;
        }

        Ok(report)
    }

    async fn archive(&self, record: &mut MemoryRecord) -> Result<()> {
        record.state = RecordState::Archived;
        record.tier = Tier::Cold;
        record.updated_at = Utc::now();
        self.cold.put(record).await?;
        self.warm.delete(&record.id).await.ok();
        self.hot.remove(&record.id).await;
        Ok(())
    }

    async fn apply_consolidation(&self, action: ConsolidationAction) -> Result<usize> {
        match action {
            ConsolidationAction::Linked { members } => {
                let cluster_tag = format!("cluster:{}", Uuid::new_v4());
                for id in &members {
                    if let Some(mut record) = self.warm.get(id).await? {
                        record.tags.push(cluster_tag.clone());
                        self.warm.put(&record).await?;
                    }
                }
                Ok(members.len())
            }
            ConsolidationAction::Summarized { members, summary } => {
                self.create(
                    serde_json::json!(summary),
                    MemoryType::Semantic,
                    RememberOptions {
                        tags: vec!["consolidated".into()],
                        ..Default::default()
                    },
                )
                .await?;
                for id in &members {
                    self.warm.delete(id).await.ok();
                    self.hot.remove(id).await;
                }
                Ok(members.len())
            }
            ConsolidationAction::Hybrid {
                preserved,
                members,
                summary,
            } => {
                self.create(
                    serde_json::json!(summary),
                    MemoryType::Semantic,
                    RememberOptions {
                        tags: vec!["consolidated".into()],
                        ..Default::default()
                    },
                )
                .await?;
                let mut count = 0;
                for id in &members {
                    if preserved.contains(id) {
                        continue;
                    }
                    self.warm.delete(id).await.ok();
                    self.hot.remove(id).await;
                    count += 1;
                }
                Ok(count)
            }
        }
    }

    async fn persist_everywhere(&self, record: &MemoryRecord) -> Result<()> {
        self.hot.put(record.clone()).await;
        match record.tier {
            Tier::Cold => {
                self.cold.put(record).await?;
            }
            _ => {
                self.warm.put(record).await?;
            }
        }
        Ok(())
    }

    async fn all_records(&self) -> Result<Vec<MemoryRecord>> {
        let mut out = self.warm.all().await.unwrap_or_default();
        let cold = self.cold.all().await.unwrap_or_default();
        for record in cold {
            if !out.iter().any(|r| r.id == record.id) {
                out.push(record);
            }
        }
        let hot = self.hot.all().await;
        for record in hot {
            if let Some(existing) = out.iter_mut().find(|r| r.id == record.id) {
                if record.updated_at > existing.updated_at {
                    *existing = record;
                }
            } else {
                out.push(record);
            }
        }
        Ok(out)
    }
}

fn retrieval_score(
    record: &MemoryRecord,
    filters: &SearchFilters,
    weights: &crate::config::RetrievalWeights,
    now: chrono::DateTime<Utc>,
) -> f64 {
    let semantic = match (&filters.vector_query, &record.embedding) {
        (Some(query), Some(embedding)) => 1.0 - output_distance(Some(query), Some(embedding), "", ""),
        _ => 0.5,
    };
    let recency = (-importance::hours_since(record.last_accessed, now) / 168.0).exp();
    let frequency = importance::frequency_component(record.access_count);

    weights.semantic * semantic
        + weights.importance * record.importance
        + weights.recency * recency
        + weights.frequency * frequency
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn substrate() -> MemorySubstrate {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MemoryConfig::default();
        config.cold_root = dir.path().to_path_buf();
        // Keep the TempDir alive for the test's duration by leaking it;
        // acceptable in tests, never in library code.
        std::mem::forget(dir);
        MemorySubstrate::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = substrate().await;
        let id = store
            .create(
                serde_json::json!("hello"),
                MemoryType::Episodic,
                RememberOptions::default(),
            )
            .await
            .unwrap();
        let record = store.get(&id, true).await.unwrap().unwrap();
        assert_eq!(record.content, serde_json::json!("hello"));
        assert_eq!(record.access_count, 1);
    }

    #[tokio::test]
    async fn out_of_range_importance_is_rejected() {
        let store = substrate().await;
        let result = store
            .create(
                serde_json::json!("x"),
                MemoryType::Working,
                RememberOptions {
                    importance: Some(1.5),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(SynapseError::ImportanceOutOfRange(_))));
    }

    #[tokio::test]
    async fn search_filters_by_type_and_importance() {
        let store = substrate().await;
        store
            .create(
                serde_json::json!("keep"),
                MemoryType::Semantic,
                RememberOptions {
                    importance: Some(0.9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .create(
                serde_json::json!("drop"),
                MemoryType::Episodic,
                RememberOptions {
                    importance: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let results = store
            .search(SearchFilters {
                memory_type: Some(MemoryType::Semantic),
                min_importance: Some(0.5),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, serde_json::json!("keep"));
    }

    #[tokio::test]
    async fn protected_records_survive_maintenance() {
        let store = substrate().await;
        let protected_id = store
            .create(
                serde_json::json!("protect me"),
                MemoryType::Semantic,
                RememberOptions {
                    importance: Some(0.6),
                    tags: vec!["protected".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store.run_maintenance().await.unwrap();

        let record = store.get(&protected_id, false).await.unwrap();
        assert!(record.is_some());
        assert_eq!(record.unwrap().state, RecordState::Active);
    }

    #[tokio::test]
    async fn update_rejects_unknown_id() {
        let store = substrate().await;
        let result = store.update("does-not-exist", MemoryPatch::default()).await;
        assert!(matches!(result, Err(SynapseError::NotFound(_))));
    }
}
