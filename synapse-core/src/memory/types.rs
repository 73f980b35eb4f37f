//! Entities for the tiered memory substrate: the closed memory-type
//! taxonomy, `MemoryRecord`, and the filter/patch types used by the public
//! operations in [`super::MemoryStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed type taxonomy (spec §4.1). New variants are added here, never by
/// accepting an arbitrary string at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Episodic,
    Semantic,
    Procedural,
    Working,
    RefinementTrace,
    ExpertConsensus,
}

/// The tier currently holding a record. Tracked on the record itself so
/// maintenance can report migrations without a second index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

/// Lifecycle state machine for a single record (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Decaying,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: Value,
    pub importance: f64,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub tier: Tier,
    pub state: RecordState,
    /// Decaying strength in [0,1]; distinct from `importance`, which is the
    /// creation/reinforcement score. Strength is what maintenance decays.
    pub strength: f64,
    pub updated_at: DateTime<Utc>,
    /// Spaced-repetition schedule, populated only for procedural records
    /// tagged `spaced_repetition`.
    pub next_review_at: Option<DateTime<Utc>>,
    pub review_interval_days: Option<f64>,
    pub review_count: u32,
}

impl MemoryRecord {
    pub fn is_protected(&self, never_forget_importance: f64, never_forget_access_count: u64) -> bool {
        self.tags.iter().any(|t| t == "protected")
            || self.importance >= never_forget_importance
            || self.access_count >= never_forget_access_count
    }
}

/// Options accepted by `create`.
#[derive(Debug, Clone, Default)]
pub struct RememberOptions {
    pub importance: Option<f64>,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub salience: Option<f64>,
    pub relevance: Option<f64>,
}

/// Filters accepted by `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub memory_type: Option<MemoryType>,
    pub min_importance: Option<f64>,
    pub tags: Vec<String>,
    pub text_query: Option<String>,
    pub vector_query: Option<Vec<f32>>,
    pub limit: usize,
}

/// A partial update accepted by `update`.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<Value>,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
}

/// Result of a maintenance pass, returned by `runMaintenance`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub decayed: usize,
    pub archived: usize,
    pub deleted: usize,
    pub consolidated: usize,
}
