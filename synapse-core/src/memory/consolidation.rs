//! Consolidation: clusters warm records whose pairwise similarity exceeds a
//! configured threshold within a temporal window, and either links small
//! clusters, summarizes low-importance large clusters, or preserves
//! high-importance nodes alongside a summary (spec §4.1).

use super::types::MemoryRecord;
use crate::distance::output_distance;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

#[derive(Debug, Clone)]
pub enum ConsolidationAction {
    Linked { members: Vec<String> },
    Summarized { members: Vec<String>, summary: String },
    Hybrid {
        preserved: Vec<String>,
        members: Vec<String>,
        summary: String,
    },
}

/// Temporal window within which records are eligible to cluster together.
const TEMPORAL_WINDOW_HOURS: i64 = 72;

pub fn consolidate(
    records: &[MemoryRecord],
    similarity_threshold: f64,
    now: DateTime<Utc>,
) -> Vec<ConsolidationAction> {
    let window_start = now - ChronoDuration::hours(TEMPORAL_WINDOW_HOURS);
    let eligible: Vec<&MemoryRecord> = records
        .iter()
        .filter(|r| r.created_at >= window_start)
        .collect();

    let clusters = cluster_by_similarity(&eligible, similarity_threshold);

    clusters
        .into_iter()
        .filter(|c| c.len() > 1)
        .map(|cluster| classify_cluster(&cluster))
        .collect()
}

fn cluster_by_similarity<'a>(
    records: &[&'a MemoryRecord],
    similarity_threshold: f64,
    // (distance <= 1 - similarity_threshold counts as "similar")
) -> Vec<Vec<&'a MemoryRecord>> {
    let distance_threshold = 1.0 - similarity_threshold;
    let mut assigned = vec![false; records.len()];
    let mut clusters = Vec::new();

    for i in 0..records.len() {
        if assigned[i] {
            continue;
        }
        let mut cluster = vec![records[i]];
        assigned[i] = true;
        for j in (i + 1)..records.len() {
            if assigned[j] {
                continue;
            }
            let distance = output_distance(
                records[i].embedding.as_deref(),
                records[j].embedding.as_deref(),
                &text_of(records[i]),
                &text_of(records[j]),
            );
            if distance <= distance_threshold {
                cluster.push(records[j]);
                assigned[j] = true;
            }
        }
        clusters.push(cluster);
    }
    clusters
}

fn text_of(record: &MemoryRecord) -> String {
    record.content.to_string()
}

fn classify_cluster(cluster: &[&MemoryRecord]) -> ConsolidationAction {
    let members: Vec<String> = cluster.iter().map(|r| r.id.clone()).collect();
    if cluster.len() <= 2 {
        return ConsolidationAction::Linked { members };
    }

    let avg_importance: f64 =
        cluster.iter().map(|r| r.importance).sum::<f64>() / cluster.len() as f64;
    let summary = summarize(cluster);

    if avg_importance < 0.5 {
        ConsolidationAction::Summarized { members, summary }
    } else {
        let preserved: Vec<String> = cluster
            .iter()
            .filter(|r| r.importance >= 0.7)
            .map(|r| r.id.clone())
            .collect();
        ConsolidationAction::Hybrid {
            preserved,
            members,
            summary,
        }
    }
}

fn summarize(cluster: &[&MemoryRecord]) -> String {
    format!(
        "{} related memories consolidated: {}",
        cluster.len(),
        cluster
            .iter()
            .map(|r| r.content.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryType, RecordState, Tier};
    use serde_json::json;

    fn record(id: &str, content: &str, importance: f64) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            memory_type: MemoryType::Semantic,
            content: json!(content),
            importance,
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

    #[test]
    fn identical_text_clusters_and_links_small_group() {
        let records = vec![
            record("a", "the sky is blue", 0.4),
            record("b", "the sky is blue", 0.4),
        ];
        let actions = consolidate(&records, 0.7, Utc::now());
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ConsolidationAction::Linked { .. }));
    }

    #[test]
    fn large_low_importance_cluster_is_summarized() {
        let records = vec![
            record("a", "note about x", 0.2),
            record("b", "note about x", 0.2),
            record("c", "note about x", 0.2),
        ];
        let actions = consolidate(&records, 0.5, Utc::now());
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ConsolidationAction::Summarized { .. }));
    }

    #[test]
    fn large_high_importance_cluster_is_hybrid() {
        let records = vec![
            record("a", "critical procedure", 0.8),
            record("b", "critical procedure", 0.8),
            record("c", "critical procedure", 0.8),
        ];
        let actions = consolidate(&records, 0.5, Utc::now());
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ConsolidationAction::Hybrid { preserved, .. } => assert_eq!(preserved.len(), 3),
            other => panic!("expected Hybrid, got {other:?}"),
        }
    }

    #[test]
    fn dissimilar_records_do_not_cluster() {
        let records = vec![record("a", "alpha", 0.5), record("b", "zzz totally different", 0.5)];
        let actions = consolidate(&records, 0.9, Utc::now());
        assert!(actions.is_empty());
    }
}
