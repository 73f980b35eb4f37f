//! Spaced repetition scheduling for procedural records marked for review
//! (spec §4.1): intervals of 1 day, 6 days, then `interval · easiness`
//! where `easiness = 1.3 + importance · 1.7`, clamped to [1.3, 3.0].

use super::types::{MemoryRecord, MemoryType};
use chrono::{DateTime, Duration as ChronoDuration, Utc};

const FIRST_INTERVAL_DAYS: f64 = 1.0;
const SECOND_INTERVAL_DAYS: f64 = 6.0;

pub fn easiness(importance: f64) -> f64 {
    (1.3 + importance * 1.7).clamp(1.3, 3.0)
}

fn next_interval_days(review_count: u32, previous_interval_days: Option<f64>, importance: f64) -> f64 {
    match review_count {
        0 => FIRST_INTERVAL_DAYS,
        1 => SECOND_INTERVAL_DAYS,
        _ => previous_interval_days.unwrap_or(SECOND_INTERVAL_DAYS) * easiness(importance),
    }
}

/// Whether `record` is eligible for spaced-repetition scheduling at all.
pub fn is_scheduled(record: &MemoryRecord) -> bool {
    record.memory_type == MemoryType::Procedural && record.tags.iter().any(|t| t == "spaced_repetition")
}

/// If `record` is due for review, advance its schedule in place and return
/// `true`. A record with no schedule yet is due immediately (first review).
pub fn review_if_due(record: &mut MemoryRecord, now: DateTime<Utc>) -> bool {
    if !is_scheduled(record) {
        return false;
    }
    let due = match record.next_review_at {
        Some(next) => now >= next,
        None => true,
    };
    if !due {
        return false;
    }

    let interval = next_interval_days(record.review_count, record.review_interval_days, record.importance);
    record.next_review_at = Some(now + ChronoDuration::seconds((interval * 86_400.0) as i64));
    record.review_interval_days = Some(interval);
    record.review_count += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{RecordState, Tier};
    use serde_json::json;

    fn procedural(importance: f64) -> MemoryRecord {
        MemoryRecord {
            id: "p1".into(),
            memory_type: MemoryType::Procedural,
            content: json!("procedure"),
            importance,
            tags: vec!["spaced_repetition".into()],
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
    fn first_three_intervals_follow_the_schedule() {
        let mut record = procedural(0.5);
        let now = Utc::now();

        assert!(review_if_due(&mut record, now));
        assert_eq!(record.review_interval_days, Some(1.0));

        assert!(review_if_due(&mut record, now));
        assert_eq!(record.review_interval_days, Some(6.0));

        assert!(review_if_due(&mut record, now));
        let expected = 6.0 * easiness(0.5);
        assert!((record.review_interval_days.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn non_procedural_records_are_never_scheduled() {
        let mut record = procedural(0.5);
        record.memory_type = MemoryType::Semantic;
        assert!(!review_if_due(&mut record, Utc::now()));
    }

    #[test]
    fn easiness_is_clamped() {
        assert!((easiness(0.0) - 1.3).abs() < 1e-9);
        assert!((easiness(1.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn not_yet_due_review_is_skipped() {
        let mut record = procedural(0.5);
        let now = Utc::now();
        assert!(review_if_due(&mut record, now));
        // Immediately after scheduling, not yet due again.
        assert!(!review_if_due(&mut record, now));
    }
}
