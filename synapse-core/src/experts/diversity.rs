//! Diversity classing and soft scoring (spec §4.3 steps 2-3): expert outputs
//! whose pairwise distance falls below the duplicate threshold are folded
//! into one equivalence class, and each expert's raw score is demoted in
//! proportion to how large its class is.

use super::types::ExpertResult;
use crate::distance::output_distance;

/// `experts[i]`'s assigned class, plus each class's effective (post-penalty)
/// score contribution from member `i`.
pub struct Classification {
    pub class_of: Vec<usize>,
    pub effective_scores: Vec<f64>,
    pub diversity_score: f64,
}

/// Assign each expert result to an equivalence class by greedily joining the
/// first existing class whose representative (the class's first member) is
/// within `duplicate_threshold` distance, in expert order — deterministic
/// for a fixed input order. Then apply the soft-scoring penalty:
/// `effective = raw * (1 - penalty * (classSize - 1) / N)`.
pub fn classify(
    results: &[ExpertResult],
    embeddings: &[Option<Vec<f32>>],
    duplicate_threshold: f64,
    duplicate_penalty: f64,
) -> Classification {
    let n = results.len();
    let mut class_of = vec![usize::MAX; n];
    let mut representatives: Vec<usize> = Vec::new();

    for i in 0..n {
        let mut joined = None;
        for &rep in &representatives {
            let distance = output_distance(
                embeddings[i].as_deref(),
                embeddings[rep].as_deref(),
                &results[i].output.to_string(),
                &results[rep].output.to_string(),
            );
            if distance < duplicate_threshold {
                joined = Some(class_of[rep]);
                break;
            }
        }
        match joined {
            Some(class_id) => class_of[i] = class_id,
            None => {
                class_of[i] = representatives.len();
                representatives.push(i);
            }
        }
    }

    let num_classes = representatives.len();
    let mut class_sizes = vec![0usize; num_classes];
    for &c in &class_of {
        class_sizes[c] += 1;
    }

    let effective_scores: Vec<f64> = results
        .iter()
        .zip(&class_of)
        .map(|(r, &c)| {
            let size = class_sizes[c] as f64;
            let n = n.max(1) as f64;
            r.score * (1.0 - duplicate_penalty * (size - 1.0) / n)
        })
        .collect();

    let diversity_score = mean_pairwise_distance(results, embeddings);

    Classification {
        class_of,
        effective_scores,
        diversity_score,
    }
}

/// Mean pairwise semantic distance across all expert pairs (spec §4.3's
/// "diversity score" definition). Zero for N<2, by convention matching the
/// N=1 collapse (spec §9 open question #2).
fn mean_pairwise_distance(results: &[ExpertResult], embeddings: &[Option<Vec<f32>>]) -> f64 {
    let n = results.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += output_distance(
                embeddings[i].as_deref(),
                embeddings[j].as_deref(),
                &results[i].output.to_string(),
                &results[j].output.to_string(),
            );
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str, score: f64, output: serde_json::Value) -> ExpertResult {
        ExpertResult {
            expert_id: id.into(),
            output,
            score,
            confidence: 0.8,
            tokens_in: 0,
            tokens_out: 0,
            latency_ms: 0,
            iterations: 1,
        }
    }

    #[test]
    fn identical_outputs_join_one_class() {
        let results = vec![
            result("a", 80.0, json!("same")),
            result("b", 75.0, json!("same")),
        ];
        let embeddings = vec![None, None];
        let classification = classify(&results, &embeddings, 0.15, 0.3);
        assert_eq!(classification.class_of[0], classification.class_of[1]);
        // Both members of a size-2 class get demoted.
        assert!(classification.effective_scores[0] < 80.0);
    }

    #[test]
    fn distinct_outputs_get_separate_classes() {
        let results = vec![
            result("a", 80.0, json!("alpha approach")),
            result("b", 75.0, json!("totally different beta approach")),
        ];
        let embeddings = vec![None, None];
        let classification = classify(&results, &embeddings, 0.15, 0.3);
        assert_ne!(classification.class_of[0], classification.class_of[1]);
        assert_eq!(classification.effective_scores[0], 80.0);
    }

    #[test]
    fn single_expert_has_zero_diversity() {
        let results = vec![result("a", 80.0, json!("solo"))];
        let embeddings = vec![None];
        let classification = classify(&results, &embeddings, 0.15, 0.3);
        assert_eq!(classification.diversity_score, 0.0);
    }
}
