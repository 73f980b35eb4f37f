//! Semantic/textual distance measures shared by the memory substrate's
//! consolidation pass and the multi-expert engine's diversity computation.

use std::collections::HashSet;

/// Cosine distance (`1 - cosine similarity`) between two embeddings, in
/// [0,2] but expected in [0,1] for normalized embeddings. Returns `1.0`
/// (maximally distant) if either vector is zero-length or the lengths
/// mismatch, rather than panicking on a malformed embedding.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 1.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let similarity = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - similarity
}

/// Jaccard distance over whitespace-tokenized, lowercased text. Fallback
/// used when embeddings are unavailable (spec §4.3).
pub fn jaccard_distance(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 1.0;
    }
    1.0 - (intersection as f64 / union as f64)
}

/// Distance between two pieces of output, preferring embeddings when both
/// sides have one, falling back to Jaccard on the textual rendering.
pub fn output_distance(
    embedding_a: Option<&[f32]>,
    embedding_b: Option<&[f32]>,
    text_a: &str,
    text_b: &str,
) -> f64 {
    match (embedding_a, embedding_b) {
        (Some(a), Some(b)) => cosine_distance(a, b),
        _ => jaccard_distance(text_a, text_b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v) < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_have_distance_one() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_text_has_zero_jaccard_distance() {
        assert_eq!(jaccard_distance("hello world", "hello world"), 0.0);
    }

    #[test]
    fn disjoint_text_has_full_jaccard_distance() {
        assert_eq!(jaccard_distance("alpha beta", "gamma delta"), 1.0);
    }

    #[test]
    fn output_distance_prefers_embeddings() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let d = output_distance(Some(&a), Some(&b), "completely", "different");
        assert!(d < 1e-9);
    }
}
