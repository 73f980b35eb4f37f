//! Importance scoring and strength decay (spec §4.1 algorithms).

use crate::config::ImportanceWeights;
use chrono::{DateTime, Utc};

/// The four importance components at creation or reinforcement time, each
/// in [0,1]. `recency` is 1.0 at the moment of access and decays with time
/// elsewhere; callers pass the already-normalized recency for this
/// computation rather than a raw timestamp.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceInputs {
    pub recency: f64,
    pub frequency: f64,
    pub salience: f64,
    pub relevance: f64,
}

impl ImportanceInputs {
    /// Inputs for a brand-new record: full recency, zero frequency, and
    /// caller-provided or default salience/relevance.
    pub fn at_creation(salience: Option<f64>, relevance: Option<f64>) -> Self {
        Self {
            recency: 1.0,
            frequency: 0.0,
            salience: salience.unwrap_or(0.5),
            relevance: relevance.unwrap_or(0.5),
        }
    }
}

/// Weighted sum of the four components, clamped to [0,1].
pub fn compute_importance(weights: &ImportanceWeights, inputs: ImportanceInputs) -> f64 {
    let raw = weights.recency * inputs.recency
        + weights.frequency * inputs.frequency
        + weights.salience * inputs.salience
        + weights.relevance * inputs.relevance;
    raw.clamp(0.0, 1.0)
}

/// Frequency component derived from access count using a saturating curve
/// so repeated access raises importance but cannot by itself exceed 1.0.
pub fn frequency_component(access_count: u64) -> f64 {
    1.0 - (1.0 / (1.0 + access_count as f64 / 5.0))
}

/// Recency component derived from hours since last access; 1.0 at zero
/// elapsed time, decaying toward 0 as time passes.
pub fn recency_component(hours_since_access: f64) -> f64 {
    (-hours_since_access / 168.0).exp().clamp(0.0, 1.0)
}

/// Decay applied by maintenance: `strength ← strength · exp(−λ·Δt) · (1 − importance)²`.
pub fn decay_strength(strength: f64, lambda: f64, delta_hours: f64, importance: f64) -> f64 {
    let decayed = strength * (-lambda * delta_hours).exp() * (1.0 - importance).powi(2);
    decayed.clamp(0.0, 1.0)
}

pub fn hours_since(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_seconds().max(0) as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one_and_clamp() {
        let weights = ImportanceWeights::default();
        let inputs = ImportanceInputs {
            recency: 1.0,
            frequency: 1.0,
            salience: 1.0,
            relevance: 1.0,
        };
        assert!((compute_importance(&weights, inputs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn creation_inputs_have_zero_frequency() {
        let inputs = ImportanceInputs::at_creation(None, None);
        assert_eq!(inputs.frequency, 0.0);
        assert_eq!(inputs.salience, 0.5);
    }

    #[test]
    fn decay_reduces_strength_over_time() {
        let s1 = decay_strength(1.0, 0.05, 24.0, 0.2);
        let s2 = decay_strength(1.0, 0.05, 240.0, 0.2);
        assert!(s2 < s1);
        assert!(s1 < 1.0);
    }

    #[test]
    fn high_importance_resists_decay() {
        let low_importance = decay_strength(1.0, 0.05, 100.0, 0.1);
        let high_importance = decay_strength(1.0, 0.05, 100.0, 0.9);
        assert!(high_importance > low_importance);
    }

    #[test]
    fn frequency_component_saturates_below_one() {
        assert!(frequency_component(1000) < 1.0);
        assert!(frequency_component(50) > frequency_component(5));
    }
}
