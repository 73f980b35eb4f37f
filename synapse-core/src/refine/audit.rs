//! Self-audit evaluation (spec §4.4 steps 2b-2d): checking a `SelfAudit`
//! against the configured thresholds, with safety as a hard gate, and
//! turning failed dimensions into structured feedback.

use super::types::{DimensionScore, Feedback, SelfAudit};
use crate::config::RefinementConfig;

/// Whether every dimension of `audit` clears its threshold. Safety is
/// checked independently by [`safety_failed`] since it aborts the loop
/// rather than merely failing the iteration.
pub fn meets_thresholds(audit: &SelfAudit, config: &RefinementConfig) -> bool {
    audit.correctness.score >= config.threshold_correctness
        && audit.efficiency.score >= config.threshold_efficiency
        && audit.safety.score >= config.threshold_safety
        && audit.evidence_alignment.score >= config.threshold_evidence_alignment
        && audit.artifact_quality.score >= config.threshold_artifact_quality
}

pub fn safety_failed(audit: &SelfAudit, config: &RefinementConfig) -> bool {
    audit.safety.score < config.threshold_safety
}

/// Turn every dimension below its threshold into a structured critique
/// (spec §4.4 step 2d). Skips `safety`: a safety failure aborts the loop
/// before feedback would matter.
pub fn extract_feedback(audit: &SelfAudit, config: &RefinementConfig) -> Vec<Feedback> {
    let mut feedback = Vec::new();
    push_if_failed(
        &mut feedback,
        "correctness",
        &audit.correctness,
        config.threshold_correctness,
        "re-derive the result and check it against the stated success criteria",
    );
    push_if_failed(
        &mut feedback,
        "efficiency",
        &audit.efficiency,
        config.threshold_efficiency,
        "reduce redundant work or tighten the resource budget",
    );
    push_if_failed(
        &mut feedback,
        "evidence_alignment",
        &audit.evidence_alignment,
        config.threshold_evidence_alignment,
        "cite the specific observation that supports each claim",
    );
    push_if_failed(
        &mut feedback,
        "artifact_quality",
        &audit.artifact_quality,
        config.threshold_artifact_quality,
        "clean up the produced artifact before the next attempt",
    );
    feedback
}

fn push_if_failed(
    out: &mut Vec<Feedback>,
    dimension: &str,
    dim: &DimensionScore,
    threshold: f64,
    suggestion: &str,
) {
    if dim.score < threshold {
        out.push(Feedback {
            dimension: dimension.to_string(),
            what_failed: format!(
                "{dimension} scored {:.2}, below the {threshold:.2} threshold",
                dim.score
            ),
            suggestion: suggestion.to_string(),
            step_reference: dim.justification.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing_audit() -> SelfAudit {
        SelfAudit {
            correctness: DimensionScore::justified(0.9, "matches spec"),
            efficiency: DimensionScore::justified(0.7, "single pass"),
            safety: DimensionScore::justified(1.0, "no violations observed"),
            evidence_alignment: DimensionScore::justified(0.8, "cites step 2"),
            artifact_quality: DimensionScore::justified(0.8, "clean output"),
        }
    }

    #[test]
    fn passing_audit_meets_default_thresholds() {
        assert!(meets_thresholds(&passing_audit(), &RefinementConfig::default()));
    }

    #[test]
    fn low_safety_is_a_hard_gate() {
        let mut audit = passing_audit();
        audit.safety = DimensionScore::justified(0.5, "missed a check");
        let config = RefinementConfig::default();
        assert!(safety_failed(&audit, &config));
        assert!(!meets_thresholds(&audit, &config));
    }

    #[test]
    fn failed_dimensions_produce_feedback() {
        let mut audit = passing_audit();
        audit.correctness = DimensionScore::justified(0.3, "missed an edge case");
        let feedback = extract_feedback(&audit, &RefinementConfig::default());
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].dimension, "correctness");
    }

    #[test]
    fn unjustified_score_clamps_to_half() {
        let dim = DimensionScore::unjustified();
        assert_eq!(dim.score, 0.5);
        assert!(dim.clamped);
    }
}
