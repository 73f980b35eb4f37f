//! Voting strategies (spec §4.3 step 4) and the deterministic tie-break
//! (spec §4.3 step 5, §3.2's invariant).

use super::types::{ExpertResult, Vote, VotingStrategy};

pub struct Decision {
    pub winning_class: usize,
    pub agreement_level: f64,
    pub votes: Vec<Vote>,
}

const TIE_EPSILON: f64 = 1e-9;

pub fn decide(
    strategy: VotingStrategy,
    results: &[ExpertResult],
    class_of: &[usize],
    effective_scores: &[f64],
) -> Decision {
    let n = results.len();
    let num_classes = class_of.iter().copied().max().map(|m| m + 1).unwrap_or(0);

    let class_scores = match strategy {
        VotingStrategy::Majority | VotingStrategy::Weighted => {
            sum_per_class(class_of, effective_scores, num_classes)
        }
        VotingStrategy::Ranked => ranked_irv_scores(class_of, effective_scores, num_classes, n),
        VotingStrategy::Borda => borda_scores(class_of, effective_scores, num_classes, n),
    };

    let winning_class = argmax_with_tiebreak(&class_scores, results, class_of);
    let winning_size = class_of.iter().filter(|&&c| c == winning_class).count();
    let agreement_level = if n == 0 { 0.0 } else { winning_size as f64 / n as f64 };

    let total_weight: f64 = effective_scores.iter().sum::<f64>().max(f64::EPSILON);
    let votes = results
        .iter()
        .zip(class_of)
        .zip(effective_scores)
        .map(|((r, &c), &score)| Vote {
            expert_id: r.expert_id.clone(),
            class_id: c,
            weight: score / total_weight,
        })
        .collect();

    Decision {
        winning_class,
        agreement_level,
        votes,
    }
}

fn sum_per_class(class_of: &[usize], effective_scores: &[f64], num_classes: usize) -> Vec<f64> {
    let mut totals = vec![0.0; num_classes];
    for (&c, &score) in class_of.iter().zip(effective_scores) {
        totals[c] += score;
    }
    totals
}

/// Each expert's preference order over classes: its own class first, then
/// the rest ordered by class-average effective score descending (ties by
/// class id ascending, for determinism).
fn expert_ranking(
    expert_idx: usize,
    class_of: &[usize],
    effective_scores: &[f64],
    num_classes: usize,
) -> Vec<usize> {
    let own = class_of[expert_idx];
    let mut class_avg = vec![0.0; num_classes];
    let mut class_count = vec![0usize; num_classes];
    for (&c, &score) in class_of.iter().zip(effective_scores) {
        class_avg[c] += score;
        class_count[c] += 1;
    }
    for c in 0..num_classes {
        if class_count[c] > 0 {
            class_avg[c] /= class_count[c] as f64;
        }
    }

    let mut rest: Vec<usize> = (0..num_classes).filter(|&c| c != own).collect();
    rest.sort_by(|&a, &b| {
        class_avg[b]
            .partial_cmp(&class_avg[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut ranking = vec![own];
    ranking.extend(rest);
    ranking
}

/// Instant-runoff: eliminate the class with the fewest first-place votes
/// each round until one class holds a strict majority of first-place votes,
/// or only one class remains. Returns a per-class score where the winner's
/// entry is `n` (maximal) so `argmax_with_tiebreak` selects it.
fn ranked_irv_scores(
    class_of: &[usize],
    effective_scores: &[f64],
    num_classes: usize,
    n: usize,
) -> Vec<f64> {
    if num_classes == 0 {
        return Vec::new();
    }
    let rankings: Vec<Vec<usize>> = (0..n)
        .map(|i| expert_ranking(i, class_of, effective_scores, num_classes))
        .collect();

    let mut class_avg = vec![0.0; num_classes];
    let mut class_count = vec![0usize; num_classes];
    for (&c, &score) in class_of.iter().zip(effective_scores) {
        class_avg[c] += score;
        class_count[c] += 1;
    }
    for c in 0..num_classes {
        if class_count[c] > 0 {
            class_avg[c] /= class_count[c] as f64;
        }
    }

    let mut eliminated = vec![false; num_classes];
    let mut remaining = num_classes;
    let mut last_round_first_place = vec![0usize; num_classes];

    loop {
        let mut first_place = vec![0usize; num_classes];
        for ranking in &rankings {
            if let Some(&top) = ranking.iter().find(|&&c| !eliminated[c]) {
                first_place[top] += 1;
            }
        }
        last_round_first_place = first_place.clone();

        if remaining <= 1 {
            break;
        }
        let leader_votes = first_place.iter().copied().max().unwrap_or(0);
        if leader_votes * 2 > n {
            break;
        }

        // Eliminate the lowest vote-getter among classes still standing;
        // ties broken by lowest average effective score, then highest
        // class id, so a quality difference decides before an arbitrary
        // index does.
        let mut worst: Option<usize> = None;
        for c in 0..num_classes {
            if eliminated[c] {
                continue;
            }
            worst = Some(match worst {
                None => c,
                Some(w) if first_place[c] < first_place[w] => c,
                Some(w) if first_place[c] == first_place[w] && class_avg[c] < class_avg[w] => c,
                Some(w) if first_place[c] == first_place[w]
                    && class_avg[c] == class_avg[w]
                    && c > w =>
                {
                    c
                }
                Some(w) => w,
            });
        }
        if let Some(worst) = worst {
            eliminated[worst] = true;
            remaining -= 1;
        } else {
            break;
        }
    }

    last_round_first_place
        .into_iter()
        .map(|v| v as f64)
        .collect()
}

/// Borda count using the same per-expert rankings as instant-runoff:
/// `class score = Σ (numClasses - rank)`.
fn borda_scores(
    class_of: &[usize],
    effective_scores: &[f64],
    num_classes: usize,
    n: usize,
) -> Vec<f64> {
    if num_classes == 0 {
        return Vec::new();
    }
    let mut totals = vec![0.0; num_classes];
    for i in 0..n {
        let ranking = expert_ranking(i, class_of, effective_scores, num_classes);
        for (rank, &class) in ranking.iter().enumerate() {
            totals[class] += (num_classes - rank) as f64;
        }
    }
    totals
}

/// Argmax over `class_scores`, breaking ties deterministically by: the
/// highest single raw score among tied classes' members; then highest
/// confidence; then lowest `expertId` lexicographically (spec §4.3 step 5).
fn argmax_with_tiebreak(class_scores: &[f64], results: &[ExpertResult], class_of: &[usize]) -> usize {
    if class_scores.is_empty() {
        return 0;
    }
    let max = class_scores
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let tied: Vec<usize> = class_scores
        .iter()
        .enumerate()
        .filter(|(_, &s)| (s - max).abs() < TIE_EPSILON)
        .map(|(c, _)| c)
        .collect();

    if tied.len() == 1 {
        return tied[0];
    }

    let mut best: Option<(usize, f64, f64, &str)> = None;
    for (i, r) in results.iter().enumerate() {
        let c = class_of[i];
        if !tied.contains(&c) {
            continue;
        }
        let candidate = (c, r.score, r.confidence, r.expert_id.as_str());
        best = Some(match best {
            None => candidate,
            Some(b) => pick_better(b, candidate),
        });
    }
    best.map(|(c, ..)| c).unwrap_or(tied[0])
}

fn pick_better<'a>(
    a: (usize, f64, f64, &'a str),
    b: (usize, f64, f64, &'a str),
) -> (usize, f64, f64, &'a str) {
    if b.1 > a.1 {
        b
    } else if b.1 < a.1 {
        a
    } else if b.2 > a.2 {
        b
    } else if b.2 < a.2 {
        a
    } else if b.3 < a.3 {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str, score: f64, confidence: f64) -> ExpertResult {
        ExpertResult {
            expert_id: id.into(),
            output: json!(id),
            score,
            confidence,
            tokens_in: 0,
            tokens_out: 0,
            latency_ms: 0,
            iterations: 1,
        }
    }

    #[test]
    fn majority_tie_picks_highest_single_score() {
        // Classes {A,A} and {B,B} each sum to the same effective score, but
        // B contains the single highest raw score (85), matching spec §8
        // scenario 4.
        let results = vec![
            result("e1", 80.0, 0.9),
            result("e2", 75.0, 0.9),
            result("e3", 85.0, 0.9),
            result("e4", 80.0, 0.9),
        ];
        let class_of = vec![0, 0, 1, 1];
        let effective = vec![80.0, 75.0, 85.0, 80.0];
        let decision = decide(VotingStrategy::Majority, &results, &class_of, &effective);
        assert_eq!(decision.winning_class, 1);
        assert_eq!(decision.agreement_level, 0.5);
    }

    #[test]
    fn weighted_votes_sum_to_one() {
        let results = vec![result("e1", 80.0, 0.9), result("e2", 20.0, 0.5)];
        let class_of = vec![0, 1];
        let effective = vec![80.0, 20.0];
        let decision = decide(VotingStrategy::Weighted, &results, &class_of, &effective);
        let total: f64 = decision.votes.iter().map(|v| v.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn borda_rewards_broad_second_place_support() {
        let results = vec![
            result("e1", 90.0, 0.9),
            result("e2", 10.0, 0.9),
            result("e3", 85.0, 0.9),
        ];
        // e1 alone in class 0, e2 alone in class 1, e3 alone in class 2.
        let class_of = vec![0, 1, 2];
        let effective = vec![90.0, 10.0, 85.0];
        let decision = decide(VotingStrategy::Borda, &results, &class_of, &effective);
        // Borda uses rank-by-average, so the highest scorer's own class
        // always nets the top rank contribution from itself; with three
        // singleton classes the top raw scorer should still win.
        assert_eq!(decision.winning_class, 0);
    }

    #[test]
    fn zero_score_expert_never_wins_against_a_positive_score() {
        let results = vec![result("e1", 0.0, 0.0), result("e2", 60.0, 0.7)];
        let class_of = vec![0, 1];
        let effective = vec![0.0, 60.0];
        for strategy in [
            VotingStrategy::Majority,
            VotingStrategy::Weighted,
            VotingStrategy::Ranked,
            VotingStrategy::Borda,
        ] {
            let decision = decide(strategy, &results, &class_of, &effective);
            assert_eq!(decision.winning_class, 1, "{strategy:?} picked the zero-score expert");
        }
    }
}
