//! Ranking quality metrics.

use std::collections::HashSet;

/// Average precision of the first `k` ranked ids against a relevant set.
///
/// Normalized by `min(|relevant|, k)`, so a ranking that starts with `k`
/// relevant songs scores 1. An empty relevant set scores 0.
#[must_use]
pub fn average_precision_at_k(ranked: &[&str], relevant: &HashSet<&str>, k: usize) -> f64 {
    let denominator = relevant.len().min(k);
    if denominator == 0 {
        return 0.0;
    }

    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (rank, id) in ranked.iter().take(k).enumerate() {
        if relevant.contains(id) {
            hits += 1;
            precision_sum += hits as f64 / (rank + 1) as f64;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let denominator = denominator as f64;
    precision_sum / denominator
}

/// Share of the relevant set found in the first `k` ranked ids.
#[must_use]
pub fn recall_at_k(ranked: &[&str], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = ranked.iter().take(k).filter(|id| relevant.contains(*id)).count();

    #[allow(clippy::cast_precision_loss)]
    let recall = hits as f64 / relevant.len() as f64;
    recall
}

/// Arithmetic mean, 0 for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f64;
    values.iter().sum::<f64>() / count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set<'a>(ids: &[&'a str]) -> HashSet<&'a str> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_perfect_ranking_scores_one() {
        let relevant = set(&["a", "b", "c"]);
        let ranked = ["a", "b", "c", "x"];
        assert!((average_precision_at_k(&ranked, &relevant, 3) - 1.0).abs() < 1e-12);
        assert!((recall_at_k(&ranked, &relevant, 3) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_precision_known_value() {
        // Hits at ranks 1 and 3: (1/1 + 2/3) / min(2, 4)
        let relevant = set(&["a", "b"]);
        let ranked = ["a", "x", "b", "y"];
        let ap = average_precision_at_k(&ranked, &relevant, 4);
        assert!((ap - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cutoff_ignores_late_hits() {
        let relevant = set(&["b"]);
        let ranked = ["x", "y", "b"];
        assert_eq!(average_precision_at_k(&ranked, &relevant, 2), 0.0);
        assert_eq!(recall_at_k(&ranked, &relevant, 2), 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(average_precision_at_k(&["a"], &HashSet::new(), 5), 0.0);
        assert_eq!(recall_at_k(&[], &set(&["a"]), 5), 0.0);
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[0.5, 1.0]) - 0.75).abs() < 1e-12);
    }
}
