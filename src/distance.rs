//! Greedy pruning of near-duplicate models by pairwise distance.
//!
//! Works on item indices against a symmetric distance table; callers map the
//! surviving indices back onto their model lists. The table is transient and
//! never persisted.

use std::collections::BTreeSet;

use tracing::debug;

/// Outcome of a pruning pass. `error_bound` is `None` when nothing was
/// removed, which orders below every actual bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub kept: Vec<usize>,
    pub removed: Vec<usize>,
    pub error_bound: Option<f64>,
}

/// Symmetric pairwise distances over a finite item set.
#[derive(Debug, Clone)]
pub struct DistanceReducer {
    size: usize,
    table: Vec<Vec<f64>>,
}

impl DistanceReducer {
    /// Build the table by evaluating `dist` on every unordered index pair.
    /// `dist` is assumed symmetric; only `i < j` pairs are evaluated.
    pub fn from_fn<F: FnMut(usize, usize) -> f64>(size: usize, mut dist: F) -> Self {
        let mut table = vec![vec![0.0; size]; size];
        for i in 0..size {
            for j in (i + 1)..size {
                let d = dist(i, j);
                table[i][j] = d;
                table[j][i] = d;
            }
        }
        Self { size, table }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.table[i][j]
    }

    /// Greedily remove items in non-decreasing pair-distance order. A pair
    /// is skipped only when both endpoints are already gone; otherwise the
    /// not-yet-removed endpoint (the first one when both are free) is
    /// tentatively removed, kept only while the error bound of the removed
    /// set (the maximum over removed items of the smallest distance to a
    /// survivor) stays within `max_error`. The first rejected removal stops
    /// the scan: pairs are sorted, so every later pair could only push the
    /// bound higher.
    pub fn compute_subset_error(&self, max_error: f64) -> Reduction {
        let mut pairs: Vec<(usize, usize)> = (0..self.size)
            .flat_map(|i| ((i + 1)..self.size).map(move |j| (i, j)))
            .collect();
        pairs.sort_by(|a, b| {
            self.table[a.0][a.1]
                .partial_cmp(&self.table[b.0][b.1])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut removed: BTreeSet<usize> = BTreeSet::new();
        let mut bound: Option<f64> = None;
        for (i, j) in pairs {
            if removed.contains(&i) && removed.contains(&j) {
                continue;
            }
            let candidate = if !removed.contains(&i) { i } else { j };
            removed.insert(candidate);
            let tentative = self.removal_bound(&removed);
            if tentative <= max_error {
                debug!(item = candidate, bound = tentative, "pruned near-duplicate");
                bound = Some(tentative);
            } else {
                removed.remove(&candidate);
                break;
            }
        }

        Reduction {
            kept: (0..self.size).filter(|i| !removed.contains(i)).collect(),
            removed: removed.into_iter().collect(),
            error_bound: bound,
        }
    }

    /// Max over removed items of the min distance to any survivor. An item
    /// with no survivor left at all counts as the maximal distance 1.0.
    fn removal_bound(&self, removed: &BTreeSet<usize>) -> f64 {
        let mut worst = 0.0f64;
        for r in removed {
            let nearest = (0..self.size)
                .filter(|s| !removed.contains(s))
                .map(|s| self.table[*r][s])
                .fold(f64::INFINITY, f64::min);
            let nearest = if nearest.is_finite() { nearest } else { 1.0 };
            worst = worst.max(nearest);
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_reducer(points: &[f64]) -> DistanceReducer {
        DistanceReducer::from_fn(points.len(), |i, j| (points[i] - points[j]).abs())
    }

    #[test]
    fn removes_the_near_duplicate_only() {
        let reducer = line_reducer(&[0.0, 0.05, 1.0]);
        let result = reducer.compute_subset_error(0.1);
        assert_eq!(result.removed, vec![0]);
        assert_eq!(result.kept, vec![1, 2]);
        assert!((result.error_bound.unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn no_removal_yields_sentinel() {
        let reducer = line_reducer(&[0.0, 0.5, 1.0]);
        let result = reducer.compute_subset_error(0.1);
        assert_eq!(result.error_bound, None);
        assert_eq!(result.kept, vec![0, 1, 2]);
        assert!(result.removed.is_empty());
    }

    #[test]
    fn bound_never_exceeds_max_error() {
        let points = [0.0, 0.02, 0.04, 0.5, 0.52, 1.0];
        let reducer = line_reducer(&points);
        for max_error in [0.01, 0.05, 0.1, 0.6] {
            let result = reducer.compute_subset_error(max_error);
            if let Some(bound) = result.error_bound {
                assert!(bound <= max_error);
            }
        }
    }

    #[test]
    fn stops_at_first_rejection() {
        // after 2 and 0 go, losing 1 would leave 0 represented only at
        // distance 1.04
        let reducer = line_reducer(&[0.0, 0.05, 1.0, 1.04]);
        let result = reducer.compute_subset_error(0.1);
        assert_eq!(result.removed, vec![0, 2]);
        assert_eq!(result.kept, vec![1, 3]);
    }

    #[test]
    fn chain_removal_stays_anchored_to_a_survivor() {
        // equally spaced chain: removing 0 is fine (0.05 to survivor 1),
        // but removing 1 as well would push 0's nearest survivor to 0.10
        let reducer = line_reducer(&[0.0, 0.05, 0.10, 0.15]);
        let result = reducer.compute_subset_error(0.07);
        assert_eq!(result.removed, vec![0]);
        assert_eq!(result.kept, vec![1, 2, 3]);
        assert!((result.error_bound.unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn single_item_is_untouched() {
        let reducer = line_reducer(&[0.42]);
        let result = reducer.compute_subset_error(0.5);
        assert_eq!(result.kept, vec![0]);
        assert_eq!(result.error_bound, None);
    }
}
