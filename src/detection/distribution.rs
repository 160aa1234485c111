//! Distribution-comparison detection.
//!
//! A test automaton is learned from the window with the same pipeline that
//! produced the golden models, and compared against each candidate via a
//! pseudo-Euclidean distance over total language weights of product
//! automata. Scores live in `[0, 1]`; 0 is a perfect match.

use std::collections::HashSet;

use tracing::warn;

use crate::detection::{AnomalyDetector, ComPair, GoldenMap, Window};
use crate::distance::DistanceReducer;
use crate::learning::{learn_pa, LearningConfig};
use crate::wfa::matrix::{MatrixError, DEFAULT_CLOSURE_ITERATIONS};
use crate::wfa::{ClosureMode, MatrixForm, MatrixWfa, SymbolKey, WeightedAutomaton};

/// Total language weight of `x * y`, trimmed and renamed first.
fn product_weight<A: SymbolKey>(
    x: &WeightedAutomaton<usize, A>,
    y: &WeightedAutomaton<usize, A>,
    mode: ClosureMode,
    form: MatrixForm,
    iterations: usize,
) -> Result<f64, MatrixError> {
    let (product, _) = x.product(y).trim().rename_states();
    let matrix = MatrixWfa::from_automaton(&product)?;
    matrix.language_weight(mode, form, iterations)
}

fn distance_terms<A: SymbolKey>(
    a: &WeightedAutomaton<usize, A>,
    b: &WeightedAutomaton<usize, A>,
    mode: ClosureMode,
    form: MatrixForm,
    iterations: usize,
) -> Result<f64, MatrixError> {
    let waa = product_weight(a, a, mode, form, iterations)?;
    let wab = product_weight(a, b, mode, form, iterations)?;
    let wbb = product_weight(b, b, mode, form, iterations)?;
    let squared = (waa - 2.0 * wab + wbb).max(0.0);
    Ok(squared.sqrt().min(1.0))
}

/// Pseudo-Euclidean distance between two automata, clamped to `[0, 1]`.
///
/// When exactly one automaton has no transitions at all the distance is
/// maximal. Closure by exact inversion comes first; a singular `I - T` is
/// retried with swapped operands using the truncated iterative closure on
/// the sparse representation, and if that fails too the distance degrades
/// to 1.0.
pub fn euclid_distance<A: SymbolKey>(
    a: &WeightedAutomaton<usize, A>,
    b: &WeightedAutomaton<usize, A>,
) -> f64 {
    if a.transitions().is_empty() != b.transitions().is_empty() {
        return 1.0;
    }
    match distance_terms(a, b, ClosureMode::Inverse, MatrixForm::Dense, 0) {
        Ok(d) => d,
        Err(first) => {
            warn!(%first, "closure by inversion failed, retrying iteratively");
            match distance_terms(
                b,
                a,
                ClosureMode::Iterations,
                MatrixForm::Sparse,
                DEFAULT_CLOSURE_ITERATIONS,
            ) {
                Ok(d) => d,
                Err(second) => {
                    warn!(%second, "distance computation failed, scoring maximal");
                    1.0
                }
            }
        }
    }
}

/// Detector comparing the window's learned distribution against the golden
/// models of its communication pair.
#[derive(Debug, Clone)]
pub struct DistributionDetector<A> {
    golden: GoldenMap<A>,
    config: LearningConfig,
}

impl<A: SymbolKey> DistributionDetector<A> {
    pub fn new(golden: GoldenMap<A>, config: LearningConfig) -> Self {
        Self { golden, config }
    }

    pub fn golden(&self) -> &GoldenMap<A> {
        &self.golden
    }

    /// Drop structurally identical models from each pair's list, keeping
    /// the first occurrence. Runs before detection, never during.
    pub fn remove_identical(&mut self) {
        for models in self.golden.values_mut() {
            let mut seen: Vec<Option<WeightedAutomaton<usize, A>>> = Vec::new();
            models.retain(|model| {
                if seen.contains(model) {
                    false
                } else {
                    seen.push(model.clone());
                    true
                }
            });
        }
    }

    /// Prune near-duplicate models per pair with the greedy distance
    /// reducer; `None` slots are left alone.
    pub fn remove_euclid_similar(&mut self, max_error: f64) {
        for models in self.golden.values_mut() {
            let present: Vec<usize> = models
                .iter()
                .enumerate()
                .filter(|(_, m)| m.is_some())
                .map(|(i, _)| i)
                .collect();
            if present.len() < 2 {
                continue;
            }
            let reducer = DistanceReducer::from_fn(present.len(), |i, j| {
                match (&models[present[i]], &models[present[j]]) {
                    (Some(a), Some(b)) => euclid_distance(a, b),
                    _ => 1.0,
                }
            });
            let reduction = reducer.compute_subset_error(max_error);
            let removed: HashSet<usize> = reduction.removed.iter().map(|k| present[*k]).collect();
            let mut index = 0;
            models.retain(|_| {
                let drop = removed.contains(&index);
                index += 1;
                !drop
            });
        }
    }

    /// Learn the window's test automaton. `None` for an empty window or when
    /// learning fails.
    fn learn_window(&self, window: &Window<A>, pair: &ComPair) -> Option<WeightedAutomaton<usize, A>> {
        if window.is_empty() {
            return None;
        }
        match learn_pa(window, &self.config) {
            Ok(test) => Some(test),
            Err(err) => {
                warn!(%pair, %err, "learning the test window failed");
                None
            }
        }
    }

    fn score_model(
        model: Option<&WeightedAutomaton<usize, A>>,
        test: Option<&WeightedAutomaton<usize, A>>,
        window: &Window<A>,
    ) -> f64 {
        match (model, test) {
            (None, _) if window.is_empty() => 0.0,
            (None, _) => 1.0,
            (Some(model), _) if window.is_empty() => {
                if model.transitions().len() > 1 {
                    1.0
                } else {
                    0.0
                }
            }
            (Some(model), Some(test)) => euclid_distance(model, test),
            (Some(_), None) => 1.0,
        }
    }
}

impl<A: SymbolKey> AnomalyDetector<A> for DistributionDetector<A> {
    type Verdict = f64;

    fn select_models(&self, pair: &ComPair) -> Vec<Option<WeightedAutomaton<usize, A>>> {
        self.golden.get(pair).cloned().unwrap_or_default()
    }

    fn apply(
        &self,
        model: Option<&WeightedAutomaton<usize, A>>,
        window: &Window<A>,
        pair: &ComPair,
    ) -> f64 {
        let test = self.learn_window(window, pair);
        Self::score_model(model, test.as_ref(), window)
    }

    fn verdict_score(verdict: &f64) -> f64 {
        *verdict
    }

    /// Learns the window's test automaton once and scores every candidate
    /// model against it, instead of relearning per model.
    fn detect(&self, pair: &ComPair, window: &Window<A>, accelerate: Option<f64>) -> Vec<f64> {
        let test = self.learn_window(window, pair);
        let mut verdicts = Vec::new();
        for model in self.select_models(pair) {
            let verdict = Self::score_model(model.as_ref(), test.as_ref(), window);
            verdicts.push(verdict);
            if let Some(threshold) = accelerate {
                if verdict <= threshold {
                    break;
                }
            }
        }
        verdicts
    }
}
