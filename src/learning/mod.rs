//! Learning probabilistic automata from traffic samples.
//!
//! Two pipelines are exposed: [`learn_pa`] runs Alergia over a
//! suffix-minimized frequency prefix tree and normalizes the result, while
//! [`learn_pta`] skips the merging phase and normalizes the minimized tree
//! directly. [`learn_golden_map`] applies either pipeline across all
//! communication pairs of a capture, in parallel.

pub mod alergia;
pub mod ffa;
pub mod fpt;

pub use alergia::{alergia, stochastic_merge};
pub use ffa::{FreqTransition, FrequencyAutomaton, StateId};
pub use fpt::PrefixTree;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::detection::{ComPair, GoldenMap};
use crate::wfa::{SymbolKey, WeightedAutomaton};

/// Errors from the learning pipelines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LearnError {
    #[error("cannot learn from an empty training sample")]
    EmptyTraining,

    #[error("alpha must lie in (0, 1), got {0}")]
    InvalidAlpha(f64),
}

/// Parameters of the Alergia pipelines.
///
/// `t0` defaults to `max(1, floor(log2(n)))` for a training sample of `n`
/// strings when left unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    pub alpha: f64,
    pub t0: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            t0: None,
        }
    }
}

impl LearningConfig {
    fn validate(&self) -> Result<(), LearnError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(LearnError::InvalidAlpha(self.alpha));
        }
        Ok(())
    }

    fn effective_t0(&self, sample_size: usize) -> u64 {
        self.t0
            .unwrap_or_else(|| ((sample_size as f64).log2().floor() as u64).max(1))
    }
}

fn minimized_tree<A: SymbolKey, W: AsRef<[A]>>(training: &[W]) -> PrefixTree<A> {
    let mut tree = PrefixTree::new();
    tree.add_strings(training);
    tree.suffix_minimize();
    tree
}

/// Learn a probabilistic automaton: prefix tree, suffix minimization,
/// Alergia merging, normalization.
pub fn learn_pa<A: SymbolKey, W: AsRef<[A]>>(
    training: &[W],
    config: &LearningConfig,
) -> Result<WeightedAutomaton<usize, A>, LearnError> {
    config.validate()?;
    if training.is_empty() {
        return Err(LearnError::EmptyTraining);
    }
    let t0 = config.effective_t0(training.len());
    let tree = minimized_tree(training);
    let learned = alergia(tree, config.alpha, t0);
    info!(
        samples = training.len(),
        states = learned.state_count(),
        t0,
        "learned probabilistic automaton"
    );
    Ok(learned.normalize())
}

/// Learn a prefix tree acceptor: the suffix-minimized tree normalized
/// as-is, with no statistical merging.
pub fn learn_pta<A: SymbolKey, W: AsRef<[A]>>(
    training: &[W],
    config: &LearningConfig,
) -> Result<WeightedAutomaton<usize, A>, LearnError> {
    config.validate()?;
    if training.is_empty() {
        return Err(LearnError::EmptyTraining);
    }
    let tree = minimized_tree(training);
    info!(
        samples = training.len(),
        states = tree.automaton().state_count(),
        "learned prefix tree acceptor"
    );
    Ok(tree.into_automaton().normalize())
}

/// Training material of one communication pair: one sample of conversations
/// per smoothing window.
#[derive(Debug, Clone)]
pub struct PairTraining<A> {
    pub pair: ComPair,
    pub windows: Vec<Vec<Vec<A>>>,
}

/// Learn the golden models of every communication pair, in parallel. A
/// window with no conversations yields `None` for that slot so detection can
/// fall back to its degenerate scoring.
pub fn learn_golden_map<A: SymbolKey + Send + Sync>(
    training: &[PairTraining<A>],
    config: &LearningConfig,
) -> Result<GoldenMap<A>, LearnError> {
    config.validate()?;
    let entries: Vec<(ComPair, Vec<Option<WeightedAutomaton<usize, A>>>)> = training
        .par_iter()
        .map(|item| {
            let models = item
                .windows
                .iter()
                .map(|window| {
                    if window.is_empty() {
                        warn!(pair = %item.pair, "no training conversations in window");
                        return None;
                    }
                    match learn_pa(window, config) {
                        Ok(model) => Some(model),
                        Err(err) => {
                            warn!(pair = %item.pair, %err, "learning failed for window");
                            None
                        }
                    }
                })
                .collect();
            (item.pair.clone(), models)
        })
        .collect();
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Endpoint;

    fn words(items: &[&str]) -> Vec<Vec<char>> {
        items.iter().map(|w| w.chars().collect()).collect()
    }

    #[test]
    fn default_t0_grows_with_sample_size() {
        let config = LearningConfig::default();
        assert_eq!(config.effective_t0(1), 1);
        assert_eq!(config.effective_t0(3), 1);
        assert_eq!(config.effective_t0(8), 3);
        assert_eq!(config.effective_t0(1000), 9);
    }

    #[test]
    fn explicit_t0_wins() {
        let config = LearningConfig {
            alpha: 0.05,
            t0: Some(7),
        };
        assert_eq!(config.effective_t0(1000), 7);
    }

    #[test]
    fn empty_training_is_an_error() {
        let empty: Vec<Vec<char>> = Vec::new();
        assert_eq!(
            learn_pa(&empty, &LearningConfig::default()),
            Err(LearnError::EmptyTraining)
        );
        assert_eq!(
            learn_pta(&empty, &LearningConfig::default()),
            Err(LearnError::EmptyTraining)
        );
    }

    #[test]
    fn alpha_is_validated() {
        let config = LearningConfig {
            alpha: 1.5,
            t0: None,
        };
        assert!(matches!(
            learn_pa(&words(&["ab"]), &config),
            Err(LearnError::InvalidAlpha(_))
        ));
    }

    #[test]
    fn pa_is_deterministic_and_scores_training() {
        let training = words(&["ab", "ab", "ac"]);
        let config = LearningConfig {
            alpha: 0.05,
            t0: Some(1),
        };
        let pa = learn_pa(&training, &config).unwrap();
        assert!(pa.is_deterministic());
        assert!(pa.string_prob_deterministic(&['a', 'b']).is_some());
        assert!(pa.string_prob_deterministic(&['z']).is_none());
    }

    #[test]
    fn pta_keeps_the_tree_shape() {
        let training = words(&["ab", "ab", "ac"]);
        let config = LearningConfig::default();
        let pta = learn_pta(&training, &config).unwrap();
        // minimized tree: root, interior, shared leaf
        assert_eq!(pta.state_count(), 3);
        let p_ab = pta.string_prob_deterministic(&['a', 'b']).unwrap();
        assert!((p_ab - (2.0f64 / 3.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn golden_map_marks_empty_windows() {
        let pair = ComPair::new(
            Endpoint::new("192.168.1.1", 2404),
            Endpoint::new("192.168.1.2", 50001),
        );
        let training = vec![PairTraining {
            pair: pair.clone(),
            windows: vec![words(&["ab", "ab", "ac"]), Vec::new()],
        }];
        let map = learn_golden_map(&training, &LearningConfig::default()).unwrap();
        let models = &map[&pair];
        assert_eq!(models.len(), 2);
        assert!(models[0].is_some());
        assert!(models[1].is_none());
    }
}
