//! Membership-based detection.
//!
//! Every conversation of the window is tested for acceptance under the
//! deterministic golden automaton; the verdict is the list of rejected
//! conversations, not a numeric score.

use crate::detection::{AnomalyDetector, ComPair, GoldenMap, Window};
use crate::wfa::{SymbolKey, WeightedAutomaton};

/// Detector flagging conversations the golden model rejects outright.
#[derive(Debug, Clone)]
pub struct MembershipDetector<A> {
    golden: GoldenMap<A>,
}

impl<A: SymbolKey> MembershipDetector<A> {
    pub fn new(golden: GoldenMap<A>) -> Self {
        Self { golden }
    }

    pub fn golden(&self) -> &GoldenMap<A> {
        &self.golden
    }
}

impl<A: SymbolKey> AnomalyDetector<A> for MembershipDetector<A> {
    /// The rejected conversations of the window.
    type Verdict = Vec<Vec<A>>;

    fn select_models(&self, pair: &ComPair) -> Vec<Option<WeightedAutomaton<usize, A>>> {
        self.golden.get(pair).cloned().unwrap_or_default()
    }

    /// An empty window has no anomalies; a missing model rejects the whole
    /// window; otherwise a conversation is rejected when scoring returns no
    /// probability at all.
    fn apply(
        &self,
        model: Option<&WeightedAutomaton<usize, A>>,
        window: &Window<A>,
        _pair: &ComPair,
    ) -> Self::Verdict {
        if window.is_empty() {
            return Vec::new();
        }
        match model {
            None => window.clone(),
            Some(model) => window
                .iter()
                .filter(|conv| model.string_prob_deterministic(conv).is_none())
                .cloned()
                .collect(),
        }
    }

    fn verdict_score(verdict: &Self::Verdict) -> f64 {
        if verdict.is_empty() {
            0.0
        } else {
            1.0
        }
    }
}
