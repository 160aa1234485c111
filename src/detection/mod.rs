//! Anomaly detection over communication pairs.
//!
//! A capture is grouped by [`ComPair`] (an unordered endpoint pair) into
//! windows of conversations. Golden models learned from clean traffic are
//! kept in a [`GoldenMap`]; detectors compare a test window against the
//! pair's models. The golden map is read-only once detection starts, pruning
//! happens strictly before.

pub mod distribution;
pub mod membership;

pub use distribution::{euclid_distance, DistributionDetector};
pub use membership::MembershipDetector;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::wfa::{SymbolKey, WeightedAutomaton};

/// One side of a communication: address and port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Unordered pair of endpoints. Construction sorts the two sides, so
/// equality, ordering and hashing are symmetric in the arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComPair {
    lo: Endpoint,
    hi: Endpoint,
}

impl ComPair {
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    pub fn endpoints(&self) -> (&Endpoint, &Endpoint) {
        (&self.lo, &self.hi)
    }
}

impl fmt::Display for ComPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.lo, self.hi)
    }
}

/// A window of traffic: one symbol sequence per conversation.
pub type Window<A> = Vec<Vec<A>>;

/// Golden models per communication pair, one slot per smoothing window.
/// `None` marks a window that had no training material.
pub type GoldenMap<A> = BTreeMap<ComPair, Vec<Option<WeightedAutomaton<usize, A>>>>;

/// Common contract of the detection strategies: candidate models are
/// selected per pair, each is applied to the window, and `detect` chains the
/// two with an optional short-circuit.
pub trait AnomalyDetector<A: SymbolKey> {
    type Verdict;

    /// Candidate golden models for the pair, in evaluation order.
    fn select_models(&self, pair: &ComPair) -> Vec<Option<WeightedAutomaton<usize, A>>>;

    /// Score one candidate model against the window.
    fn apply(
        &self,
        model: Option<&WeightedAutomaton<usize, A>>,
        window: &Window<A>,
        pair: &ComPair,
    ) -> Self::Verdict;

    /// Anomaly degree of a verdict in `[0, 1]`, used for short-circuiting.
    fn verdict_score(verdict: &Self::Verdict) -> f64;

    /// Apply every candidate model in order. With `accelerate` set,
    /// evaluation stops at the first verdict scoring at or below it: the
    /// window is already normal enough under that model.
    fn detect(
        &self,
        pair: &ComPair,
        window: &Window<A>,
        accelerate: Option<f64>,
    ) -> Vec<Self::Verdict> {
        let mut verdicts = Vec::new();
        for model in self.select_models(pair) {
            let verdict = self.apply(model.as_ref(), window, pair);
            let score = Self::verdict_score(&verdict);
            verdicts.push(verdict);
            if let Some(threshold) = accelerate {
                if score <= threshold {
                    break;
                }
            }
        }
        verdicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn com_pair_is_symmetric() {
        let a = Endpoint::new("10.0.0.1", 2404);
        let b = Endpoint::new("10.0.0.2", 55000);
        assert_eq!(ComPair::new(a.clone(), b.clone()), ComPair::new(b, a));
    }

    #[test]
    fn com_pair_orders_endpoints() {
        let a = Endpoint::new("10.0.0.2", 55000);
        let b = Endpoint::new("10.0.0.1", 2404);
        let pair = ComPair::new(a, b);
        assert_eq!(pair.endpoints().0.addr, "10.0.0.1");
    }

    #[test]
    fn endpoint_display_is_addr_port() {
        let e = Endpoint::new("192.168.0.7", 2404);
        assert_eq!(e.to_string(), "192.168.0.7:2404");
    }

    #[test]
    fn com_pair_serde_round_trip() {
        let pair = ComPair::new(
            Endpoint::new("10.0.0.1", 2404),
            Endpoint::new("10.0.0.2", 55000),
        );
        let json = serde_json::to_string(&pair).unwrap();
        let back: ComPair = serde_json::from_str(&json).unwrap();
        assert_eq!(pair, back);
    }
}
