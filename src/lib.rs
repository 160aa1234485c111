//! Normata - probabilistic automata learning and anomaly detection for
//! industrial control network traffic
//!
//! This library provides the core functionality for learning weighted finite
//! automata from IEC 104 conversation streams and scoring new traffic against
//! the learned models, with support for state-merging learning (Alergia),
//! matrix-based language-weight computation and distance-based model pruning.

pub mod detection;
pub mod distance;
pub mod learning;
pub mod wfa;

pub use detection::{
    AnomalyDetector, ComPair, DistributionDetector, Endpoint, GoldenMap, MembershipDetector,
    Window,
};
pub use distance::{DistanceReducer, Reduction};
pub use learning::{learn_golden_map, learn_pa, learn_pta, LearningConfig, PairTraining};
pub use wfa::{Transition, WeightedAutomaton};
