//! Weighted finite automata: core algebra, matrix-based language weights and
//! textual export.

pub mod automaton;
pub mod export;
pub mod matrix;

pub use automaton::{Transition, WeightedAutomaton, WfaError};
pub use export::{from_fa_format, FaParseError};
pub use matrix::{ClosureMode, MatrixForm, MatrixWfa};

use std::fmt::Debug;
use std::hash::Hash;

/// Bound alias for state identifiers. Anything with equality, ordering and
/// hashing can act as a state (prefix tuples, integers, product pairs).
pub trait StateKey: Clone + Eq + Hash + Ord + Debug {}
impl<T: Clone + Eq + Hash + Ord + Debug> StateKey for T {}

/// Bound alias for transition symbols.
pub trait SymbolKey: Clone + Eq + Hash + Ord + Debug {}
impl<T: Clone + Eq + Hash + Ord + Debug> SymbolKey for T {}
