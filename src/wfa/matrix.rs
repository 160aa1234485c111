//! Matrix-based computation of total language weight.
//!
//! A [`MatrixWfa`] converts a renamed automaton (states `0..n`) into a
//! transition matrix `T`, an initial row vector and a final column vector.
//! The weight of the accepted language is `initial * closure(T) * final`
//! where `closure(T)` approximates the series `sum_k T^k`, computed either
//! exactly via `(I - T)^-1` or iteratively.

use nalgebra::{DMatrix, DVector, RowDVector};
use nalgebra_sparse::convert::serial::convert_csr_dense;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::automaton::WeightedAutomaton;
use super::SymbolKey;

/// Default iteration bound for the truncated-sum fallback.
pub const DEFAULT_CLOSURE_ITERATIONS: usize = 20;

/// Errors for matrix operations on automata
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("states must be renamed to 0..{expected} before matrix operations")]
    StatesNotContiguous { expected: usize },

    #[error("transition matrix I - T is singular, closure by inversion undefined")]
    SingularMatrix,
}

/// Strategy for computing the transition closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureMode {
    /// Exact closure via `(I - T)^-1`.
    Inverse,
    /// Truncated power series `sum_{k=0}^{K} T^k`.
    Iterations,
    /// Hotelling-Bodewig iterative matrix inversion refinement.
    HotellingBodewig,
}

/// Matrix representation, passed explicitly by callers (never global state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixForm {
    Dense,
    Sparse,
}

/// Matrix view of a renamed weighted automaton.
#[derive(Debug, Clone)]
pub struct MatrixWfa {
    num_states: usize,
    /// Aggregated `(src, dest, weight)` entries; parallel edges summed.
    entries: Vec<(usize, usize, f64)>,
    initial: Vec<(usize, f64)>,
    finals: Vec<(usize, f64)>,
}

impl MatrixWfa {
    /// Build the matrix view. The automaton must already be renamed so its
    /// states are exactly `0..n`; anything else is a precondition error.
    pub fn from_automaton<A: SymbolKey>(
        aut: &WeightedAutomaton<usize, A>,
    ) -> Result<Self, MatrixError> {
        let states = aut.states();
        let num_states = states.len();
        if let Some(max) = states.iter().next_back() {
            if *max != num_states - 1 {
                return Err(MatrixError::StatesNotContiguous {
                    expected: num_states,
                });
            }
        }

        let mut entries: Vec<(usize, usize, f64)> = Vec::with_capacity(aut.transitions().len());
        for tr in aut.transitions() {
            entries.push((tr.src, tr.dest, tr.weight));
        }
        let initial = aut.initials().iter().map(|(s, w)| (*s, *w)).collect();
        let finals = aut.finals().iter().map(|(s, w)| (*s, *w)).collect();

        Ok(Self {
            num_states,
            entries,
            initial,
            finals,
        })
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Dense transition matrix, parallel edge weights summed per cell.
    pub fn transition_matrix(&self) -> DMatrix<f64> {
        let mut mtx = DMatrix::zeros(self.num_states, self.num_states);
        for &(src, dest, weight) in &self.entries {
            mtx[(src, dest)] += weight;
        }
        mtx
    }

    /// CSR transition matrix.
    pub fn transition_matrix_sparse(&self) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(self.num_states, self.num_states);
        for &(src, dest, weight) in &self.entries {
            coo.push(src, dest, weight);
        }
        // CSR conversion sums duplicate coordinates
        CsrMatrix::from(&coo)
    }

    pub fn initial_vector(&self) -> RowDVector<f64> {
        let mut v = RowDVector::zeros(self.num_states);
        for &(state, weight) in &self.initial {
            v[state] = weight;
        }
        v
    }

    pub fn final_vector(&self) -> DVector<f64> {
        let mut v = DVector::zeros(self.num_states);
        for &(state, weight) in &self.finals {
            v[state] = weight;
        }
        v
    }

    /// Transition closure by the requested method. The result is returned
    /// densely regardless of `form`; the sparse path does its intermediate
    /// computation in CSR.
    pub fn transition_closure(
        &self,
        mode: ClosureMode,
        form: MatrixForm,
        iterations: usize,
    ) -> Result<DMatrix<f64>, MatrixError> {
        match form {
            MatrixForm::Dense => self.closure_dense(mode, iterations),
            MatrixForm::Sparse => self.closure_sparse(mode, iterations).map(|c| convert_csr_dense(&c)),
        }
    }

    fn closure_dense(&self, mode: ClosureMode, iterations: usize) -> Result<DMatrix<f64>, MatrixError> {
        let n = self.num_states;
        let t = self.transition_matrix();
        let identity = DMatrix::identity(n, n);

        match mode {
            ClosureMode::Inverse => (&identity - &t)
                .try_inverse()
                .ok_or(MatrixError::SingularMatrix),
            ClosureMode::Iterations => {
                let mut result = identity.clone();
                let mut power = identity;
                for _ in 0..iterations {
                    power = &power * &t;
                    result += &power;
                }
                Ok(result)
            }
            ClosureMode::HotellingBodewig => {
                let m = &identity - &t;
                let two_identity = &identity * 2.0;
                let mut vn = identity;
                for _ in 0..iterations {
                    vn = &vn * &(&two_identity - &(&m * &vn));
                }
                Ok(vn)
            }
        }
    }

    fn closure_sparse(&self, mode: ClosureMode, iterations: usize) -> Result<CsrMatrix<f64>, MatrixError> {
        let n = self.num_states;
        let t = self.transition_matrix_sparse();
        let identity = CsrMatrix::identity(n);

        match mode {
            ClosureMode::Inverse => self.sparse_inverse(),
            ClosureMode::Iterations => {
                let mut result = identity.clone();
                let mut power = identity;
                for _ in 0..iterations {
                    power = &power * &t;
                    result = &result + &power;
                }
                Ok(result)
            }
            ClosureMode::HotellingBodewig => {
                let m = &identity - &t;
                let two_identity = &identity + &identity;
                let mut vn = identity;
                for _ in 0..iterations {
                    let correction = &two_identity - &(&m * &vn);
                    vn = &vn * &correction;
                }
                Ok(vn)
            }
        }
    }

    /// Inverse of `I - T` assembled as CSR: one LU decomposition, then a
    /// column-by-column solve against unit vectors.
    fn sparse_inverse(&self) -> Result<CsrMatrix<f64>, MatrixError> {
        let n = self.num_states;
        let t = self.transition_matrix();
        let lu = (DMatrix::identity(n, n) - t).lu();

        let mut coo = CooMatrix::new(n, n);
        for k in 0..n {
            let mut unit = DVector::zeros(n);
            unit[k] = 1.0;
            let column = lu.solve(&unit).ok_or(MatrixError::SingularMatrix)?;
            for i in 0..n {
                if column[i] > 0.0 {
                    coo.push(i, k, column[i]);
                }
            }
        }
        Ok(CsrMatrix::from(&coo))
    }

    /// Total weight of the accepted language:
    /// `initial * closure(T) * final`. Zero for the empty automaton.
    pub fn language_weight(
        &self,
        mode: ClosureMode,
        form: MatrixForm,
        iterations: usize,
    ) -> Result<f64, MatrixError> {
        if self.num_states == 0 {
            return Ok(0.0);
        }
        let closure = self.transition_closure(mode, form, iterations)?;
        let weight = self.initial_vector() * closure * self.final_vector();
        Ok(weight[(0, 0)])
    }
}
