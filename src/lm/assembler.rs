//! Residual and jacobian assembly.
//!
//! The assembler maps a problem onto the dense arrays the step solver
//! works with: one row per active (non-ignored) measurement, one column
//! per free parameter, both in problem order. It is rebuilt at the start
//! of every estimator operation, so toggling `ignored` flags or bound
//! flags between fits is picked up naturally.

use ndarray::{Array1, Array2};

use crate::error::{EstimationError, Result};
use crate::parameters::ParamId;
use crate::problem::EstimationProblem;

/// Row/column layout of a fit, plus the assembly routines.
///
/// Rows are the active measurements in problem order, columns the free
/// parameters in arena order. Both residual and jacobian entries carry
/// the measurement weight: `r_i = w_i * (measured_i - theoretical_i)` and
/// `J[i][j] = -w_i * partial_j`, so the linearized residual near the
/// current point is `r + J * dp`.
pub(crate) struct Assembler {
    free: Vec<ParamId>,
    rows: usize,
}

impl Assembler {
    /// Lay out the problem, rejecting degenerate ones up front.
    pub fn new<P: EstimationProblem + ?Sized>(problem: &P) -> Result<Self> {
        let free = problem.parameters().free_ids();
        if free.is_empty() {
            return Err(EstimationError::NoFreeParameters);
        }
        let rows = problem
            .measurements()
            .iter()
            .filter(|m| !m.is_ignored())
            .count();
        if rows == 0 {
            return Err(EstimationError::NoActiveMeasurements);
        }
        Ok(Self { free, rows })
    }

    /// Number of active measurements.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of free parameters.
    pub fn cols(&self) -> usize {
        self.free.len()
    }

    /// The free parameter ids, in column order.
    pub fn free(&self) -> &[ParamId] {
        &self.free
    }

    /// Evaluate the weighted residuals at the current estimates.
    ///
    /// Returns the cost, the euclidean norm of the residual vector. All
    /// parameter reads go through a single `&Parameters` borrow, so the
    /// whole vector sees one snapshot of the estimates.
    pub fn residuals_into<P: EstimationProblem + ?Sized>(
        &self,
        problem: &P,
        out: &mut Array1<f64>,
    ) -> f64 {
        let params = problem.parameters();
        let mut cost = 0.0;
        let mut row = 0;
        for m in problem.measurements().iter().filter(|m| !m.is_ignored()) {
            let r = m.residual(params);
            out[row] = r;
            cost += r * r;
            row += 1;
        }
        cost.sqrt()
    }

    /// Evaluate the weighted jacobian at the current estimates.
    pub fn jacobian_into<P: EstimationProblem + ?Sized>(
        &self,
        problem: &P,
        out: &mut Array2<f64>,
    ) {
        let params = problem.parameters();
        let mut row = 0;
        for m in problem.measurements().iter().filter(|m| !m.is_ignored()) {
            let weight = m.weight();
            for (col, &id) in self.free.iter().enumerate() {
                out[[row, col]] = -weight * m.partial(params, id);
            }
            row += 1;
        }
    }
}
