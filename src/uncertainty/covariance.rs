//! Covariance matrix calculation from the triangular QR factor.
//!
//! The covariance of the fitted parameters is `sigma^2 * (R^T.R)^-1`
//! un-permuted, where `R` comes from the column-pivoted factorization of
//! the weighted jacobian and `sigma^2` is the residual variance estimate.
//! `R` is inverted by one back-substitution per column; `(J^T.J)^-1` is
//! never formed.

use ndarray::Array2;

use crate::lm::qr::StepSolver;

/// Covariance matrix from a full-rank factorization.
///
/// The caller has checked `rank == cols`; row/column indices of the
/// result are original (free parameter) columns, the permutation of the
/// factorization is not observable in the output.
pub(crate) fn covariance_matrix(solver: &StepSolver, sigma2: f64) -> Array2<f64> {
    let n = solver.permutation.len();

    // R in pivot coordinates: diagonal in diag_r, strict upper part stored
    // at the original column positions of the jacobian array
    let r = |i: usize, j: usize| -> f64 {
        if i == j {
            solver.diag_r[solver.permutation[i]]
        } else {
            solver.jacobian[[i, solver.permutation[j]]]
        }
    };

    // invert R column by column; the inverse is upper triangular too
    let mut r_inv = Array2::<f64>::zeros((n, n));
    for c in 0..n {
        r_inv[[c, c]] = 1.0 / r(c, c);
        for i in (0..c).rev() {
            let mut sum = 0.0;
            for k in (i + 1)..=c {
                sum += r(i, k) * r_inv[[k, c]];
            }
            r_inv[[i, c]] = -sum / r(i, i);
        }
    }

    // (R^T.R)^-1 = R^-1 . R^-T, un-permuted back to original columns
    let mut covariance = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in i.max(j)..n {
                sum += r_inv[[i, k]] * r_inv[[j, k]];
            }
            covariance[[solver.permutation[i], solver.permutation[j]]] = sigma2 * sum;
        }
    }
    covariance
}
