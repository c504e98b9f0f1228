//! Column-pivoted QR step solver.
//!
//! This module factors the weighted jacobian with Householder reflections
//! and column pivoting, and solves the damped least-squares sub-problem of
//! each trust region iteration. The arithmetic follows the classical
//! MINPACK routines (qrfac, lmpar, qrsolv): `Q` is never materialized,
//! only its action on the residual vector; the damping parameter is tuned
//! so that the scaled step norm matches the trust region radius; and the
//! `sqrt(par) * D` rows are eliminated with Givens rotations against the
//! triangular factor.
//!
//! Storage convention: after [`decompose`](StepSolver::decompose) the
//! jacobian array holds the Householder vectors in its lower part and the
//! strict upper triangle of `R` at the original (unpermuted) column
//! positions; the `R` diagonal lives in `diag_r`. Row `i` of `R` in pivot
//! order is read as `jacobian[[i, permutation[j]]]` for `j > i`.

use ndarray::{Array1, Array2};

use crate::error::{EstimationError, Result};

/// Factorization state and damped sub-solve machinery for one fit.
///
/// All index arrays are sized to the number of jacobian columns;
/// `diag_r`, `jac_norm`, `beta` and `lm_dir` are indexed by original
/// column, `permutation` maps pivot order to original columns.
pub(crate) struct StepSolver {
    rows: usize,
    cols: usize,
    solved_cols: usize,
    pub jacobian: Array2<f64>,
    pub diag_r: Vec<f64>,
    pub jac_norm: Vec<f64>,
    beta: Vec<f64>,
    pub permutation: Vec<usize>,
    pub rank: usize,
    pub lm_dir: Vec<f64>,
    pub lm_par: f64,
}

impl StepSolver {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            solved_cols: rows.min(cols),
            jacobian: Array2::zeros((rows, cols)),
            diag_r: vec![0.0; cols],
            jac_norm: vec![0.0; cols],
            beta: vec![0.0; cols],
            permutation: vec![0; cols],
            rank: 0,
            lm_dir: vec![0.0; cols],
            lm_par: 0.0,
        }
    }

    pub fn solved_cols(&self) -> usize {
        self.solved_cols
    }

    /// Decompose the jacobian as `J * P = Q * R` with column pivoting.
    ///
    /// At each step the remaining column of largest active norm is brought
    /// into the pivot position. A pivot whose squared norm falls at or
    /// below `threshold` truncates the effective rank: the remaining
    /// columns are left untransformed and their step components will be
    /// forced to zero by the rank-aware solves.
    pub fn decompose(&mut self, threshold: f64) -> Result<()> {
        let (rows, cols) = (self.rows, self.cols);

        for k in 0..cols {
            self.permutation[k] = k;
            let mut norm2 = 0.0;
            for i in 0..rows {
                let akk = self.jacobian[[i, k]];
                norm2 += akk * akk;
            }
            self.jac_norm[k] = norm2.sqrt();
        }

        // transform the matrix column after column
        for k in 0..cols {
            // select the column with the greatest norm on active components
            let mut next_column = k;
            let mut ak2 = f64::NEG_INFINITY;
            for i in k..cols {
                let pi = self.permutation[i];
                let mut norm2 = 0.0;
                for j in k..rows {
                    let aki = self.jacobian[[j, pi]];
                    norm2 += aki * aki;
                }
                if norm2.is_infinite() || norm2.is_nan() {
                    return Err(EstimationError::JacobianDecompositionFailed { rows, cols });
                }
                if norm2 > ak2 {
                    next_column = i;
                    ak2 = norm2;
                }
            }
            if ak2 <= threshold {
                self.rank = k;
                return Ok(());
            }
            let pk = self.permutation[next_column];
            self.permutation[next_column] = self.permutation[k];
            self.permutation[k] = pk;

            // choose alpha such that Hk.u = alpha e_k
            let akk = self.jacobian[[k, pk]];
            let alpha = if akk > 0.0 { -ak2.sqrt() } else { ak2.sqrt() };
            let betak = 1.0 / (ak2 - akk * alpha);
            self.beta[pk] = betak;

            self.diag_r[pk] = alpha;
            self.jacobian[[k, pk]] -= alpha;

            // reflect the remaining columns
            for dk in (1..(cols - k)).rev() {
                let pd = self.permutation[k + dk];
                let mut gamma = 0.0;
                for j in k..rows {
                    gamma += self.jacobian[[j, pk]] * self.jacobian[[j, pd]];
                }
                gamma *= betak;
                for j in k..rows {
                    self.jacobian[[j, pd]] -= gamma * self.jacobian[[j, pk]];
                }
            }
        }
        self.rank = self.solved_cols;
        Ok(())
    }

    /// Apply `Q^T` to `y` in place, using the stored Householder vectors.
    pub fn q_t_y(&self, y: &mut Array1<f64>) {
        for k in 0..self.cols {
            let pk = self.permutation[k];
            let mut gamma = 0.0;
            for i in k..self.rows {
                gamma += self.jacobian[[i, pk]] * y[i];
            }
            gamma *= self.beta[pk];
            for i in k..self.rows {
                y[i] -= gamma * self.jacobian[[i, pk]];
            }
        }
    }

    /// Overwrite the pivot diagonal of the jacobian array with the `R`
    /// diagonal, once the Householder vectors are no longer needed for
    /// `q_t_y`. The sub-solves below rely on this layout.
    pub fn store_r_diagonal(&mut self) {
        for k in 0..self.solved_cols {
            let pk = self.permutation[k];
            self.jacobian[[k, pk]] = self.diag_r[pk];
        }
    }

    /// Determine the Levenberg-Marquardt damping parameter.
    ///
    /// Solves, by at most ten rounds of a safeguarded Newton iteration on
    /// `par`, for the damping value whose step `dp(par)` satisfies
    /// `| ||D.dp|| - delta | <= 0.1 * delta`, starting from bracketing
    /// bounds derived from the triangular factor. On return `lm_dir`
    /// holds the step (in original column order) and `lm_par` the damping
    /// parameter; `lm_par` is zero whenever the plain Gauss-Newton step
    /// already fits inside the trust region.
    pub fn determine_lm_parameter(
        &mut self,
        qy: &Array1<f64>,
        delta: f64,
        diag: &[f64],
        work1: &mut [f64],
        work2: &mut [f64],
        work3: &mut [f64],
    ) {
        let solved_cols = self.solved_cols;

        // compute and store in lm_dir the Gauss-Newton direction; if the
        // jacobian is rank-deficient, obtain a least squares solution
        for j in 0..self.rank {
            self.lm_dir[self.permutation[j]] = qy[j];
        }
        for j in self.rank..self.cols {
            self.lm_dir[self.permutation[j]] = 0.0;
        }
        for k in (0..self.rank).rev() {
            let pk = self.permutation[k];
            let ypk = self.lm_dir[pk] / self.diag_r[pk];
            for i in 0..k {
                self.lm_dir[self.permutation[i]] -= ypk * self.jacobian[[i, pk]];
            }
            self.lm_dir[pk] = ypk;
        }

        // evaluate the function at the origin, and test
        // for acceptance of the Gauss-Newton direction
        let mut dx_norm = 0.0;
        for j in 0..solved_cols {
            let pj = self.permutation[j];
            let s = diag[pj] * self.lm_dir[pj];
            work1[pj] = s;
            dx_norm += s * s;
        }
        let mut dx_norm = dx_norm.sqrt();
        let mut fp = dx_norm - delta;
        if fp <= 0.1 * delta {
            self.lm_par = 0.0;
            return;
        }

        // if the jacobian is not rank deficient, the Newton step provides
        // a lower bound, parl, for the zero of the function,
        // otherwise set this bound to zero
        let mut parl = 0.0;
        if self.rank == solved_cols {
            for j in 0..solved_cols {
                let pj = self.permutation[j];
                work1[pj] *= diag[pj] / dx_norm;
            }
            let mut sum2 = 0.0;
            for j in 0..solved_cols {
                let pj = self.permutation[j];
                let mut sum = 0.0;
                for i in 0..j {
                    sum += self.jacobian[[i, pj]] * work1[self.permutation[i]];
                }
                let s = (work1[pj] - sum) / self.diag_r[pj];
                work1[pj] = s;
                sum2 += s * s;
            }
            parl = fp / (delta * sum2);
        }

        // calculate an upper bound, paru, for the zero of the function
        let mut sum2 = 0.0;
        for j in 0..solved_cols {
            let pj = self.permutation[j];
            let mut sum = 0.0;
            for i in 0..=j {
                sum += self.jacobian[[i, pj]] * qy[i];
            }
            sum /= diag[pj];
            sum2 += sum * sum;
        }
        let g_norm = sum2.sqrt();
        let mut paru = g_norm / delta;
        if paru == 0.0 {
            paru = f64::MIN_POSITIVE / delta.min(0.1);
        }

        // if the current par lies outside of the interval (parl, paru),
        // set par to the closer endpoint
        self.lm_par = self.lm_par.max(parl).min(paru);
        if self.lm_par == 0.0 {
            self.lm_par = g_norm / dx_norm;
        }

        for _countdown in 0..=10 {
            if self.lm_par == 0.0 {
                self.lm_par = f64::MIN_POSITIVE.max(0.001 * paru);
            }
            let s_par = self.lm_par.sqrt();
            for j in 0..solved_cols {
                let pj = self.permutation[j];
                work1[pj] = s_par * diag[pj];
            }
            self.determine_lm_direction(qy, work1, work2, work3);

            dx_norm = 0.0;
            for j in 0..solved_cols {
                let pj = self.permutation[j];
                let s = diag[pj] * self.lm_dir[pj];
                work3[pj] = s;
                dx_norm += s * s;
            }
            dx_norm = dx_norm.sqrt();
            let previous_fp = fp;
            fp = dx_norm - delta;

            // if the function is small enough, accept the current value of
            // lm_par, also test for the exceptional case where parl is zero
            if fp.abs() <= 0.1 * delta
                || (parl == 0.0 && fp <= previous_fp && previous_fp < 0.0)
            {
                return;
            }

            // compute the Newton correction
            for j in 0..solved_cols {
                let pj = self.permutation[j];
                work1[pj] = work3[pj] * diag[pj] / dx_norm;
            }
            for j in 0..solved_cols {
                let pj = self.permutation[j];
                work1[pj] /= work2[j];
                let tmp = work1[pj];
                for i in (j + 1)..solved_cols {
                    work1[self.permutation[i]] -= self.jacobian[[i, pj]] * tmp;
                }
            }
            let mut sum2 = 0.0;
            for j in 0..solved_cols {
                let s = work1[self.permutation[j]];
                sum2 += s * s;
            }
            let correction = fp / (delta * sum2);

            // depending on the sign of the function, update parl or paru
            if fp > 0.0 {
                parl = parl.max(self.lm_par);
            } else if fp < 0.0 {
                paru = paru.min(self.lm_par);
            }

            self.lm_par = parl.max(self.lm_par + correction);
        }
    }

    /// Solve the damped triangular system for the current damping value.
    ///
    /// `diag` holds the `sqrt(par) * D` entries by original column; the
    /// rotations eliminate them row by row against `R`, and a rank-aware
    /// back-substitution produces the step in `lm_dir`. `lm_diag` receives
    /// the diagonal of the rotated factor, which the caller reuses for the
    /// Newton correction of the damping parameter.
    fn determine_lm_direction(
        &mut self,
        qy: &Array1<f64>,
        diag: &[f64],
        lm_diag: &mut [f64],
        work: &mut [f64],
    ) {
        let solved_cols = self.solved_cols;

        // copy R and Q^T.y to preserve them, saving the diagonal of R in
        // lm_dir for the duration of the elimination
        for j in 0..solved_cols {
            let pj = self.permutation[j];
            for i in (j + 1)..solved_cols {
                self.jacobian[[i, pj]] = self.jacobian[[j, self.permutation[i]]];
            }
            self.lm_dir[j] = self.diag_r[pj];
            work[j] = qy[j];
        }

        // eliminate the diagonal matrix d using Givens rotations
        for j in 0..solved_cols {
            // prepare the row of d to be eliminated, locating the
            // diagonal element using p from the QR factorization
            let pj = self.permutation[j];
            let dpj = diag[pj];
            if dpj != 0.0 {
                for entry in lm_diag.iter_mut().skip(j + 1) {
                    *entry = 0.0;
                }
            }
            lm_diag[j] = dpj;

            // the transformations to eliminate the row of d modify only a
            // single element of Q^T.y beyond the first n, which is
            // initially zero
            let mut qtbpj = 0.0;
            for k in j..solved_cols {
                let pk = self.permutation[k];
                if lm_diag[k] != 0.0 {
                    let rkk = self.jacobian[[k, pk]];
                    let (sin, cos) = if rkk.abs() < lm_diag[k].abs() {
                        let cotan = rkk / lm_diag[k];
                        let sin = 1.0 / (1.0 + cotan * cotan).sqrt();
                        (sin, sin * cotan)
                    } else {
                        let tan = lm_diag[k] / rkk;
                        let cos = 1.0 / (1.0 + tan * tan).sqrt();
                        (cos * tan, cos)
                    };

                    // compute the modified diagonal element of R and the
                    // modified element of (Q^T.y, 0)
                    self.jacobian[[k, pk]] = cos * rkk + sin * lm_diag[k];
                    let temp = cos * work[k] + sin * qtbpj;
                    qtbpj = -sin * work[k] + cos * qtbpj;
                    work[k] = temp;

                    // accumulate the transformation in the row of s
                    for i in (k + 1)..solved_cols {
                        let rik = self.jacobian[[i, pk]];
                        let temp2 = cos * rik + sin * lm_diag[i];
                        lm_diag[i] = -sin * rik + cos * lm_diag[i];
                        self.jacobian[[i, pk]] = temp2;
                    }
                }
            }

            // store the diagonal element of s and restore
            // the corresponding diagonal element of R
            lm_diag[j] = self.jacobian[[j, self.permutation[j]]];
            self.jacobian[[j, self.permutation[j]]] = self.lm_dir[j];
        }

        // solve the triangular system; if it is singular,
        // obtain a least squares solution
        let mut n_sing = solved_cols;
        for j in 0..solved_cols {
            if lm_diag[j] == 0.0 && n_sing == solved_cols {
                n_sing = j;
            }
            if n_sing < solved_cols {
                work[j] = 0.0;
            }
        }
        for j in (0..n_sing).rev() {
            let pj = self.permutation[j];
            let mut sum = 0.0;
            for i in (j + 1)..n_sing {
                sum += self.jacobian[[i, pj]] * work[i];
            }
            work[j] = (work[j] - sum) / lm_diag[j];
        }

        // permute the components of z back to components of lm_dir
        for j in 0..self.lm_dir.len() {
            self.lm_dir[self.permutation[j]] = work[j];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn prepared_solver(jacobian: Array2<f64>, residuals: &mut Array1<f64>) -> StepSolver {
        let (rows, cols) = (jacobian.nrows(), jacobian.ncols());
        let mut solver = StepSolver::new(rows, cols);
        solver.jacobian.assign(&jacobian);
        solver.decompose(f64::MIN_POSITIVE).unwrap();
        solver.q_t_y(residuals);
        solver.store_r_diagonal();
        solver
    }

    #[test]
    fn test_pivot_brings_largest_column_first() {
        let mut solver = StepSolver::new(2, 2);
        solver.jacobian.assign(&array![[1.0, 3.0], [2.0, 4.0]]);
        solver.decompose(f64::MIN_POSITIVE).unwrap();

        assert_eq!(solver.permutation, vec![1, 0]);
        assert_eq!(solver.rank, 2);
        assert_relative_eq!(solver.jac_norm[0], 5.0_f64.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(solver.jac_norm[1], 5.0, epsilon = 1e-14);
    }

    #[test]
    fn test_zero_column_truncates_rank() {
        let mut solver = StepSolver::new(3, 2);
        solver
            .jacobian
            .assign(&array![[1.0, 0.0], [2.0, 0.0], [-1.0, 0.0]]);
        solver.decompose(f64::MIN_POSITIVE).unwrap();

        assert_eq!(solver.rank, 1);
        assert_eq!(solver.permutation[1], 1);
    }

    #[test]
    fn test_non_finite_norm_is_an_error() {
        let mut solver = StepSolver::new(1, 1);
        solver.jacobian[[0, 0]] = f64::NAN;
        assert!(matches!(
            solver.decompose(f64::MIN_POSITIVE),
            Err(EstimationError::JacobianDecompositionFailed { rows: 1, cols: 1 })
        ));
    }

    #[test]
    fn test_q_t_y_preserves_norm() {
        let mut residuals = array![1.0, -2.0, 0.5];
        let norm_before = residuals.iter().map(|r| r * r).sum::<f64>().sqrt();
        let jacobian = array![[2.0, 1.0], [1.0, 3.0], [0.0, -1.0]];
        prepared_solver(jacobian, &mut residuals);
        let norm_after = residuals.iter().map(|r| r * r).sum::<f64>().sqrt();
        assert_relative_eq!(norm_before, norm_after, epsilon = 1e-12);
    }

    #[test]
    fn test_gauss_newton_direction_solves_square_system() {
        let jacobian = array![[2.0, 1.0], [1.0, 3.0]];
        let mut residuals = array![3.0, 5.0];
        let mut solver = prepared_solver(jacobian.clone(), &mut residuals);

        let diag: Vec<f64> = solver.jac_norm.clone();
        let mut work1 = vec![0.0; 2];
        let mut work2 = vec![0.0; 2];
        let mut work3 = vec![0.0; 2];
        // a huge trust region always accepts the Gauss-Newton step
        solver.determine_lm_parameter(&residuals, 1.0e10, &diag, &mut work1, &mut work2, &mut work3);

        assert_eq!(solver.lm_par, 0.0);
        // J . dir must reproduce the original right-hand side
        for i in 0..2 {
            let ji: f64 = (0..2).map(|j| jacobian[[i, j]] * solver.lm_dir[j]).sum();
            let expected = [3.0, 5.0][i];
            assert_relative_eq!(ji, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_damped_step_matches_trust_region_radius() {
        let jacobian = array![[2.0, 1.0], [1.0, 3.0], [1.0, -1.0]];
        let mut residuals = array![3.0, 5.0, 1.0];
        let mut solver = prepared_solver(jacobian, &mut residuals);

        let diag: Vec<f64> = solver.jac_norm.clone();
        let delta = 0.1;
        let mut work1 = vec![0.0; 2];
        let mut work2 = vec![0.0; 2];
        let mut work3 = vec![0.0; 2];
        solver.determine_lm_parameter(&residuals, delta, &diag, &mut work1, &mut work2, &mut work3);

        assert!(solver.lm_par > 0.0);
        let scaled_norm = (0..2)
            .map(|j| {
                let s = diag[j] * solver.lm_dir[j];
                s * s
            })
            .sum::<f64>()
            .sqrt();
        // lmpar tunes the scaled step norm to delta within 10 percent
        assert!((scaled_norm - delta).abs() <= 0.1 * delta);
    }
}
