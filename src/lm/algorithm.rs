//! The Levenberg-Marquardt estimator.
//!
//! This module contains the trust region outer loop driving the
//! column-pivoted QR sub-solves of [`super::qr`], together with the
//! public accessors for fit statistics and post-fit uncertainty.

use ndarray::{Array1, Array2};

use crate::error::{EstimationError, Result};
use crate::problem::EstimationProblem;
use crate::uncertainty;

use super::assembler::Assembler;
use super::config::EstimatorConfig;
use super::qr::StepSolver;

/// IEEE-754 double precision machine epsilon, the floor below which the
/// relative convergence tolerances cannot be satisfied.
const EPSILON: f64 = 2.2204e-16;

/// Weighted least-squares estimator implementing the classical MINPACK
/// lmder trust region algorithm.
///
/// The estimator adjusts the free parameters of an
/// [`EstimationProblem`] until the weighted sum of squared residuals
/// stops decreasing, keeping the step inside an adaptively sized trust
/// region. Convergence is declared when any of three tests passes: the
/// relative cost decrease falls below
/// [`cost_relative_tolerance`](EstimatorConfig::cost_relative_tolerance),
/// the relative step size falls below
/// [`par_relative_tolerance`](EstimatorConfig::par_relative_tolerance),
/// or the residuals become orthogonal to the jacobian columns within
/// [`ortho_tolerance`](EstimatorConfig::ortho_tolerance).
///
/// Parameter estimates are updated in place at every internally evaluated
/// point. When [`estimate`](LevenbergMarquardtEstimator::estimate)
/// returns an error the estimates therefore hold the *last evaluated*
/// point, which may be mid-iteration; callers needing the starting point
/// back must snapshot it themselves.
///
/// # Examples
///
/// ```
/// use lmest_rs::{
///     EstimationProblem, LevenbergMarquardtEstimator, Measurement, ParamId, Parameter,
///     Parameters, SimpleProblem,
/// };
///
/// struct Scaled {
///     factor: f64,
///     target: f64,
///     p: ParamId,
/// }
///
/// impl Measurement for Scaled {
///     fn weight(&self) -> f64 {
///         1.0
///     }
///     fn measured_value(&self) -> f64 {
///         self.target
///     }
///     fn theoretical_value(&self, params: &Parameters) -> f64 {
///         self.factor * params.estimate(self.p)
///     }
///     fn partial(&self, _params: &Parameters, id: ParamId) -> f64 {
///         if id == self.p {
///             self.factor
///         } else {
///             0.0
///         }
///     }
/// }
///
/// let mut problem = SimpleProblem::new();
/// let p0 = problem.add_parameter(Parameter::new("p0", 0.0));
/// problem.add_measurement(Scaled { factor: 2.0, target: 3.0, p: p0 });
///
/// let mut estimator = LevenbergMarquardtEstimator::new();
/// estimator.estimate(&mut problem).unwrap();
/// assert!((problem.parameters().estimate(p0) - 1.5).abs() < 1.0e-10);
/// assert!(estimator.rms(&problem) < 1.0e-10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardtEstimator {
    config: EstimatorConfig,
    cost_evaluations: usize,
    jacobian_evaluations: usize,
}

impl LevenbergMarquardtEstimator {
    /// Create an estimator with the default configuration.
    pub fn new() -> Self {
        Self {
            config: EstimatorConfig::default(),
            cost_evaluations: 0,
            jacobian_evaluations: 0,
        }
    }

    /// Create an estimator with the given configuration.
    pub fn with_config(config: EstimatorConfig) -> Self {
        Self {
            config,
            cost_evaluations: 0,
            jacobian_evaluations: 0,
        }
    }

    /// Set the factor applied to the scaled norm of the initial parameters
    /// to obtain the initial trust region radius.
    pub fn with_initial_step_bound_factor(mut self, factor: f64) -> Self {
        self.config.initial_step_bound_factor = factor;
        self
    }

    /// Set the maximum number of cost evaluations.
    pub fn with_max_cost_eval(mut self, max_cost_eval: usize) -> Self {
        self.config.max_cost_eval = max_cost_eval;
        self
    }

    /// Set the relative cost decrease convergence tolerance.
    pub fn with_cost_relative_tolerance(mut self, tolerance: f64) -> Self {
        self.config.cost_relative_tolerance = tolerance;
        self
    }

    /// Set the relative step size convergence tolerance.
    pub fn with_par_relative_tolerance(mut self, tolerance: f64) -> Self {
        self.config.par_relative_tolerance = tolerance;
        self
    }

    /// Set the orthogonality convergence tolerance.
    pub fn with_ortho_tolerance(mut self, tolerance: f64) -> Self {
        self.config.ortho_tolerance = tolerance;
        self
    }

    /// Set the squared-norm threshold below which a pivot column is
    /// treated as zero during the QR decomposition.
    pub fn with_qr_ranking_threshold(mut self, threshold: f64) -> Self {
        self.config.qr_ranking_threshold = threshold;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Number of cost evaluations performed by the last operation.
    pub fn cost_evaluations(&self) -> usize {
        self.cost_evaluations
    }

    /// Number of jacobian evaluations performed by the last operation.
    pub fn jacobian_evaluations(&self) -> usize {
        self.jacobian_evaluations
    }

    /// Weighted root mean square of the residuals at the current
    /// estimates, over the active measurements:
    /// `sqrt(sum(residual^2) / m)`.
    pub fn rms<P: EstimationProblem + ?Sized>(&self, problem: &P) -> f64 {
        let params = problem.parameters();
        let mut chi2 = 0.0;
        let mut count = 0;
        for m in problem.measurements().iter().filter(|m| !m.is_ignored()) {
            let r = m.residual(params);
            chi2 += r * r;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            (chi2 / count as f64).sqrt()
        }
    }

    /// Weighted sum of squared residuals at the current estimates, over
    /// the active measurements.
    pub fn chi_square<P: EstimationProblem + ?Sized>(&self, problem: &P) -> f64 {
        let params = problem.parameters();
        problem
            .measurements()
            .iter()
            .filter(|m| !m.is_ignored())
            .map(|m| {
                let r = m.residual(params);
                r * r
            })
            .sum()
    }

    /// Solve the least squares problem, mutating the free parameter
    /// estimates of `problem` in place.
    ///
    /// On success the estimates hold a minimizer of the weighted sum of
    /// squared residuals; note that a nonzero final
    /// [`rms`](LevenbergMarquardtEstimator::rms) is not an error, it
    /// simply means the measurements cannot be fitted exactly. On error
    /// the estimates hold the last internally evaluated point.
    pub fn estimate<P: EstimationProblem + ?Sized>(&mut self, problem: &mut P) -> Result<()> {
        self.cost_evaluations = 0;
        self.jacobian_evaluations = 0;

        let assembler = Assembler::new(problem)?;
        let rows = assembler.rows();
        let cols = assembler.cols();

        let mut solver = StepSolver::new(rows, cols);
        let solved_cols = solver.solved_cols();

        let mut residuals = Array1::zeros(rows);
        let mut old_res = Array1::zeros(rows);
        let mut old_x = vec![0.0; cols];
        let mut diag = vec![0.0; cols];
        let mut work1 = vec![0.0; cols];
        let mut work2 = vec![0.0; cols];
        let mut work3 = vec![0.0; cols];

        // evaluate the function at the starting point and calculate its norm
        let mut cost = self.update_residuals_and_cost(problem, &assembler, &mut residuals)?;

        let mut delta = 0.0;
        let mut x_norm = 0.0;
        let mut first_iteration = true;
        solver.lm_par = 0.0;

        loop {
            // compute the Q.R decomposition of the jacobian matrix
            self.jacobian_evaluations += 1;
            assembler.jacobian_into(problem, &mut solver.jacobian);
            solver.decompose(self.config.qr_ranking_threshold)?;

            // compute Qt.res, then let the jacobian array hold the R matrix
            // with its diagonal elements
            solver.q_t_y(&mut residuals);
            solver.store_r_diagonal();

            if first_iteration {
                // scale the variables according to the norms of the columns
                // of the initial jacobian
                let params = problem.parameters();
                x_norm = 0.0;
                for k in 0..cols {
                    let mut dk = solver.jac_norm[k];
                    if dk == 0.0 {
                        dk = 1.0;
                    }
                    let xk = dk * params.estimate(assembler.free()[k]);
                    x_norm += xk * xk;
                    diag[k] = dk;
                }
                x_norm = x_norm.sqrt();

                // initialize the step bound delta
                delta = if x_norm == 0.0 {
                    self.config.initial_step_bound_factor
                } else {
                    self.config.initial_step_bound_factor * x_norm
                };
            }

            // check orthogonality between function vector and jacobian columns
            let mut max_cosine: f64 = 0.0;
            if cost != 0.0 {
                for j in 0..solved_cols {
                    let pj = solver.permutation[j];
                    let s = solver.jac_norm[pj];
                    if s != 0.0 {
                        let mut sum = 0.0;
                        for i in 0..=j {
                            sum += solver.jacobian[[i, pj]] * residuals[i];
                        }
                        max_cosine = max_cosine.max((sum / (s * cost)).abs());
                    }
                }
            }
            if max_cosine <= self.config.ortho_tolerance {
                return Ok(());
            }

            // rescale if necessary
            for j in 0..cols {
                diag[j] = diag[j].max(solver.jac_norm[j]);
            }

            // inner loop
            let mut ratio = 0.0;
            while ratio < 1.0e-4 {
                // save the state
                {
                    let params = problem.parameters();
                    for j in 0..solved_cols {
                        let pj = solver.permutation[j];
                        old_x[pj] = params.estimate(assembler.free()[pj]);
                    }
                }
                let previous_cost = cost;
                std::mem::swap(&mut residuals, &mut old_res);

                // determine the Levenberg-Marquardt parameter
                solver.determine_lm_parameter(
                    &old_res, delta, &diag, &mut work1, &mut work2, &mut work3,
                );

                // compute the new point and the norm of the evolution direction
                let mut lm_norm = 0.0;
                {
                    let params = problem.parameters_mut();
                    for j in 0..solved_cols {
                        let pj = solver.permutation[j];
                        solver.lm_dir[pj] = -solver.lm_dir[pj];
                        params.set_estimate(assembler.free()[pj], old_x[pj] + solver.lm_dir[pj]);
                        let s = diag[pj] * solver.lm_dir[pj];
                        lm_norm += s * s;
                    }
                }
                let lm_norm = lm_norm.sqrt();

                // on the first iteration, adjust the initial step bound
                if first_iteration {
                    delta = delta.min(lm_norm);
                }

                // evaluate the function at x + p and calculate its norm
                cost = self.update_residuals_and_cost(problem, &assembler, &mut residuals)?;

                // compute the scaled actual reduction
                let mut act_red = -1.0;
                if 0.1 * cost < previous_cost {
                    let r = cost / previous_cost;
                    act_red = 1.0 - r * r;
                }

                // compute the scaled predicted reduction
                // and the scaled directional derivative
                for j in 0..solved_cols {
                    let pj = solver.permutation[j];
                    let dir_j = solver.lm_dir[pj];
                    work1[j] = 0.0;
                    for i in 0..=j {
                        work1[i] += solver.jacobian[[i, pj]] * dir_j;
                    }
                }
                let mut coeff1 = 0.0;
                for item in work1.iter().take(solved_cols) {
                    coeff1 += item * item;
                }
                let pc2 = previous_cost * previous_cost;
                coeff1 /= pc2;
                let coeff2 = solver.lm_par * lm_norm * lm_norm / pc2;
                let pre_red = coeff1 + 2.0 * coeff2;
                let dir_der = -(coeff1 + coeff2);

                // ratio of the actual to the predicted reduction
                ratio = if pre_red == 0.0 { 0.0 } else { act_red / pre_red };

                // update the step bound
                if ratio <= 0.25 {
                    let mut tmp = if act_red < 0.0 {
                        0.5 * dir_der / (dir_der + 0.5 * act_red)
                    } else {
                        0.5
                    };
                    if (0.1 * cost >= previous_cost) || (tmp < 0.1) {
                        tmp = 0.1;
                    }
                    delta = tmp * delta.min(10.0 * lm_norm);
                    solver.lm_par /= tmp;
                } else if solver.lm_par == 0.0 || ratio >= 0.75 {
                    delta = 2.0 * lm_norm;
                    solver.lm_par *= 0.5;
                }

                if ratio >= 1.0e-4 {
                    // successful iteration, update the norm
                    first_iteration = false;
                    let params = problem.parameters();
                    x_norm = 0.0;
                    for k in 0..cols {
                        let xk = diag[k] * params.estimate(assembler.free()[k]);
                        x_norm += xk * xk;
                    }
                    x_norm = x_norm.sqrt();
                } else {
                    // failed iteration, reset the previous values
                    cost = previous_cost;
                    let params = problem.parameters_mut();
                    for j in 0..solved_cols {
                        let pj = solver.permutation[j];
                        params.set_estimate(assembler.free()[pj], old_x[pj]);
                    }
                    std::mem::swap(&mut residuals, &mut old_res);
                }

                // tests for convergence
                if (act_red.abs() <= self.config.cost_relative_tolerance
                    && pre_red <= self.config.cost_relative_tolerance
                    && ratio <= 2.0)
                    || delta <= self.config.par_relative_tolerance * x_norm
                {
                    return Ok(());
                }

                // tests for termination and stringent tolerances
                if act_red.abs() <= EPSILON && pre_red <= EPSILON && ratio <= 2.0 {
                    return Err(EstimationError::CostToleranceTooSmall(
                        self.config.cost_relative_tolerance,
                    ));
                } else if delta <= EPSILON * x_norm {
                    return Err(EstimationError::ParToleranceTooSmall(
                        self.config.par_relative_tolerance,
                    ));
                } else if max_cosine <= EPSILON {
                    return Err(EstimationError::OrthoToleranceTooSmall(
                        self.config.ortho_tolerance,
                    ));
                }
            }
        }
    }

    /// Parameter covariance matrix at the current estimates.
    ///
    /// The jacobian is rebuilt and refactored at the current point; the
    /// covariance is `sigma^2 * (R^T.R)^-1` un-permuted, with `sigma^2 =
    /// chi^2 / (m - n)`, computed by triangular back-substitution rather
    /// than by inverting `J^T.J`. Row/column order is the free parameter
    /// order of the problem.
    ///
    /// Fails with [`EstimationError::RankDeficient`] when the jacobian
    /// does not have full column rank at the current point, and with
    /// [`EstimationError::InsufficientDegreesOfFreedom`] when there are
    /// no more measurements than free parameters. A successful `estimate`
    /// does not guarantee this call succeeds.
    pub fn covariances<P: EstimationProblem + ?Sized>(
        &mut self,
        problem: &P,
    ) -> Result<Array2<f64>> {
        let assembler = Assembler::new(problem)?;
        let rows = assembler.rows();
        let cols = assembler.cols();
        if rows <= cols {
            return Err(EstimationError::InsufficientDegreesOfFreedom {
                measurements: rows,
                parameters: cols,
            });
        }

        let mut solver = StepSolver::new(rows, cols);
        self.jacobian_evaluations += 1;
        assembler.jacobian_into(problem, &mut solver.jacobian);
        solver.decompose(self.config.qr_ranking_threshold)?;
        if solver.rank < cols {
            return Err(EstimationError::RankDeficient {
                rank: solver.rank,
                cols,
            });
        }

        let sigma2 = self.chi_square(problem) / (rows - cols) as f64;
        Ok(uncertainty::covariance_matrix(&solver, sigma2))
    }

    /// Standard errors of the free parameters: the square roots of the
    /// covariance matrix diagonal. Fails whenever
    /// [`covariances`](LevenbergMarquardtEstimator::covariances) fails.
    pub fn guess_parameters_errors<P: EstimationProblem + ?Sized>(
        &mut self,
        problem: &P,
    ) -> Result<Array1<f64>> {
        let covariances = self.covariances(problem)?;
        let n = covariances.nrows();
        let mut errors = Array1::zeros(n);
        for i in 0..n {
            errors[i] = covariances[[i, i]].sqrt();
        }
        Ok(errors)
    }

    fn update_residuals_and_cost<P: EstimationProblem + ?Sized>(
        &mut self,
        problem: &P,
        assembler: &Assembler,
        residuals: &mut Array1<f64>,
    ) -> Result<f64> {
        self.cost_evaluations += 1;
        if self.cost_evaluations > self.config.max_cost_eval {
            return Err(EstimationError::EvaluationsExceeded(
                self.config.max_cost_eval,
            ));
        }
        Ok(assembler.residuals_into(problem, residuals))
    }
}
