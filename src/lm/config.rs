//! Configuration options for the Levenberg-Marquardt estimator.
//!
//! The defaults reproduce the classical MINPACK lmder settings; most fits
//! never need to change them. The tolerances are relative quantities and
//! values below the machine epsilon cannot be met, in which case the
//! estimator reports a dedicated error instead of looping.

use serde::{Deserialize, Serialize};

/// Configuration options for [`LevenbergMarquardtEstimator`](super::LevenbergMarquardtEstimator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Multiplied by the scaled norm of the initial parameters to obtain the
    /// initial trust region radius. Default: 100.0
    pub initial_step_bound_factor: f64,

    /// Maximum number of cost (residual) evaluations. Default: 1000
    pub max_cost_eval: usize,

    /// Relative decrease of the cost below which the fit is considered
    /// converged. Default: 1e-10
    pub cost_relative_tolerance: f64,

    /// Relative step size below which the fit is considered converged.
    /// Default: 1e-10
    pub par_relative_tolerance: f64,

    /// Cosine of the angle between the residuals and the jacobian columns
    /// below which the iterate is considered stationary. Default: 1e-10
    pub ortho_tolerance: f64,

    /// Squared column norm below which a pivot column is treated as zero,
    /// truncating the effective rank of the jacobian.
    /// Default: smallest positive IEEE-754 normal (about 2.225e-308)
    pub qr_ranking_threshold: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            initial_step_bound_factor: 100.0,
            max_cost_eval: 1000,
            cost_relative_tolerance: 1.0e-10,
            par_relative_tolerance: 1.0e-10,
            ortho_tolerance: 1.0e-10,
            qr_ranking_threshold: f64::MIN_POSITIVE,
        }
    }
}
