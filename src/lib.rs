//! # lmest-rs
//!
//! `lmest-rs` is a Rust implementation of the classical Levenberg-Marquardt
//! algorithm for nonlinear weighted least-squares parameter estimation,
//! with post-fit covariance and standard-error calculation.
//!
//! The library provides:
//! - A trust region Levenberg-Marquardt loop with the MINPACK lmder
//!   numerics: column-pivoted Householder QR, damping parameter tuned to
//!   the trust region radius, and the classical convergence tests
//! - A small data model (parameters, weighted measurements, problems)
//!   where measurements address shared parameters through arena ids
//! - Covariance and parameter standard errors derived from the final
//!   triangular factor
//!
//! ## Basic usage
//!
//! Implement [`Measurement`] for each kind of observation, collect
//! measurements and parameters in a [`SimpleProblem`] (or implement
//! [`EstimationProblem`] on your own type), and hand the problem to a
//! [`LevenbergMarquardtEstimator`]:
//!
//! ```
//! use lmest_rs::{
//!     EstimationProblem, LevenbergMarquardtEstimator, Measurement, ParamId, Parameter,
//!     Parameters, SimpleProblem,
//! };
//!
//! /// One observation of `slope * x`.
//! struct PointOnLine {
//!     x: f64,
//!     y: f64,
//!     slope: ParamId,
//! }
//!
//! impl Measurement for PointOnLine {
//!     fn weight(&self) -> f64 {
//!         1.0
//!     }
//!     fn measured_value(&self) -> f64 {
//!         self.y
//!     }
//!     fn theoretical_value(&self, params: &Parameters) -> f64 {
//!         params.estimate(self.slope) * self.x
//!     }
//!     fn partial(&self, _params: &Parameters, id: ParamId) -> f64 {
//!         if id == self.slope {
//!             self.x
//!         } else {
//!             0.0
//!         }
//!     }
//! }
//!
//! let mut problem = SimpleProblem::new();
//! let slope = problem.add_parameter(Parameter::new("slope", 0.0));
//! for (x, y) in [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)] {
//!     problem.add_measurement(PointOnLine { x, y, slope });
//! }
//!
//! let mut estimator = LevenbergMarquardtEstimator::new();
//! estimator.estimate(&mut problem).unwrap();
//!
//! assert!((problem.parameters().estimate(slope) - 2.0).abs() < 1.0e-10);
//! assert!(estimator.rms(&problem) < 1.0e-10);
//! ```
//!
//! ## Concurrency
//!
//! The estimator is strictly single-threaded and synchronous:
//! [`estimate`](LevenbergMarquardtEstimator::estimate) runs the whole
//! trust region loop on the calling thread. During a fit the estimator is
//! the sole writer of the problem's parameter estimates; no other thread
//! may touch them concurrently. This is a documented precondition, not
//! something the library enforces with locks.

// Public modules
pub mod error;

// Parameter system
pub mod parameters;

// Data model
pub mod measurement;
pub mod problem;

// Estimation engine
pub mod lm;

mod uncertainty;

// Re-exports for convenience
pub use error::{EstimationError, Result};
pub use lm::{EstimatorConfig, LevenbergMarquardtEstimator};
pub use measurement::Measurement;
pub use parameters::{ParamId, Parameter, Parameters};
pub use problem::{EstimationProblem, SimpleProblem};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
