//! Parameter definition and implementation
//!
//! This module provides the `Parameter` struct, the fundamental scalar
//! unknown of an estimation problem, and the `ParamId` handle used to
//! refer to a parameter stored in a [`Parameters`](super::Parameters)
//! arena. Measurements never hold parameters directly; they hold ids and
//! resolve them against the arena at evaluation time, so several
//! measurements can share the same unknown without aliasing concerns.

use serde::{Deserialize, Serialize};

/// Handle to a parameter stored in a [`Parameters`](super::Parameters) arena.
///
/// Ids are issued by [`Parameters::add`](super::Parameters::add) in
/// insertion order and stay valid for the lifetime of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamId(pub(crate) usize);

impl ParamId {
    /// The position of the parameter in its arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A scalar unknown of an estimation problem.
///
/// A parameter carries a name, a current estimate, and a `bound` flag.
/// Bound parameters are excluded from the free-parameter vector: the
/// estimator never changes their estimate and the jacobian carries no
/// column for them.
///
/// # Examples
///
/// ```
/// use lmest_rs::Parameter;
///
/// let param = Parameter::new("cx", 98.680);
/// assert_eq!(param.name(), "cx");
/// assert_eq!(param.estimate(), 98.680);
/// assert!(!param.is_bound());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter
    name: String,

    /// Current estimate of the parameter value
    estimate: f64,

    /// Whether the parameter is fixed during estimation
    bound: bool,
}

impl Parameter {
    /// Create a new free parameter with the given name and initial estimate.
    pub fn new(name: &str, estimate: f64) -> Self {
        Self {
            name: name.to_string(),
            estimate,
            bound: false,
        }
    }

    /// Create a new bound (fixed) parameter with the given name and value.
    pub fn bound(name: &str, estimate: f64) -> Self {
        Self {
            name: name.to_string(),
            estimate,
            bound: true,
        }
    }

    /// Name of the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current estimate of the parameter value.
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    /// Set the current estimate of the parameter value.
    pub fn set_estimate(&mut self, estimate: f64) {
        self.estimate = estimate;
    }

    /// Whether the parameter is fixed during estimation.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Fix or free the parameter.
    ///
    /// Changing this between two fits is allowed; changing it while an
    /// `estimate` call is in progress is not.
    pub fn set_bound(&mut self, bound: bool) {
        self.bound = bound;
    }
}
