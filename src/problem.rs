//! Problem definition trait and a ready-made implementation.
//!
//! An estimation problem aggregates the parameter arena and the list of
//! measurements the estimator will fit. Most callers can use
//! [`SimpleProblem`] directly; richer models implement
//! [`EstimationProblem`] themselves, typically because measurements and
//! parameters live inside a larger domain structure.

use crate::measurement::Measurement;
use crate::parameters::{ParamId, Parameter, Parameters};

/// A weighted least-squares estimation problem.
///
/// The estimator mutates the free parameter estimates through
/// [`parameters_mut`](EstimationProblem::parameters_mut) while a fit is
/// in progress; it is the only writer, and nothing else may read or write
/// the estimates concurrently with an `estimate` call. The set and order
/// of measurements and of free parameters must not change during one
/// call.
pub trait EstimationProblem {
    /// The parameter arena of the problem.
    fn parameters(&self) -> &Parameters;

    /// Mutable access to the parameter arena.
    fn parameters_mut(&mut self) -> &mut Parameters;

    /// All measurements of the problem, ignored ones included.
    fn measurements(&self) -> &[Box<dyn Measurement>];
}

/// A straightforward [`EstimationProblem`] backed by owned storage.
///
/// # Examples
///
/// ```
/// use lmest_rs::{EstimationProblem, Parameter, SimpleProblem};
///
/// let mut problem = SimpleProblem::new();
/// let p0 = problem.add_parameter(Parameter::new("p0", 0.0));
/// assert_eq!(problem.parameters().estimate(p0), 0.0);
/// ```
#[derive(Default)]
pub struct SimpleProblem {
    parameters: Parameters,
    measurements: Vec<Box<dyn Measurement>>,
}

impl SimpleProblem {
    /// Create an empty problem.
    pub fn new() -> Self {
        Self {
            parameters: Parameters::new(),
            measurements: Vec::new(),
        }
    }

    /// Add a parameter to the problem, returning its id.
    pub fn add_parameter(&mut self, parameter: Parameter) -> ParamId {
        self.parameters.add(parameter)
    }

    /// Add a measurement to the problem.
    pub fn add_measurement<M: Measurement + 'static>(&mut self, measurement: M) {
        self.measurements.push(Box::new(measurement));
    }
}

impl EstimationProblem for SimpleProblem {
    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    fn measurements(&self) -> &[Box<dyn Measurement>] {
        &self.measurements
    }
}
