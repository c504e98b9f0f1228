use thiserror::Error;

/// Error types for the lmest-rs library.
///
/// Every fatal condition of the estimation engine is surfaced synchronously
/// through one of these variants; nothing is retried or swallowed internally.
/// Termination with a nonzero residual RMS is *not* an error: the algorithm
/// cannot know what "good enough" means for a given set of measurements, so
/// callers must judge the final RMS themselves.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    /// The problem exposes no free (unbound) parameters to optimize.
    #[error("degenerate problem: no free parameters to estimate")]
    NoFreeParameters,

    /// The problem exposes no active (non-ignored) measurements.
    #[error("degenerate problem: no active measurements")]
    NoActiveMeasurements,

    /// The cost evaluation budget was exhausted before any convergence test
    /// was satisfied. Parameter estimates retain the last evaluated point.
    #[error("maximal number of cost evaluations exceeded ({0})")]
    EvaluationsExceeded(usize),

    /// The jacobian is rank-deficient where full column rank is required.
    ///
    /// Raised by the covariance computation only; the estimation loop itself
    /// handles rank deficiency by truncating the step to the solvable
    /// subspace.
    #[error("rank-deficient jacobian: effective rank {rank} < {cols} columns")]
    RankDeficient { rank: usize, cols: usize },

    /// Fewer measurements than free parameters; the residual variance (and
    /// hence the covariance matrix) is undefined.
    #[error("not enough degrees of freedom ({measurements} measurements, {parameters} parameters)")]
    InsufficientDegreesOfFreedom {
        measurements: usize,
        parameters: usize,
    },

    /// A column norm of the jacobian overflowed or was not a number.
    #[error("unable to perform Q.R decomposition on the {rows}x{cols} jacobian")]
    JacobianDecompositionFailed { rows: usize, cols: usize },

    /// The cost relative tolerance is below what the arithmetic can resolve;
    /// no further reduction of the sum of squares is possible.
    #[error("cost relative tolerance is too small ({0}), no further reduction in the sum of squares is possible")]
    CostToleranceTooSmall(f64),

    /// The parameters relative tolerance is below what the arithmetic can
    /// resolve; no further improvement of the step is possible.
    #[error("parameters relative tolerance is too small ({0}), no further improvement in the least squares problem is possible")]
    ParToleranceTooSmall(f64),

    /// The orthogonality tolerance is below what the arithmetic can resolve;
    /// the residuals are already orthogonal to the jacobian columns.
    #[error("orthogonality tolerance is too small ({0}), solution is orthogonal to the jacobian")]
    OrthoToleranceTooSmall(f64),
}

/// Result type alias for lmest-rs operations.
pub type Result<T> = std::result::Result<T, EstimationError>;
