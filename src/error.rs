use thiserror::Error;

use crate::evaluator::EvaluationFault;

/// Unified error type for `fsi_iqn` operations.
#[derive(Debug, Error)]
pub enum CouplingError {
    /// Raised at construction when a configuration value is out of range.
    #[error("invalid configuration for `{parameter}`: {reason}")]
    InvalidConfiguration {
        /// Name of the offending option.
        parameter: &'static str,
        /// Human-readable description of the accepted range.
        reason: String,
    },

    /// Raised when scaling is requested but the evaluator couples its solvers sequentially.
    #[error("scaling requires the fluid and solid solvers to be coupled in parallel")]
    MissingParallelCoupling,

    /// Raised when provided vectors or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when the evaluator fails; aborts the current accelerate call.
    #[error("coupling evaluation failed at iteration {iteration}")]
    Evaluation {
        /// Iteration of the accelerate call during which the evaluator failed.
        iteration: usize,
        /// Fault reported by the evaluator.
        #[source]
        source: EvaluationFault,
    },

    /// Raised when accelerating outside of an initialized coupling stage.
    #[error("a coupling stage must be initialized before post processing")]
    StageNotInitialized,

    /// Raised when a stage index exceeds the configured number of stages.
    #[error("stage {stage} is out of range for {stages} implicit stages")]
    StageOutOfRange { stage: usize, stages: usize },

    /// Raised when a time step is finalized while a stage is still open.
    #[error("cannot finalize the time step while stage {stage} is still open")]
    TimeStepInProgress { stage: usize },

    /// Raised when numerical routines fail or produce non-finite values.
    #[error("numerical failure during {context}")]
    NumericalError { context: &'static str },
}

impl CouplingError {
    /// Helper to format a [`DimensionMismatch`](CouplingError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to reject a configuration value.
    pub fn invalid_configuration(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }

    /// Helper for failed factorizations and non-finite intermediate values.
    pub fn numerical(context: &'static str) -> Self {
        Self::NumericalError { context }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, CouplingError>;
