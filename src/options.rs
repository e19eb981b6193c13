//! Configuration structures for the coupling post processing.
//!
//! Every accelerator constructor calls `validate()`, so an instance never runs
//! with out-of-range settings.

use serde::{Deserialize, Serialize};

use crate::error::{CouplingError, Result};

/// Termination tolerance shared by both convergence criteria.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceOptions {
    /// Absolute bound on the coupling residual norm, and relative bound on the
    /// change between successive outputs.
    pub tolerance: f64,
}

impl Default for ConvergenceOptions {
    fn default() -> Self {
        Self { tolerance: 1e-6 }
    }
}

/// Settings common to every update rule sharing the history machinery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostProcessingOptions {
    /// Maximum number of evaluations per accelerate call.
    pub max_iterations: usize,
    /// Relaxation factor of the start-up step taken without history.
    pub initial_relaxation: f64,
    /// Upper bound on the number of history columns used for a correction.
    pub max_used_iterations: usize,
    /// Number of past time steps whose history is reused.
    pub nb_reuse: usize,
    /// Time index from which information is carried across time steps.
    pub reuse_information_starting_from_time_index: usize,
    /// Termination tolerance.
    pub convergence: ConvergenceOptions,
}

impl Default for PostProcessingOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            initial_relaxation: 1e-3,
            max_used_iterations: 50,
            nb_reuse: 0,
            reuse_information_starting_from_time_index: 0,
            convergence: ConvergenceOptions::default(),
        }
    }
}

impl PostProcessingOptions {
    /// Checks the ranges shared by all update rules.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(CouplingError::invalid_configuration(
                "max_iterations",
                "must be positive",
            ));
        }
        if !(self.initial_relaxation > 0.0) {
            return Err(CouplingError::invalid_configuration(
                "initial_relaxation",
                format!("must be positive, found {}", self.initial_relaxation),
            ));
        }
        if !(self.convergence.tolerance > 0.0) {
            return Err(CouplingError::invalid_configuration(
                "tolerance",
                format!("must be positive, found {}", self.convergence.tolerance),
            ));
        }
        Ok(())
    }

    /// Override the evaluation budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Override the start-up relaxation factor.
    pub fn with_initial_relaxation(mut self, initial_relaxation: f64) -> Self {
        self.initial_relaxation = initial_relaxation;
        self
    }

    /// Cap the number of history columns.
    pub fn with_max_used_iterations(mut self, max_used_iterations: usize) -> Self {
        self.max_used_iterations = max_used_iterations;
        self
    }

    /// Reuse the history of the last `nb_reuse` time steps.
    pub fn with_nb_reuse(mut self, nb_reuse: usize) -> Self {
        self.nb_reuse = nb_reuse;
        self
    }

    /// Set the time index from which information crosses time steps.
    pub fn with_reuse_starting_from(mut self, time_index: usize) -> Self {
        self.reuse_information_starting_from_time_index = time_index;
        self
    }

    /// Override the termination tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence.tolerance = tolerance;
        self
    }
}

/// Configuration of the Anderson mixing (IQN-ILS) update rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AndersonOptions {
    /// Shared post processing settings.
    pub base: PostProcessingOptions,
    /// Singular values at or below this limit are discarded, in `(0, 1)`.
    pub singularity_limit: f64,
    /// Normalize the two interface blocks by their output norms.
    pub scaling: bool,
    /// Relaxation of the component outside the span of the history.
    pub beta: f64,
    /// Build an explicit approximate Jacobian instead of solving for coefficients.
    pub update_jacobian: bool,
}

impl Default for AndersonOptions {
    fn default() -> Self {
        Self {
            base: PostProcessingOptions::default(),
            singularity_limit: 1e-13,
            scaling: false,
            beta: 1.0,
            update_jacobian: false,
        }
    }
}

impl AndersonOptions {
    /// Checks every range listed for the Anderson rule.
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if !(self.singularity_limit > 0.0 && self.singularity_limit < 1.0) {
            return Err(CouplingError::invalid_configuration(
                "singularity_limit",
                format!("must lie in (0, 1), found {}", self.singularity_limit),
            ));
        }
        if !(self.beta > 0.0) {
            return Err(CouplingError::invalid_configuration(
                "beta",
                format!("must be positive, found {}", self.beta),
            ));
        }
        Ok(())
    }

    /// Override the shared settings.
    pub fn with_base(mut self, base: PostProcessingOptions) -> Self {
        self.base = base;
        self
    }

    /// Override the truncation threshold of the pseudoinverse.
    pub fn with_singularity_limit(mut self, singularity_limit: f64) -> Self {
        self.singularity_limit = singularity_limit;
        self
    }

    /// Enable or disable per-block scaling.
    pub fn with_scaling(mut self, scaling: bool) -> Self {
        self.scaling = scaling;
        self
    }

    /// Override `beta`.
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Switch between the explicit Jacobian update and the coefficient solve.
    pub fn with_jacobian_update(mut self, update_jacobian: bool) -> Self {
        self.update_jacobian = update_jacobian;
        self
    }
}
