//! Anderson mixing (IQN-ILS) update rule.
//!
//! Each correction is a least-squares combination of the difference columns of
//! the history, computed in the scaled space when scaling is active. Without
//! history the rule falls back to fixed relaxation, or to the Jacobian kept
//! from an earlier time step when the Jacobian update mode is enabled.

use log::info;
use nalgebra::{DMatrix, DVector};

use crate::error::{CouplingError, Result};
use crate::evaluator::BlockSizes;
use crate::kernel::{
    coefficient_correction, relaxation_step, updated_jacobian, DifferenceMatrices, JacobianCache,
    TruncatedSvd, UpdateMode,
};
use crate::options::AndersonOptions;
use crate::postprocessing::{UpdateContext, UpdateRule};
use crate::scaling::ScalingPolicy;

/// Quasi-Newton correction with rank-truncated least squares.
#[derive(Clone, Debug)]
pub struct AndersonMixing {
    initial_relaxation: f64,
    singularity_limit: f64,
    beta: f64,
    mode: UpdateMode,
    reuse_threshold: usize,
    scaling: ScalingPolicy,
    jacobian_cache: JacobianCache,
    /// Jacobian built during the current call, cached once the call converges.
    pending_jacobian: Option<DMatrix<f64>>,
}

impl AndersonMixing {
    /// Builds the rule; `parallel_blocks` must be present when scaling is requested.
    pub fn new(options: &AndersonOptions, parallel_blocks: Option<BlockSizes>) -> Result<Self> {
        options.validate()?;
        let scaling = match (options.scaling, parallel_blocks) {
            (false, _) => ScalingPolicy::disabled(),
            (true, Some(blocks)) => ScalingPolicy::new(blocks),
            (true, None) => return Err(CouplingError::MissingParallelCoupling),
        };

        Ok(Self {
            initial_relaxation: options.base.initial_relaxation,
            singularity_limit: options.singularity_limit,
            beta: options.beta,
            mode: UpdateMode::from_flag(options.update_jacobian),
            reuse_threshold: options.base.reuse_information_starting_from_time_index,
            scaling,
            jacobian_cache: JacobianCache::default(),
            pending_jacobian: None,
        })
    }

    pub fn scaling(&self) -> &ScalingPolicy {
        &self.scaling
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Jacobian kept for reuse, if any.
    pub fn cached_jacobian(&self) -> Option<&DMatrix<f64>> {
        self.jacobian_cache.get()
    }

    fn startup_step(&mut self, residual: &DVector<f64>, target: &DVector<f64>) -> DVector<f64> {
        let reuse = self.mode == UpdateMode::JacobianUpdate;
        match self.jacobian_cache.matching(residual.len()) {
            Some(jacobian) if reuse => {
                info!("Anderson mixing: reusing the Jacobian of a previous time step");
                jacobian * (target - residual)
            }
            _ => {
                info!(
                    "fixed relaxation post processing with factor {}",
                    self.initial_relaxation
                );
                relaxation_step(residual, target, self.initial_relaxation)
            }
        }
    }

    fn mixing_step(
        &mut self,
        context: &UpdateContext<'_>,
        residual: &DVector<f64>,
        target: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        info!(
            "Anderson mixing: post processing with {} columns for the Jacobian",
            context.columns
        );

        let mut differences =
            DifferenceMatrices::from_history(context.history, residual.len(), context.columns)?;
        self.scaling.apply_to_matrix(&mut differences.residuals);
        self.scaling.apply_to_matrix(&mut differences.solutions);

        let svd = TruncatedSvd::new(differences.residuals.clone(), self.singularity_limit)?;

        match self.mode {
            UpdateMode::JacobianUpdate => {
                let previous = self.jacobian_cache.matching(residual.len());
                if previous.is_some() {
                    info!("Anderson mixing: reusing the Jacobian of a previous time step");
                }
                let jacobian = updated_jacobian(&differences, &svd, previous);
                let dx = &jacobian * (target - residual);
                self.pending_jacobian = Some(jacobian);
                Ok(dx)
            }
            UpdateMode::JacobianFree => Ok(coefficient_correction(
                &differences,
                &svd,
                residual,
                target,
                self.beta,
            )),
        }
    }
}

impl UpdateRule for AndersonMixing {
    fn name(&self) -> &'static str {
        "Anderson mixing"
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        self.scaling.check_dimension(len)
    }

    fn begin(&mut self) {
        self.pending_jacobian = None;
    }

    fn observe_output(&mut self, output: &DVector<f64>, time_index: usize) -> Result<()> {
        if self
            .scaling
            .compute_factors(output, time_index, self.reuse_threshold)?
        {
            self.jacobian_cache.invalidate();
        }
        Ok(())
    }

    fn correction(&mut self, context: &UpdateContext<'_>) -> Result<DVector<f64>> {
        let mut residual = context.residual.clone();
        let mut target = context.target.clone();
        self.scaling.apply_to_vector(&mut residual);
        self.scaling.apply_to_vector(&mut target);

        let mut dx = if context.columns == 0 {
            self.startup_step(&residual, &target)
        } else {
            self.mixing_step(context, &residual, &target)?
        };

        self.scaling.remove_from_vector(&mut dx);
        if dx.iter().any(|value| !value.is_finite()) {
            return Err(CouplingError::numerical("Anderson mixing correction"));
        }
        Ok(dx)
    }

    fn converged(&mut self, time_index: usize) {
        if let Some(jacobian) = self.pending_jacobian.take() {
            if time_index >= self.reuse_threshold {
                self.jacobian_cache.store(jacobian);
            }
        }
    }

    fn reset(&mut self) {
        self.jacobian_cache.invalidate();
        self.pending_jacobian = None;
        self.scaling.reset();
    }
}
