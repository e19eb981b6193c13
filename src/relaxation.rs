//! Fixed under-relaxation: `x <- x + ω (R - y)` regardless of history.

use log::info;
use nalgebra::DVector;

use crate::error::{CouplingError, Result};
use crate::kernel::relaxation_step;
use crate::postprocessing::{UpdateContext, UpdateRule};

/// Constant relaxation factor, the baseline the quasi-Newton rule improves on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedRelaxation {
    factor: f64,
}

impl FixedRelaxation {
    pub fn new(factor: f64) -> Result<Self> {
        if !(factor > 0.0) {
            return Err(CouplingError::invalid_configuration(
                "initial_relaxation",
                format!("must be positive, found {factor}"),
            ));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl UpdateRule for FixedRelaxation {
    fn name(&self) -> &'static str {
        "fixed relaxation"
    }

    fn correction(&mut self, context: &UpdateContext<'_>) -> Result<DVector<f64>> {
        info!("fixed relaxation post processing with factor {}", self.factor);
        Ok(relaxation_step(context.residual, context.target, self.factor))
    }
}
