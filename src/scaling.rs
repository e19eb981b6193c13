//! Per-block normalization of the interface unknowns.
//!
//! With parallel coupling the interface vector stacks two physically different
//! quantities (for instance displacement and traction). Dividing each block by
//! the norm of the corresponding output block keeps the least-squares problem
//! of the quasi-Newton kernel well conditioned.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::error::{CouplingError, Result};
use crate::evaluator::BlockSizes;

/// Factors below this magnitude are replaced by one.
const NEGLIGIBLE_FACTOR: f64 = 1e-13;

/// Scaling factors of the two interface blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingPolicy {
    blocks: Option<BlockSizes>,
    factors: [f64; 2],
}

impl ScalingPolicy {
    /// Scaling switched off; every operation is the identity.
    pub fn disabled() -> Self {
        Self {
            blocks: None,
            factors: [1.0, 1.0],
        }
    }

    /// Scaling over the given blocks, starting from unit factors.
    pub fn new(blocks: BlockSizes) -> Self {
        Self {
            blocks: Some(blocks),
            factors: [1.0, 1.0],
        }
    }

    /// Whether the policy changes vectors at all.
    pub fn is_enabled(&self) -> bool {
        self.blocks.is_some()
    }

    pub fn blocks(&self) -> Option<BlockSizes> {
        self.blocks
    }

    pub fn factors(&self) -> [f64; 2] {
        self.factors
    }

    /// Checks that a vector of length `len` is made of the two blocks.
    pub fn check_dimension(&self, len: usize) -> Result<()> {
        match self.blocks {
            Some(blocks) if blocks.total() != len => Err(CouplingError::dimension_mismatch(
                "scaling block sizes",
                blocks.total(),
                len,
            )),
            _ => Ok(()),
        }
    }

    /// Recomputes the factors from the block norms of `output` while
    /// `time_index <= threshold`.
    ///
    /// Returns `true` when the factors were recomputed, in which case any
    /// Jacobian expressed in the old scaled space is stale.
    pub fn compute_factors(
        &mut self,
        output: &DVector<f64>,
        time_index: usize,
        threshold: usize,
    ) -> Result<bool> {
        let Some(blocks) = self.blocks else {
            return Ok(false);
        };
        if time_index > threshold {
            return Ok(false);
        }
        self.check_dimension(output.len())?;

        self.factors = [
            output.rows(0, blocks.first).norm(),
            output.rows(blocks.first, blocks.second).norm(),
        ];
        for factor in self.factors.iter_mut() {
            if factor.abs() < NEGLIGIBLE_FACTOR {
                *factor = 1.0;
            }
        }
        if self.factors.iter().any(|factor| !factor.is_finite()) {
            return Err(CouplingError::numerical("scaling factor computation"));
        }

        debug!(
            "parallel coupling with scaling factors {} and {}",
            self.factors[0], self.factors[1]
        );
        Ok(true)
    }

    /// Enters the scaled space: divides each block by its factor.
    pub fn apply_to_vector(&self, vector: &mut DVector<f64>) {
        if let Some(blocks) = self.blocks {
            let [first, second] = self.factors;
            vector.rows_mut(0, blocks.first).apply(|v| *v /= first);
            vector
                .rows_mut(blocks.first, blocks.second)
                .apply(|v| *v /= second);
        }
    }

    /// Enters the scaled space row-wise for every column of `matrix`.
    pub fn apply_to_matrix(&self, matrix: &mut DMatrix<f64>) {
        if let Some(blocks) = self.blocks {
            let [first, second] = self.factors;
            matrix.rows_mut(0, blocks.first).apply(|v| *v /= first);
            matrix
                .rows_mut(blocks.first, blocks.second)
                .apply(|v| *v /= second);
        }
    }

    /// Leaves the scaled space: multiplies each block by its factor.
    pub fn remove_from_vector(&self, vector: &mut DVector<f64>) {
        if let Some(blocks) = self.blocks {
            let [first, second] = self.factors;
            vector.rows_mut(0, blocks.first).apply(|v| *v *= first);
            vector
                .rows_mut(blocks.first, blocks.second)
                .apply(|v| *v *= second);
        }
    }

    /// Leaves the scaled space row-wise for every column of `matrix`.
    pub fn remove_from_matrix(&self, matrix: &mut DMatrix<f64>) {
        if let Some(blocks) = self.blocks {
            let [first, second] = self.factors;
            matrix.rows_mut(0, blocks.first).apply(|v| *v *= first);
            matrix
                .rows_mut(blocks.first, blocks.second)
                .apply(|v| *v *= second);
        }
    }

    /// Forgets the computed factors.
    pub fn reset(&mut self) {
        self.factors = [1.0, 1.0];
    }
}
