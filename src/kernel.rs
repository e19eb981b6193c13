//! Linear algebra of the quasi-Newton correction.
//!
//! The history is turned into two difference matrices: `V` holds consecutive
//! residual differences and `W` the matching solution differences. A thin SVD
//! of `V` with hard truncation of small singular values gives a least-squares
//! pseudoinverse, which is used either to update an explicit approximate
//! Jacobian or to solve for the mixing coefficients directly.

use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};

use crate::error::{CouplingError, Result};
use crate::history::HistoryStore;

/// Iteration cap of the bidiagonal SVD sweep.
const MAX_SVD_ITERATIONS: usize = 1_000;

/// How a correction is derived from the truncated SVD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    /// Build `J` explicitly and apply it to the residual.
    JacobianUpdate,
    /// Solve for the coefficients of the history columns.
    JacobianFree,
}

impl UpdateMode {
    pub fn from_flag(update_jacobian: bool) -> Self {
        if update_jacobian {
            Self::JacobianUpdate
        } else {
            Self::JacobianFree
        }
    }
}

/// Residual (`V`) and solution (`W`) difference matrices, column-aligned.
#[derive(Clone, Debug)]
pub struct DifferenceMatrices {
    pub residuals: DMatrix<f64>,
    pub solutions: DMatrix<f64>,
}

impl DifferenceMatrices {
    /// Fills `columns` columns from the history in priority order.
    pub fn from_history(history: &HistoryStore, dimension: usize, columns: usize) -> Result<Self> {
        let mut residuals = DMatrix::zeros(dimension, columns);
        let mut solutions = DMatrix::zeros(dimension, columns);
        let mut filled = 0usize;

        for (column, (newer, older)) in history.difference_pairs().take(columns).enumerate() {
            residuals.set_column(column, &(&newer.residual - &older.residual));
            solutions.set_column(column, &(&newer.solution - &older.solution));
            filled += 1;
        }

        if filled != columns {
            return Err(CouplingError::dimension_mismatch(
                "history difference columns",
                columns,
                filled,
            ));
        }
        Ok(Self {
            residuals,
            solutions,
        })
    }

    pub fn columns(&self) -> usize {
        self.residuals.ncols()
    }
}

/// Inverts the singular values above `limit` and zeroes the rest.
pub fn inverse_singular_values(singular_values: &DVector<f64>, limit: f64) -> DVector<f64> {
    singular_values.map(|sigma| if sigma > limit { 1.0 / sigma } else { 0.0 })
}

/// Thin SVD `V = U Σ Vᵀ` with the truncated inverse of `Σ`.
#[derive(Clone, Debug)]
pub struct TruncatedSvd {
    u: DMatrix<f64>,
    v_t: DMatrix<f64>,
    singular_values: DVector<f64>,
    inverse: DVector<f64>,
}

impl TruncatedSvd {
    /// Decomposes `matrix`, discarding directions with `σ <= limit`.
    pub fn new(matrix: DMatrix<f64>, limit: f64) -> Result<Self> {
        if matrix.iter().any(|value| !value.is_finite()) {
            return Err(CouplingError::numerical("history difference matrix"));
        }
        let svd = SVD::try_new(matrix, true, true, f64::EPSILON, MAX_SVD_ITERATIONS)
            .ok_or_else(|| CouplingError::numerical("singular value decomposition"))?;
        let u = svd
            .u
            .ok_or_else(|| CouplingError::numerical("left singular vectors"))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| CouplingError::numerical("right singular vectors"))?;
        let inverse = inverse_singular_values(&svd.singular_values, limit);

        Ok(Self {
            u,
            v_t,
            singular_values: svd.singular_values,
            inverse,
        })
    }

    pub fn singular_values(&self) -> &DVector<f64> {
        &self.singular_values
    }

    /// Number of directions kept after truncation.
    pub fn rank(&self) -> usize {
        self.inverse.iter().filter(|value| **value != 0.0).count()
    }

    /// `V⁺ = V_mat · diag(σ⁻¹) · Uᵀ`.
    pub fn pseudoinverse(&self) -> DMatrix<f64> {
        self.v_t.transpose() * DMatrix::from_diagonal(&self.inverse) * self.u.transpose()
    }

    /// Least-squares coefficients `V⁺ · rhs`, without forming `V⁺`.
    pub fn solve(&self, rhs: &DVector<f64>) -> DVector<f64> {
        let projected = self.u.tr_mul(rhs).component_mul(&self.inverse);
        self.v_t.tr_mul(&projected)
    }
}

/// Explicit Jacobian from the history.
///
/// Refines `previous` with `J = Jprev + (W - Jprev V) V⁺` when given, otherwise
/// starts from `J = (V + W) V⁺ - I`.
pub fn updated_jacobian(
    differences: &DifferenceMatrices,
    svd: &TruncatedSvd,
    previous: Option<&DMatrix<f64>>,
) -> DMatrix<f64> {
    let v = &differences.residuals;
    let w = &differences.solutions;
    let pseudoinverse = svd.pseudoinverse();

    match previous {
        Some(jacobian) => jacobian + (w - jacobian * v) * pseudoinverse,
        None => {
            let n = v.nrows();
            (v + w) * pseudoinverse - DMatrix::identity(n, n)
        }
    }
}

/// Jacobian-free correction `β (R - y) + W c + β V c` with `c = V⁺ (y - R)`.
pub fn coefficient_correction(
    differences: &DifferenceMatrices,
    svd: &TruncatedSvd,
    residual: &DVector<f64>,
    target: &DVector<f64>,
    beta: f64,
) -> DVector<f64> {
    let coefficients = svd.solve(&(target - residual));
    let v_c = &differences.residuals * &coefficients;
    let w_c = &differences.solutions * &coefficients;
    (residual - target) * beta + w_c + v_c * beta
}

/// Start-up step without history: `ω (R - y)`.
pub fn relaxation_step(
    residual: &DVector<f64>,
    target: &DVector<f64>,
    relaxation: f64,
) -> DVector<f64> {
    (residual - target) * relaxation
}

/// Approximate Jacobian kept across accelerate calls and time steps.
#[derive(Clone, Debug, Default)]
pub struct JacobianCache {
    matrix: Option<DMatrix<f64>>,
}

impl JacobianCache {
    /// Returns the cached Jacobian if it acts on vectors of length `dimension`;
    /// a cached matrix of any other size is dropped.
    pub fn matching(&mut self, dimension: usize) -> Option<&DMatrix<f64>> {
        let matches = self
            .matrix
            .as_ref()
            .map(|matrix| matrix.nrows() == dimension && matrix.ncols() == dimension);
        if matches == Some(false) {
            self.invalidate();
        }
        self.matrix.as_ref()
    }

    pub fn get(&self) -> Option<&DMatrix<f64>> {
        self.matrix.as_ref()
    }

    pub fn store(&mut self, jacobian: DMatrix<f64>) {
        self.matrix = Some(jacobian);
    }

    pub fn invalidate(&mut self) {
        self.matrix = None;
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_none()
    }
}
