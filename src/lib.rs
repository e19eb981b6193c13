//! Quasi-Newton acceleration of partitioned fluid–structure coupling.
//!
//! Two independently converged solvers exchange interface data until a joint
//! fixed point is reached. This crate treats the pair of solvers as a black
//! box [`Evaluator`](evaluator::Evaluator) and accelerates the fixed-point
//! iteration with Anderson mixing (IQN-ILS). It provides
//!
//! - per-block scaling of heterogeneous interface unknowns (`scaling` module),
//! - a history of `(solution, residual)` samples reused across iterations,
//!   coupling stages and time steps (`history` module),
//! - the truncated-SVD least-squares kernel with an explicit Jacobian update
//!   or a Jacobian-free coefficient solve (`kernel` module), and
//! - the fixed-point loop shared by all update rules (`accelerator` module).
//!
//! # Quick start
//!
//! ```no_run
//! use fsi_iqn::evaluator::{Evaluation, FnEvaluator};
//! use fsi_iqn::{AndersonAccelerator, AndersonOptions};
//! use nalgebra::{DMatrix, DVector};
//!
//! let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.2, -0.1, 0.3]);
//! let evaluator = FnEvaluator::new(move |x: &DVector<f64>| {
//!     let output = &a * x;
//!     let residual = &output - x;
//!     Ok(Evaluation::new(output, residual))
//! });
//!
//! let mut accelerator =
//!     AndersonAccelerator::new(evaluator, AndersonOptions::default()).expect("valid options");
//! accelerator.init_time_step().expect("no open stage");
//! accelerator.init_stage(0).expect("single stage");
//!
//! let x0 = DVector::from_vec(vec![1.0, 1.0]);
//! let mut xk = x0.clone();
//! let summary = accelerator.accelerate(&x0, &mut xk).expect("evaluations succeed");
//! println!("converged: {} after {} iterations", summary.converged, summary.iterations);
//! ```

pub mod accelerator;
pub mod anderson;
pub mod convergence;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod kernel;
pub mod options;
pub mod postprocessing;
pub mod relaxation;
pub mod scaling;

pub use accelerator::{
    AccelerationSummary, Accelerator, AndersonAccelerator, RelaxationAccelerator,
};
pub use error::{CouplingError, Result};
pub use options::{AndersonOptions, ConvergenceOptions, PostProcessingOptions};
