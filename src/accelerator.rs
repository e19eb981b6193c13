//! Fixed-point loop driving the coupled evaluation.
//!
//! One accelerate call evaluates the initial guess, then alternates between a
//! correction from the [`UpdateRule`] and a new evaluation until the selected
//! criterion is met or the evaluation budget is spent. The caller's iterate is
//! only written back when the call returns successfully.

use log::{info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::anderson::AndersonMixing;
use crate::convergence::Criterion;
use crate::error::{CouplingError, Result};
use crate::evaluator::{Evaluation, Evaluator};
use crate::options::{AndersonOptions, PostProcessingOptions};
use crate::postprocessing::{PostProcessing, UpdateContext, UpdateRule};
use crate::relaxation::FixedRelaxation;

/// Anderson mixing (IQN-ILS) accelerator.
pub type AndersonAccelerator<E> = Accelerator<E, AndersonMixing>;

/// Fixed under-relaxation accelerator.
pub type RelaxationAccelerator<E> = Accelerator<E, FixedRelaxation>;

/// Outcome of one accelerate call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSummary {
    /// Whether the convergence criterion was met.
    pub converged: bool,
    /// Number of corrections applied.
    pub iterations: usize,
    /// Number of evaluator calls, `iterations + 1`.
    pub evaluations: usize,
    /// Norm of `R - y` at the final iterate.
    pub residual_norm: f64,
    /// History columns used by the last correction.
    pub columns: usize,
}

/// Evaluator, shared bookkeeping and an update rule.
///
/// Not reentrant: history and cached state are mutated by every call.
#[derive(Debug)]
pub struct Accelerator<E, R> {
    evaluator: E,
    base: PostProcessing,
    rule: R,
}

impl<E: Evaluator> Accelerator<E, AndersonMixing> {
    /// Validates `options` and checks the parallel-coupling precondition of scaling.
    pub fn new(evaluator: E, options: AndersonOptions) -> Result<Self> {
        let rule = AndersonMixing::new(&options, evaluator.parallel_blocks())?;
        let base = PostProcessing::new(options.base)?;
        Ok(Self {
            evaluator,
            base,
            rule,
        })
    }
}

impl<E: Evaluator> Accelerator<E, FixedRelaxation> {
    /// Relaxes with `options.initial_relaxation` on every iteration.
    pub fn fixed_relaxation(evaluator: E, options: PostProcessingOptions) -> Result<Self> {
        let rule = FixedRelaxation::new(options.initial_relaxation)?;
        let base = PostProcessing::new(options)?;
        Ok(Self {
            evaluator,
            base,
            rule,
        })
    }
}

impl<E: Evaluator, R: UpdateRule> Accelerator<E, R> {
    /// Combines an arbitrary update rule with the shared bookkeeping.
    pub fn with_rule(evaluator: E, options: PostProcessingOptions, rule: R) -> Result<Self> {
        let base = PostProcessing::new(options)?;
        Ok(Self {
            evaluator,
            base,
            rule,
        })
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    /// Lifecycle and history bookkeeping.
    pub fn post_processing(&self) -> &PostProcessing {
        &self.base
    }

    pub fn set_number_of_stages(&mut self, stages: usize) -> Result<()> {
        self.base.set_number_of_stages(stages)
    }

    pub fn init_time_step(&mut self) -> Result<()> {
        self.base.init_time_step()
    }

    pub fn init_stage(&mut self, stage: usize) -> Result<()> {
        self.base.init_stage(stage)
    }

    pub fn finalize_stage(&mut self) -> Result<()> {
        self.base.finalize_stage()
    }

    pub fn finalize_time_step(&mut self) -> Result<()> {
        self.base.finalize_time_step()
    }

    pub fn time_index(&self) -> usize {
        self.base.time_index()
    }

    /// Drops history and cached state, e.g. after an evaluation failure.
    pub fn reset(&mut self) {
        self.base.reset();
        self.rule.reset();
    }

    /// Drives `R(x)` to zero starting from `x0`, converging on the residual norm.
    pub fn accelerate(
        &mut self,
        x0: &DVector<f64>,
        xk: &mut DVector<f64>,
    ) -> Result<AccelerationSummary> {
        let y = DVector::zeros(x0.len());
        self.run(&y, x0, xk, Criterion::Residual)
    }

    /// Drives `R(x)` to `y` starting from `x0`, converging on the sequence of outputs.
    pub fn accelerate_with_offset(
        &mut self,
        y: &DVector<f64>,
        x0: &DVector<f64>,
        xk: &mut DVector<f64>,
    ) -> Result<AccelerationSummary> {
        self.run(y, x0, xk, Criterion::IterationSequence)
    }

    fn run(
        &mut self,
        y: &DVector<f64>,
        x0: &DVector<f64>,
        xk: &mut DVector<f64>,
        criterion: Criterion,
    ) -> Result<AccelerationSummary> {
        let n = x0.len();
        if n == 0 {
            return Err(CouplingError::dimension_mismatch("initial guess length", 1, 0));
        }
        if y.len() != n {
            return Err(CouplingError::dimension_mismatch("offset length", n, y.len()));
        }
        if xk.len() != n {
            return Err(CouplingError::dimension_mismatch("iterate length", n, xk.len()));
        }
        self.base.ensure_stage_ready()?;
        self.rule.check_dimension(n)?;
        self.base.begin_sequence();
        self.base.history().check_dimension(n)?;
        self.rule.begin();
        let max_iterations = self.base.options().max_iterations;
        let time_index = self.base.time_index();

        let mut x = x0.clone();
        let evaluation = self.evaluate(&x, 0)?;
        self.rule.observe_output(&evaluation.output, time_index)?;
        self.base
            .history_mut()
            .record(x.clone(), evaluation.residual.clone())?;

        if self.base.convergence_mut().is_converged(
            criterion,
            &evaluation.output,
            &evaluation.residual,
            y,
        ) {
            self.base.iterations_converged(criterion);
            let summary = summarize(true, 0, 0, &evaluation.residual, y);
            info!(
                "{} converged on the initial guess (residual norm {:e})",
                self.rule.name(),
                summary.residual_norm
            );
            *xk = x;
            return Ok(summary);
        }

        let mut residual = evaluation.residual;
        let mut columns = 0usize;

        for iteration in 1..max_iterations {
            columns = self.base.available_columns(n);
            let dx = self.rule.correction(&UpdateContext {
                history: self.base.history(),
                columns,
                residual: &residual,
                target: y,
            })?;
            x += dx;

            let evaluation = self.evaluate(&x, iteration)?;
            self.base
                .history_mut()
                .record(x.clone(), evaluation.residual.clone())?;

            if self.base.convergence_mut().is_converged(
                criterion,
                &evaluation.output,
                &evaluation.residual,
                y,
            ) {
                self.base.iterations_converged(criterion);
                self.rule.converged(time_index);
                let summary = summarize(true, iteration, columns, &evaluation.residual, y);
                info!(
                    "{} converged after {} iterations (residual norm {:e})",
                    self.rule.name(),
                    iteration,
                    summary.residual_norm
                );
                *xk = x;
                return Ok(summary);
            }

            self.rule.observe_output(&evaluation.output, time_index)?;
            residual = evaluation.residual;
        }

        let summary = summarize(false, max_iterations - 1, columns, &residual, y);
        warn!(
            "{} did not converge within {} evaluations (residual norm {:e})",
            self.rule.name(),
            max_iterations,
            summary.residual_norm
        );
        *xk = x;
        Ok(summary)
    }

    fn evaluate(&mut self, input: &DVector<f64>, iteration: usize) -> Result<Evaluation> {
        let evaluation = self
            .evaluator
            .evaluate(input)
            .map_err(|source| CouplingError::Evaluation { iteration, source })?;
        if evaluation.output.len() != input.len() {
            return Err(CouplingError::dimension_mismatch(
                "evaluator output length",
                input.len(),
                evaluation.output.len(),
            ));
        }
        if evaluation.residual.len() != input.len() {
            return Err(CouplingError::dimension_mismatch(
                "evaluator residual length",
                input.len(),
                evaluation.residual.len(),
            ));
        }
        Ok(evaluation)
    }
}

fn summarize(
    converged: bool,
    iterations: usize,
    columns: usize,
    residual: &DVector<f64>,
    target: &DVector<f64>,
) -> AccelerationSummary {
    AccelerationSummary {
        converged,
        iterations,
        evaluations: iterations + 1,
        residual_norm: (residual - target).norm(),
        columns,
    }
}
