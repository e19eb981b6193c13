//! Termination criteria and the history retention rule applied on convergence.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::options::ConvergenceOptions;

/// Which quantity decides convergence of an accelerate call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    /// Relative change between successive evaluator outputs.
    IterationSequence,
    /// Magnitude of the coupling residual `R - y`.
    Residual,
}

/// Evaluates the selected criterion, remembering the previous output.
#[derive(Clone, Debug)]
pub struct ConvergenceChecker {
    tolerance: f64,
    previous_output: Option<DVector<f64>>,
}

impl ConvergenceChecker {
    pub fn new(options: &ConvergenceOptions) -> Self {
        Self {
            tolerance: options.tolerance,
            previous_output: None,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Forgets the previous output; called at the start of every accelerate call.
    pub fn reset(&mut self) {
        self.previous_output = None;
    }

    /// Checks convergence after an evaluation.
    ///
    /// The residual criterion accepts `||R - y|| < tolerance`. The sequence
    /// criterion accepts `||output - previous|| < tolerance * ||output||` and
    /// never accepts the first evaluation of a call.
    pub fn is_converged(
        &mut self,
        criterion: Criterion,
        output: &DVector<f64>,
        residual: &DVector<f64>,
        target: &DVector<f64>,
    ) -> bool {
        let converged = match criterion {
            Criterion::Residual => (residual - target).norm() < self.tolerance,
            Criterion::IterationSequence => match &self.previous_output {
                Some(previous) => (output - previous).norm() < self.tolerance * output.norm(),
                None => false,
            },
        };
        self.previous_output = Some(output.clone());
        converged
    }

    /// Whether the just-converged window should join the retained history.
    ///
    /// Kept when the residual criterion decided convergence, or when nothing
    /// has been retained for the current stage yet.
    pub fn keep_iterations(criterion: Criterion, has_stage_history: bool) -> bool {
        criterion == Criterion::Residual || !has_stage_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(tolerance: f64) -> ConvergenceChecker {
        ConvergenceChecker::new(&ConvergenceOptions { tolerance })
    }

    #[test]
    fn residual_criterion_uses_offset() {
        let mut checker = checker(1e-6);
        let output = DVector::from_vec(vec![1.0, 2.0]);
        let residual = DVector::from_vec(vec![0.5, 0.5]);
        let zero = DVector::zeros(2);

        assert!(!checker.is_converged(Criterion::Residual, &output, &residual, &zero));
        assert!(checker.is_converged(Criterion::Residual, &output, &residual, &residual));
    }

    #[test]
    fn sequence_criterion_needs_two_outputs() {
        let mut checker = checker(1e-3);
        let sequence = Criterion::IterationSequence;
        let zero = DVector::zeros(2);
        let output = DVector::from_vec(vec![10.0, 0.0]);

        assert!(!checker.is_converged(sequence, &output, &zero, &zero));
        let close = DVector::from_vec(vec![10.001, 0.0]);
        assert!(checker.is_converged(sequence, &close, &zero, &zero));

        checker.reset();
        assert!(!checker.is_converged(sequence, &close, &zero, &zero));
    }

    #[test]
    fn retention_rule() {
        assert!(ConvergenceChecker::keep_iterations(Criterion::Residual, true));
        assert!(ConvergenceChecker::keep_iterations(Criterion::Residual, false));
        assert!(ConvergenceChecker::keep_iterations(Criterion::IterationSequence, false));
        assert!(!ConvergenceChecker::keep_iterations(Criterion::IterationSequence, true));
    }
}
