//! Bookkeeping shared by every post processing strategy: time step and stage
//! lifecycle, the sample history, and the convergence checker.
//!
//! Strategies differ only in how they turn the history into a correction,
//! which is what [`UpdateRule`] captures.

use log::debug;
use nalgebra::DVector;

use crate::convergence::{ConvergenceChecker, Criterion};
use crate::error::{CouplingError, Result};
use crate::history::HistoryStore;
use crate::options::PostProcessingOptions;

/// Inputs of a single correction.
#[derive(Clone, Copy, Debug)]
pub struct UpdateContext<'a> {
    /// Samples of the current call and the retained windows.
    pub history: &'a HistoryStore,
    /// Number of difference columns the rule may draw from `history`.
    pub columns: usize,
    /// Residual of the latest evaluation.
    pub residual: &'a DVector<f64>,
    /// Value the residual is driven to (`y`, zero for the unforced variant).
    pub target: &'a DVector<f64>,
}

/// Strategy turning the coupling history into a correction of the iterate.
pub trait UpdateRule {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Rejects interface vectors of length `len` before any evaluation.
    fn check_dimension(&self, _len: usize) -> Result<()> {
        Ok(())
    }

    /// Called at the start of every accelerate call.
    fn begin(&mut self) {}

    /// Called with the raw output of each evaluation that did not converge,
    /// and with the output of the first evaluation of a call.
    fn observe_output(&mut self, _output: &DVector<f64>, _time_index: usize) -> Result<()> {
        Ok(())
    }

    /// Correction `dx` to add to the current iterate, in unscaled space.
    fn correction(&mut self, context: &UpdateContext<'_>) -> Result<DVector<f64>>;

    /// Called once the call converged after at least one correction.
    fn converged(&mut self, _time_index: usize) {}

    /// Drops state carried across calls.
    fn reset(&mut self) {}
}

/// Lifecycle and history bookkeeping of a coupling post processing.
#[derive(Clone, Debug)]
pub struct PostProcessing {
    options: PostProcessingOptions,
    history: HistoryStore,
    convergence: ConvergenceChecker,
    time_index: usize,
    stage_index: usize,
    stages: usize,
    stage_initialized: bool,
}

impl PostProcessing {
    /// Validates `options` and starts at time index zero with a single stage.
    pub fn new(options: PostProcessingOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            history: HistoryStore::new(options.nb_reuse),
            convergence: ConvergenceChecker::new(&options.convergence),
            options,
            time_index: 0,
            stage_index: 0,
            stages: 1,
            stage_initialized: false,
        })
    }

    pub fn options(&self) -> &PostProcessingOptions {
        &self.options
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    pub fn convergence_mut(&mut self) -> &mut ConvergenceChecker {
        &mut self.convergence
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    /// Sets the number of implicit stages per time step.
    pub fn set_number_of_stages(&mut self, stages: usize) -> Result<()> {
        if stages == 0 {
            return Err(CouplingError::invalid_configuration(
                "stages",
                "at least one stage per time step is required",
            ));
        }
        self.stages = stages;
        Ok(())
    }

    /// Opens a time step.
    pub fn init_time_step(&mut self) -> Result<()> {
        if self.stage_initialized {
            return Err(CouplingError::TimeStepInProgress {
                stage: self.stage_index,
            });
        }
        self.stage_index = 0;
        self.history.set_stage(0);
        Ok(())
    }

    /// Opens coupling stage `stage` of the current time step.
    pub fn init_stage(&mut self, stage: usize) -> Result<()> {
        if stage >= self.stages {
            return Err(CouplingError::StageOutOfRange {
                stage,
                stages: self.stages,
            });
        }
        self.stage_index = stage;
        self.stage_initialized = true;
        self.history.set_stage(stage);
        Ok(())
    }

    /// Closes the current stage.
    pub fn finalize_stage(&mut self) -> Result<()> {
        if !self.stage_initialized {
            return Err(CouplingError::StageNotInitialized);
        }
        self.stage_initialized = false;
        Ok(())
    }

    /// Closes the time step, carrying its history forward when reuse is active.
    pub fn finalize_time_step(&mut self) -> Result<()> {
        if self.stage_initialized {
            return Err(CouplingError::TimeStepInProgress {
                stage: self.stage_index,
            });
        }
        let keep = self.options.nb_reuse > 0
            && self.time_index >= self.options.reuse_information_starting_from_time_index;
        self.history.roll_time_step(keep);
        debug!(
            "finalized time step {} (history kept: {}, past steps retained: {})",
            self.time_index,
            keep,
            self.history.time_step_count()
        );
        self.time_index += 1;
        self.stage_index = 0;
        Ok(())
    }

    /// Fails unless a stage within the configured count is open.
    pub fn ensure_stage_ready(&self) -> Result<()> {
        if !self.stage_initialized {
            return Err(CouplingError::StageNotInitialized);
        }
        if self.stage_index >= self.stages {
            return Err(CouplingError::StageOutOfRange {
                stage: self.stage_index,
                stages: self.stages,
            });
        }
        Ok(())
    }

    /// Starts a new iteration sequence.
    pub fn begin_sequence(&mut self) {
        self.history.clear_window();
        self.convergence.reset();
    }

    /// History columns available for a vector of length `dimension`.
    pub fn available_columns(&self, dimension: usize) -> usize {
        self.history
            .available_columns(dimension, self.options.max_used_iterations)
    }

    /// Closes a converged sequence, retaining the window per the rule of
    /// [`ConvergenceChecker::keep_iterations`].
    pub fn iterations_converged(&mut self, criterion: Criterion) {
        let keep = ConvergenceChecker::keep_iterations(criterion, self.history.has_stage_history());
        self.history.roll_stage(keep);
    }

    /// Drops all history and returns to time index zero.
    pub fn reset(&mut self) {
        self.history.clear();
        self.convergence.reset();
        self.time_index = 0;
        self.stage_index = 0;
        self.stage_initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(nb_reuse: usize) -> PostProcessing {
        let options = PostProcessingOptions::default().with_nb_reuse(nb_reuse);
        PostProcessing::new(options).unwrap()
    }

    fn record_sequence(base: &mut PostProcessing, len: usize) {
        base.begin_sequence();
        for i in 0..len {
            let value = DVector::from_element(2, i as f64);
            base.history_mut().record(value.clone(), value).unwrap();
        }
    }

    #[test]
    fn accelerate_requires_open_stage() {
        let mut base = base(0);
        assert!(matches!(
            base.ensure_stage_ready(),
            Err(CouplingError::StageNotInitialized)
        ));

        base.init_time_step().unwrap();
        base.init_stage(0).unwrap();
        assert!(base.ensure_stage_ready().is_ok());

        base.finalize_stage().unwrap();
        assert!(base.ensure_stage_ready().is_err());
    }

    #[test]
    fn stage_index_is_bounded() {
        let mut base = base(0);
        base.set_number_of_stages(2).unwrap();
        assert!(base.init_stage(1).is_ok());
        assert!(matches!(
            base.init_stage(2),
            Err(CouplingError::StageOutOfRange {
                stage: 2,
                stages: 2
            })
        ));
        assert!(base.set_number_of_stages(0).is_err());
    }

    #[test]
    fn time_step_cannot_close_with_open_stage() {
        let mut base = base(1);
        base.init_time_step().unwrap();
        base.init_stage(0).unwrap();
        assert!(matches!(
            base.finalize_time_step(),
            Err(CouplingError::TimeStepInProgress { stage: 0 })
        ));
    }

    #[test]
    fn sequence_criterion_keeps_only_first_window_of_stage() {
        let mut base = base(0);
        base.init_time_step().unwrap();
        base.init_stage(0).unwrap();

        record_sequence(&mut base, 3);
        base.iterations_converged(Criterion::IterationSequence);
        assert_eq!(base.history().stage_window_count(), 1);

        record_sequence(&mut base, 3);
        base.iterations_converged(Criterion::IterationSequence);
        assert_eq!(base.history().stage_window_count(), 1);

        record_sequence(&mut base, 3);
        base.iterations_converged(Criterion::Residual);
        assert_eq!(base.history().stage_window_count(), 2);
        assert_eq!(base.available_columns(10), 4);
    }

    #[test]
    fn time_steps_roll_history_forward() {
        let mut base = base(1);
        for _ in 0..3 {
            base.init_time_step().unwrap();
            base.init_stage(0).unwrap();
            record_sequence(&mut base, 3);
            base.iterations_converged(Criterion::Residual);
            base.finalize_stage().unwrap();
            base.finalize_time_step().unwrap();
        }

        assert_eq!(base.time_index(), 3);
        assert_eq!(base.history().time_step_count(), 1);
        assert_eq!(base.available_columns(10), 2);
    }

    #[test]
    fn reuse_threshold_delays_time_history() {
        let options = PostProcessingOptions::default()
            .with_nb_reuse(2)
            .with_reuse_starting_from(1);
        let mut base = PostProcessing::new(options).unwrap();

        base.init_time_step().unwrap();
        base.init_stage(0).unwrap();
        record_sequence(&mut base, 3);
        base.iterations_converged(Criterion::Residual);
        base.finalize_stage().unwrap();
        base.finalize_time_step().unwrap();
        assert_eq!(base.available_columns(10), 0);

        base.init_time_step().unwrap();
        base.init_stage(0).unwrap();
        record_sequence(&mut base, 3);
        base.iterations_converged(Criterion::Residual);
        base.finalize_stage().unwrap();
        base.finalize_time_step().unwrap();
        assert_eq!(base.available_columns(10), 2);
    }
}
