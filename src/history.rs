//! Windowed storage of `(solution, residual)` samples across iterations,
//! coupling stages and time steps.
//!
//! Retained windows live in one flat arena of samples. Each window is a
//! `Span` into the arena tagged with the time step and stage it was recorded
//! in, so the priority order used by the quasi-Newton kernel is a sort over
//! span tags rather than a walk over nested containers.

use std::cmp::Reverse;

use log::debug;
use nalgebra::DVector;

use crate::error::{CouplingError, Result};

/// One evaluation: the input that was evaluated and the residual it produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub solution: DVector<f64>,
    pub residual: DVector<f64>,
}

/// A retained window, stored most-recent-first at `start..start + len` in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    time_step: usize,
    stage: usize,
    start: usize,
    len: usize,
}

/// History of the current accelerate call plus the windows kept for reuse.
#[derive(Clone, Debug, Default)]
pub struct HistoryStore {
    /// Current window in chronological order; exposed most-recent-first.
    window: Vec<Sample>,
    arena: Vec<Sample>,
    spans: Vec<Span>,
    /// Counter of the open time step; spans with a smaller tag are time history.
    time_step: usize,
    stage: usize,
    nb_reuse: usize,
}

impl HistoryStore {
    /// Creates an empty store that keeps at most `nb_reuse` past time steps.
    pub fn new(nb_reuse: usize) -> Self {
        Self {
            nb_reuse,
            ..Self::default()
        }
    }

    /// Dimension shared by the stored samples; `None` once nothing is stored.
    pub fn dimension(&self) -> Option<usize> {
        self.window
            .first()
            .or_else(|| self.arena.first())
            .map(|sample| sample.solution.len())
    }

    /// Checks that vectors of length `len` can be mixed with the stored history.
    pub fn check_dimension(&self, len: usize) -> Result<()> {
        match self.dimension() {
            Some(dimension) if dimension != len => Err(CouplingError::dimension_mismatch(
                "history vector length",
                dimension,
                len,
            )),
            _ => Ok(()),
        }
    }

    /// Prepends a sample to the current window.
    pub fn record(&mut self, solution: DVector<f64>, residual: DVector<f64>) -> Result<()> {
        if solution.len() != residual.len() {
            return Err(CouplingError::dimension_mismatch(
                "residual length",
                solution.len(),
                residual.len(),
            ));
        }
        self.check_dimension(solution.len())?;
        self.window.push(Sample { solution, residual });
        Ok(())
    }

    /// Number of samples in the current window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Samples of the current window, most recent first.
    pub fn window(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.window.iter().rev()
    }

    /// Starts a new iteration sequence.
    pub fn clear_window(&mut self) {
        self.window.clear();
    }

    /// Stage under which retained windows are tagged.
    pub fn set_stage(&mut self, stage: usize) {
        self.stage = stage;
    }

    /// Whether a window has already been retained for the current stage.
    pub fn has_stage_history(&self) -> bool {
        self.spans
            .iter()
            .any(|span| span.time_step == self.time_step && span.stage == self.stage)
    }

    /// Number of retained windows from the current time step.
    pub fn stage_window_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|span| span.time_step == self.time_step)
            .count()
    }

    /// Number of past time steps that still contribute windows.
    pub fn time_step_count(&self) -> usize {
        let mut steps: Vec<usize> = self
            .spans
            .iter()
            .filter(|span| span.time_step < self.time_step)
            .map(|span| span.time_step)
            .collect();
        steps.dedup();
        steps.len()
    }

    /// Number of difference columns the kernel may use.
    ///
    /// Every window with `n` samples carries `n - 1` consecutive differences;
    /// the total is capped by the vector dimension and by `cap`.
    pub fn available_columns(&self, dimension: usize, cap: usize) -> usize {
        let current = self.window.len().saturating_sub(1);
        let retained: usize = self.spans.iter().map(|span| span.len - 1).sum();
        (current + retained).min(dimension).min(cap)
    }

    /// Closes the current window, keeping it as stage history when `retain` is set.
    ///
    /// A window with fewer than two samples has no difference to offer and is
    /// dropped either way.
    pub fn roll_stage(&mut self, retain: bool) {
        if retain && self.window.len() >= 2 {
            let start = self.arena.len();
            let len = self.window.len();
            self.arena.extend(self.window.drain(..).rev());
            self.spans.push(Span {
                time_step: self.time_step,
                stage: self.stage,
                start,
                len,
            });
            debug!(
                "retained {} samples for stage {} of time step {}",
                len, self.stage, self.time_step
            );
        }
        self.window.clear();
    }

    /// Turns the stage history of the open time step into time history, or
    /// drops it when `keep` is unset, then evicts all but the newest
    /// `nb_reuse` time steps.
    pub fn roll_time_step(&mut self, keep: bool) {
        let closing = self.time_step;
        if !keep {
            self.spans.retain(|span| span.time_step != closing);
        }
        self.time_step += 1;
        self.stage = 0;
        self.window.clear();

        let mut steps: Vec<usize> = self.spans.iter().map(|span| span.time_step).collect();
        steps.dedup();
        if steps.len() > self.nb_reuse {
            let oldest_kept = steps[steps.len() - self.nb_reuse..]
                .first()
                .copied()
                .unwrap_or(usize::MAX);
            self.spans.retain(|span| span.time_step >= oldest_kept);
            debug!(
                "evicted time history older than time step {}",
                oldest_kept.min(self.time_step)
            );
        }
        self.compact();
    }

    /// Drops every sample, retained or not.
    pub fn clear(&mut self) {
        self.window.clear();
        self.arena.clear();
        self.spans.clear();
    }

    /// Consecutive sample pairs `(newer, older)` in kernel priority order.
    ///
    /// Current window first (most recent first); then the stage history of
    /// the open time step, most recent stage first and chronological within a
    /// stage; then the time history from the oldest to the newest time step,
    /// most recent stage first within each.
    pub fn difference_pairs(&self) -> impl Iterator<Item = (&Sample, &Sample)> + '_ {
        let current = self
            .window
            .windows(2)
            .rev()
            .map(|pair| (&pair[1], &pair[0]));

        let retained = self.ordered_spans().into_iter().flat_map(move |span| {
            self.arena[span.start..span.start + span.len]
                .windows(2)
                .map(|pair| (&pair[0], &pair[1]))
        });

        current.chain(retained)
    }

    fn ordered_spans(&self) -> Vec<Span> {
        let mut stage: Vec<Span> = self
            .spans
            .iter()
            .copied()
            .filter(|span| span.time_step == self.time_step)
            .collect();
        stage.sort_by_key(|span| Reverse(span.stage));

        let mut time: Vec<Span> = self
            .spans
            .iter()
            .copied()
            .filter(|span| span.time_step < self.time_step)
            .collect();
        time.sort_by_key(|span| (span.time_step, Reverse(span.stage)));

        stage.extend(time);
        stage
    }

    /// Rebuilds the arena so it only holds samples referenced by a span.
    fn compact(&mut self) {
        let mut arena = Vec::with_capacity(self.spans.iter().map(|span| span.len).sum());
        for span in self.spans.iter_mut() {
            let start = arena.len();
            arena.extend_from_slice(&self.arena[span.start..span.start + span.len]);
            span.start = start;
        }
        self.arena = arena;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64) -> (DVector<f64>, DVector<f64>) {
        (
            DVector::from_vec(vec![value, 0.0]),
            DVector::from_vec(vec![10.0 * value, 0.0]),
        )
    }

    fn record_window(store: &mut HistoryStore, values: &[f64]) {
        for &value in values {
            let (x, r) = sample(value);
            store.record(x, r).unwrap();
        }
    }

    #[test]
    fn window_is_most_recent_first() {
        let mut store = HistoryStore::new(0);
        record_window(&mut store, &[1.0, 2.0, 3.0, 4.0]);

        assert_eq!(store.window_len(), 4);
        let order: Vec<f64> = store.window().map(|s| s.solution[0]).collect();
        assert_eq!(order, vec![4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn record_rejects_changed_dimension() {
        let mut store = HistoryStore::new(0);
        record_window(&mut store, &[1.0]);
        let result = store.record(DVector::zeros(3), DVector::zeros(3));
        assert!(matches!(
            result,
            Err(CouplingError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn columns_are_capped() {
        let mut store = HistoryStore::new(2);
        record_window(&mut store, &[1.0, 2.0, 3.0, 4.0]);
        store.roll_stage(true);
        record_window(&mut store, &[5.0, 6.0, 7.0]);

        assert_eq!(store.available_columns(100, 100), 3 + 2);
        for dimension in 0..8 {
            for cap in 0..8 {
                assert!(store.available_columns(dimension, cap) <= dimension.min(cap));
            }
        }
    }

    #[test]
    fn roll_stage_keeps_only_requested_windows() {
        let mut store = HistoryStore::new(0);
        record_window(&mut store, &[1.0, 2.0]);
        store.roll_stage(false);
        assert_eq!(store.window_len(), 0);
        assert!(!store.has_stage_history());

        record_window(&mut store, &[1.0]);
        store.roll_stage(true);
        assert!(!store.has_stage_history());

        record_window(&mut store, &[1.0, 2.0]);
        store.roll_stage(true);
        assert!(store.has_stage_history());
        assert_eq!(store.stage_window_count(), 1);
    }

    #[test]
    fn time_history_evicts_oldest_steps() {
        let mut store = HistoryStore::new(2);
        for step in 0..4 {
            record_window(&mut store, &[step as f64, step as f64 + 0.5]);
            store.roll_stage(true);
            store.roll_time_step(true);
        }

        assert_eq!(store.time_step_count(), 2);
        let solutions: Vec<f64> = store
            .difference_pairs()
            .map(|(newer, _)| newer.solution[0])
            .collect();
        // Oldest surviving step first.
        assert_eq!(solutions, vec![2.5, 3.5]);
    }

    #[test]
    fn discarded_time_step_leaves_no_history() {
        let mut store = HistoryStore::new(3);
        record_window(&mut store, &[1.0, 2.0]);
        store.roll_stage(true);
        store.roll_time_step(false);
        assert_eq!(store.available_columns(10, 10), 0);
    }

    #[test]
    fn dimension_is_released_with_the_last_sample() {
        let mut store = HistoryStore::new(0);
        record_window(&mut store, &[1.0, 2.0]);
        store.roll_stage(true);
        assert_eq!(store.dimension(), Some(2));

        store.roll_time_step(true);
        assert_eq!(store.dimension(), None);
        store.record(DVector::zeros(3), DVector::zeros(3)).unwrap();
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn dimension_follows_surviving_samples() {
        let mut store = HistoryStore::new(1);
        record_window(&mut store, &[1.0, 2.0]);
        store.roll_stage(true);
        store.roll_time_step(true);
        assert!(store.check_dimension(3).is_err());

        // An unretained window of the open step does not pin the length.
        record_window(&mut store, &[3.0]);
        store.roll_stage(false);
        assert_eq!(store.dimension(), Some(2));

        store.clear();
        record_window(&mut store, &[4.0]);
        store.roll_stage(false);
        assert_eq!(store.dimension(), None);
        assert!(store.check_dimension(3).is_ok());
    }

    #[test]
    fn pairs_follow_priority_order() {
        let mut store = HistoryStore::new(5);

        // Past time step: stage 0 then stage 1.
        store.set_stage(0);
        record_window(&mut store, &[100.0, 101.0]);
        store.roll_stage(true);
        store.set_stage(1);
        record_window(&mut store, &[110.0, 111.0]);
        store.roll_stage(true);
        store.roll_time_step(true);

        // Open time step: two windows in stage 0, one in stage 1.
        store.set_stage(0);
        record_window(&mut store, &[1.0, 2.0]);
        store.roll_stage(true);
        record_window(&mut store, &[3.0, 4.0]);
        store.roll_stage(true);
        store.set_stage(1);
        record_window(&mut store, &[11.0, 12.0]);
        store.roll_stage(true);

        // Current window.
        record_window(&mut store, &[20.0, 21.0, 22.0]);

        let newer: Vec<f64> = store
            .difference_pairs()
            .map(|(newer, _)| newer.solution[0])
            .collect();
        assert_eq!(newer, vec![22.0, 21.0, 12.0, 2.0, 4.0, 111.0, 101.0]);

        for (newer, older) in store.difference_pairs() {
            assert_eq!(newer.solution[0] - older.solution[0], 1.0);
        }
    }
}
