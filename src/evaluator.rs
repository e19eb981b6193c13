//! The coupled solvers, seen from the post processing as a black box.

use nalgebra::DVector;

/// Error type reported by an [`Evaluator`]; kept intact as the source of
/// [`CouplingError::Evaluation`](crate::error::CouplingError::Evaluation).
pub type EvaluationFault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of one coupled evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Interface values produced by the solvers for the given input.
    pub output: DVector<f64>,
    /// Coupling residual, the quantity driven to the fixed point.
    pub residual: DVector<f64>,
}

impl Evaluation {
    pub fn new(output: DVector<f64>, residual: DVector<f64>) -> Self {
        Self { output, residual }
    }
}

/// Sizes of the two contiguous interface blocks (solid first, then fluid).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSizes {
    pub first: usize,
    pub second: usize,
}

impl BlockSizes {
    pub fn new(first: usize, second: usize) -> Self {
        Self { first, second }
    }

    /// Length of a vector made of both blocks.
    pub fn total(&self) -> usize {
        self.first + self.second
    }
}

/// Coupled fluid and structure solvers behind a single synchronous call.
///
/// The call must return a globally consistent pair of vectors even when the
/// solvers run on many workers internally.
pub trait Evaluator {
    /// Runs both solvers with `input` as interface data.
    fn evaluate(&mut self, input: &DVector<f64>) -> Result<Evaluation, EvaluationFault>;

    /// Block sizes when the solvers are coupled in parallel, `None` when they
    /// run one after the other. Scaling is only defined for parallel coupling.
    fn parallel_blocks(&self) -> Option<BlockSizes> {
        None
    }
}

/// Adapts a closure into an [`Evaluator`].
pub struct FnEvaluator<F> {
    function: F,
    blocks: Option<BlockSizes>,
}

impl<F> FnEvaluator<F>
where
    F: FnMut(&DVector<f64>) -> Result<Evaluation, EvaluationFault>,
{
    /// Wraps a sequentially coupled evaluation.
    pub fn new(function: F) -> Self {
        Self {
            function,
            blocks: None,
        }
    }

    /// Declares the evaluation as parallel coupling with the given blocks.
    pub fn with_parallel_blocks(mut self, blocks: BlockSizes) -> Self {
        self.blocks = Some(blocks);
        self
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: FnMut(&DVector<f64>) -> Result<Evaluation, EvaluationFault>,
{
    fn evaluate(&mut self, input: &DVector<f64>) -> Result<Evaluation, EvaluationFault> {
        (self.function)(input)
    }

    fn parallel_blocks(&self) -> Option<BlockSizes> {
        self.blocks
    }
}
