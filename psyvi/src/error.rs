use crate::train::FitState;
use psyvi_util::candle_core;
use serde::Serialize;
use thiserror::Error;

/// Invalid input detected while constructing a model
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(
        "unrecognized model family `{0}` \
         (expected irt_1pl, irt_2pl, irt_3pl, irt_4pl, dina or dino)"
    )]
    UnknownModel(String),

    #[error("response data must be a matrix, got a rank-{0} tensor")]
    NotAMatrix(usize),

    #[error("response data is empty ({rows} x {cols})")]
    EmptyData { rows: usize, cols: usize },

    #[error("row {row} has {len} entries, expected {expected}")]
    RaggedRows {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("invalid response {value} at ({row}, {col}); expected 0, 1 or -1 for missing")]
    InvalidResponse { row: usize, col: usize, value: f32 },

    #[error("Q-matrix covers {q_items} items but the data has {data_items}")]
    QMatrixItems { q_items: usize, data_items: usize },

    #[error("{what} entry at ({row}, {col}) is {value}, expected 0 or 1")]
    NonBinary {
        what: &'static str,
        row: usize,
        col: usize,
        value: f32,
    },

    #[error("skill {0} is not required by any item")]
    UnusedSkill(usize),

    #[error("item {0} requires no skill")]
    ItemWithoutSkill(usize),

    #[error("mask must be {expected_rows} x {expected_cols}, got {rows} x {cols}")]
    MaskShape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("item {0} loads on no latent dimension")]
    UnloadedItem(usize),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// The skill space is too large to enumerate
#[derive(Debug, Error)]
#[error("{skills} skills span 2^{skills} mastery patterns; at most {max} skills can be enumerated")]
pub struct CapacityError {
    pub skills: usize,
    pub max: usize,
}

/// Anything that can go wrong before the first optimization step
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("tensor engine: {0}")]
    Engine(#[from] candle_core::Error),
}

/// Failure of a fit run
#[derive(Debug, Error)]
pub enum FitError {
    /// NaN or Inf in the loss or a gradient; parameters were not
    /// updated with the offending step.
    #[error("non-finite {quantity} at iteration {iteration}")]
    NumericalInstability {
        iteration: usize,
        quantity: &'static str,
        last_valid: Box<FitState>,
    },

    #[error("tensor engine: {0}")]
    Engine(#[from] candle_core::Error),
}

impl FitError {
    /// The last state before the failing step, if any
    pub fn last_valid(&self) -> Option<&FitState> {
        match self {
            FitError::NumericalInstability { last_valid, .. } => Some(last_valid),
            FitError::Engine(_) => None,
        }
    }
}

/// The iteration cap was reached before the convergence criteria were
/// met; estimates are still returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceWarning {
    pub iterations: usize,
    pub last_loss: f32,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stopped at the iteration cap ({}) without converging; last loss {:.6}",
            self.iterations, self.last_loss
        )
    }
}
