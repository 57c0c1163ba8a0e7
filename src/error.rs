use std::path::PathBuf;

use thiserror::Error;

use crate::spectrum::CycleId;

#[derive(Debug, Error)]
pub enum Error {
    /// Input files are missing or malformed. Fatal for a whole analysis run.
    #[error("failed to load {path}: {reason}")]
    DataLoad { path: PathBuf, reason: String },

    #[error("cycle {cycle} has no physically valid points after filtering")]
    EmptySpectrumAfterFilter { cycle: CycleId },

    #[error("cycle {cycle} has {got} points, at least {required} are needed to fit the circuit")]
    InsufficientData {
        cycle: CycleId,
        required: usize,
        got: usize,
    },

    #[error("fit for cycle {cycle} did not converge after {iterations} iterations (cost {cost:e})")]
    FitDidNotConverge {
        cycle: CycleId,
        iterations: u64,
        cost: f64,
    },

    #[error("parameter and capacity series share no common cycle ids")]
    AlignmentMismatch,

    #[error("correlation is undefined: {0}")]
    UndefinedCorrelation(String),

    #[error("circuit `{circuit}` has {expected} parameters, got {got}")]
    ParameterCountMismatch {
        circuit: String,
        expected: usize,
        got: usize,
    },

    #[error("expected {expected} feature columns, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid circuit string `{circuit}` at position {position}: {reason}")]
    CircuitSyntax {
        circuit: String,
        position: usize,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wraps failures raised inside the optimisation framework
    #[error("solver failure: {0}")]
    Solver(argmin::core::Error),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

impl Error {
    /// Whether the error only concerns a single cycle, and so should be recorded rather than
    /// aborting a sweep.
    #[must_use]
    pub const fn is_per_cycle(&self) -> bool {
        matches!(
            self,
            Self::EmptySpectrumAfterFilter { .. }
                | Self::InsufficientData { .. }
                | Self::FitDidNotConverge { .. }
        )
    }

    pub(crate) fn data_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<argmin::core::Error> for Error {
    fn from(value: argmin::core::Error) -> Self {
        Self::Solver(value)
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Self::Config(value.to_string())
    }
}
