// src/error.rs

use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Every failure the evaluation pipeline can report.
///
/// Configuration, numeric and dimensionality problems are kept as distinct
/// variants so callers can tell "change your inputs" apart from
/// "change the number of basis degrees".
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Matrix must be square, but has shape ({rows}, {cols}).")]
    NotSquare { rows: usize, cols: usize },

    #[error("Matrix is singular or numerically singular ({context}).")]
    SingularMatrix { context: String },

    #[error(
        "Grid evaluation supports at most {max} dimensions, but the fitted distributions have {found}. Reduce the number of basis degrees."
    )]
    Dimensionality { found: usize, max: usize },

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("{context} needs at least 2 samples, but only {found} were provided.")]
    InsufficientSamples { context: String, found: usize },

    #[error("Unknown scenario '{0}'.")]
    UnknownScenario(String),

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    #[error("Pipeline stage '{missing}' has not been run yet.")]
    Pipeline { missing: &'static str },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("LAPACK routine failed: {0}")]
    Linalg(#[from] LinalgError),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    /// True for the numeric failures (singular Gram matrix, non positive-definite covariance).
    pub fn is_numeric(&self) -> bool {
        matches!(self, EvalError::SingularMatrix { .. } | EvalError::Linalg(_))
    }
}
