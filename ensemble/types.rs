// ========================================================================================
//                             High-level data contracts
// ========================================================================================

// Only types that cross module boundaries live here. Module-local types stay with their module.

use ndarray::{Array2, ArrayView2};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The label cardinality of the food-image label space the ensemble was built for.
/// Runs may override it, but every matrix within one run must match the chosen value.
pub const DEFAULT_LABEL_COUNT: usize = 498;

/// The ordered sample identities (e.g. image filenames) that label the rows of every
/// matrix in a run. Shared by reference because every stage carries the same sequence.
pub type SampleIds = Arc<[String]>;

/// The `[rows x cols]` extent of a matrix, used for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    #[inline]
    pub fn of<T>(matrix: &ArrayView2<'_, T>) -> Self {
        Self {
            rows: matrix.nrows(),
            cols: matrix.ncols(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} x {}]", self.rows, self.cols)
    }
}

/// Every structural failure the ensemble core can report. None of these are retried:
/// each one means an upstream input is inconsistent and any result built on it would
/// be silently wrong.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnsembleError {
    #[error("Model '{model}' supplied a matrix of shape {found}, but shape {expected} was required.")]
    ShapeMismatch {
        model: String,
        expected: Shape,
        found: Shape,
    },
    #[error(
        "Sample order of model '{model}' disagrees with model '{reference}' at row {row}: expected '{expected}', found '{found}'. Sample sequences are never realigned automatically."
    )]
    OrderMismatch {
        model: String,
        reference: String,
        row: usize,
        expected: String,
        found: String,
    },
    #[error("Decision threshold {0} is outside the open interval (0, 1).")]
    InvalidThreshold(f64),
    #[error("Raw model weights sum to {0}. At least one model must carry a positive weight.")]
    DegenerateWeights(f64),
    #[error("Model '{model}' has raw weight {weight}. Weights must be finite and non-negative.")]
    InvalidWeight { model: String, weight: f64 },
    #[error(
        "Model '{model}' has probability {value} at row {row}, column {col}. Probabilities must lie in [0, 1]."
    )]
    ProbabilityOutOfRange {
        model: String,
        row: usize,
        col: usize,
        value: f64,
    },
    #[error("An ensemble needs at least one model, but none were supplied.")]
    EmptyEnsemble,
    #[error(
        "Insufficient memory to hold the ensemble: {required} bytes are required but only {available} bytes are available."
    )]
    ResourceExhausted { required: u64, available: u64 },
}

/// A per-model decision threshold, guaranteed to lie strictly inside `(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> Result<Self, EnsembleError> {
        if value > 0.0 && value < 1.0 {
            Ok(Self(value))
        } else {
            Err(EnsembleError::InvalidThreshold(value))
        }
    }

    #[inline(always)]
    pub fn value(self) -> f64 {
        self.0
    }
}

/// One model's independent per-label confidences over `[samples x labels]`.
///
/// Construction validates that every entry is finite and in `[0, 1]`; the matrix is
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMatrix {
    values: Array2<f64>,
}

impl ProbabilityMatrix {
    pub fn new(model: &str, values: Array2<f64>) -> Result<Self, EnsembleError> {
        if let Some(((row, col), &value)) = values
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && (0.0..=1.0).contains(*v)))
        {
            return Err(EnsembleError::ProbabilityOutOfRange {
                model: model.to_string(),
                row,
                col,
                value,
            });
        }
        Ok(Self { values })
    }

    #[inline(always)]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        Shape::of(&self.values.view())
    }
}

/// A model's thresholded ballot over `[samples x labels]`.
///
/// Every row holds at least one positive label. The constructor is crate-private so
/// that only the adapter, which enforces the fallback rule, can produce one.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPrediction {
    matrix: Array2<u8>,
    fallback_count: usize,
}

impl BinaryPrediction {
    pub(crate) fn new(matrix: Array2<u8>, fallback_count: usize) -> Self {
        Self {
            matrix,
            fallback_count,
        }
    }

    #[inline(always)]
    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.matrix.view()
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        Shape::of(&self.matrix.view())
    }

    /// The number of rows whose only positive label was placed by the fallback rule.
    #[inline(always)]
    pub fn fallback_count(&self) -> usize {
        self.fallback_count
    }
}

/// Everything the engine needs from one externally trained model.
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub name: String,
    pub sample_ids: SampleIds,
    pub probabilities: ProbabilityMatrix,
    pub threshold: Threshold,
    pub raw_weight: f64,
}
