// src/error.rs

use std::error::Error;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Every way fitting or scoring a kernel PCA detector can fail.
#[derive(Error, Debug)]
pub enum KpcaError {
    #[error("Input matrix is empty: {rows} rows x {cols} columns.")]
    EmptyInput { rows: usize, cols: usize },

    #[error("Input has {found} features, but the model was trained on {expected}.")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("Input contains a non-finite value at row {row}, column {col}.")]
    NonFiniteInput { row: usize, col: usize },

    #[error("Invalid value for `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(
        "Requested {requested} retained components, but the kernel basis only has {available} points."
    )]
    ComponentsExceedSubsample { requested: usize, available: usize },

    #[error(
        "Degenerate kernel: eigenvalue {eigenvalue:e} of component {component} is not strictly positive. \
         Reduce the number of retained components or enlarge the subsample."
    )]
    DegenerateKernel { component: usize, eigenvalue: f64 },

    #[error("Reconstruction error for row {index} is not finite.")]
    NonFiniteScore { index: usize },

    #[error("Eigendecomposition of the centered gram matrix failed: {0}")]
    Eigendecomposition(#[source] ThreadSafeStdError),

    #[error("Detector is not fitted yet. Call `fit` before scoring.")]
    NotFitted,
}

impl KpcaError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        KpcaError::InvalidParameter { name, reason: reason.into() }
    }
}
