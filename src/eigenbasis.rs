// src/eigenbasis.rs

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::KpcaError;
use crate::linalg_backends::{BackendEigh, EighOutput};

/// How many eigenvectors of the centered gram matrix to keep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetainedComponents {
    /// As many as the kernel basis has points, minus numerically null directions.
    #[default]
    Same,
    /// As many as the data has features.
    Auto,
    /// An explicit count.
    Fixed(usize),
}

impl RetainedComponents {
    /// Minimum basis size this setting needs, if it pins one down.
    pub fn required_rows(&self, n_features: usize) -> Option<usize> {
        match *self {
            RetainedComponents::Same => None,
            RetainedComponents::Auto => Some(n_features),
            RetainedComponents::Fixed(q) => Some(q),
        }
    }
}

/// Leading eigenpairs of a centered gram matrix, largest first.
#[derive(Clone, Debug)]
pub struct KernelEigenbasis {
    /// Retained eigenvalues in descending order. Shape: `(q)`
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors scaled by `1 / sqrt(eigenvalue)`, one per column.
    /// Shape: `(n_sub, q)`
    pub alphas: Array2<f64>,
}

impl KernelEigenbasis {
    pub fn num_components(&self) -> usize {
        self.alphas.ncols()
    }
}

/// Replaces `gram` with `(gram + gram^T) / 2`.
pub fn symmetrize(gram: &mut Array2<f64>) {
    let transposed = gram.t().to_owned();
    *gram += &transposed;
    *gram *= 0.5;
}

/// Double-centers a square gram matrix:
/// `K_c[i, j] = K[i, j] - m[i] - m[j] + mean(m)` where `m` holds the column means.
///
/// Equivalent to `K - 1K - K1 + 1K1` with `1` the `n x n` averaging operator,
/// computed with broadcasts instead of the two extra matrix products.
pub fn double_center(gram: ArrayView2<f64>) -> Result<Array2<f64>, KpcaError> {
    let (rows, cols) = gram.dim();
    if rows == 0 || rows != cols {
        return Err(KpcaError::EmptyInput { rows, cols });
    }
    let col_means = gram
        .mean_axis(Axis(0))
        .ok_or(KpcaError::EmptyInput { rows, cols })?;
    let grand_mean = col_means.mean().unwrap_or(0.0);

    let mut centered = gram.to_owned();
    centered -= &col_means.view().insert_axis(Axis(0));
    centered -= &col_means.view().insert_axis(Axis(1));
    centered += grand_mean;
    Ok(centered)
}

/// Eigendecomposes the centered gram matrix and rescales the leading
/// eigenvectors so each has unit norm in kernel feature space,
/// i.e. `alpha_k^T K_c alpha_k = 1`.
///
/// An eigenvalue is usable when it is above `tolerance * lambda_max` and
/// strictly positive. `Same` keeps every usable eigenpair; `Auto` and
/// `Fixed` demand that all of their top `q` eigenvalues are usable.
///
/// # Errors
/// `ComponentsExceedSubsample` if `q > n_sub`, `DegenerateKernel` if a
/// required eigenvalue is not usable (or `Same` finds none),
/// `Eigendecomposition` if the backend fails.
pub fn leading_eigenbasis<B: BackendEigh<f64>>(
    backend: &B,
    centered_gram: &Array2<f64>,
    components: RetainedComponents,
    n_features: usize,
    tolerance: f64,
) -> Result<KernelEigenbasis, KpcaError> {
    let n_sub = centered_gram.nrows();
    let requested = components.required_rows(n_features);
    if let Some(q) = requested {
        if q == 0 {
            return Err(KpcaError::invalid("components", "must retain at least one component"));
        }
        if q > n_sub {
            return Err(KpcaError::ComponentsExceedSubsample { requested: q, available: n_sub });
        }
    }

    let EighOutput { eigenvalues, eigenvectors } = backend
        .eigh_upper(centered_gram)
        .map_err(KpcaError::Eigendecomposition)?;

    // Backends return ascending order; sort explicitly rather than rely on it.
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

    let largest = order.first().map_or(0.0, |&i| eigenvalues[i]);
    let floor = (largest * tolerance.max(0.0)).max(0.0);
    let usable = |lambda: f64| lambda.is_finite() && lambda > floor && lambda > 0.0;

    let q = match requested {
        Some(q) => {
            if let Some(pos) = order.iter().take(q).position(|&i| !usable(eigenvalues[i])) {
                return Err(KpcaError::DegenerateKernel { component: pos, eigenvalue: eigenvalues[order[pos]] });
            }
            q
        }
        None => {
            let rank = order.iter().take_while(|&&i| usable(eigenvalues[i])).count();
            if rank == 0 {
                return Err(KpcaError::DegenerateKernel { component: 0, eigenvalue: largest });
            }
            rank
        }
    };
    debug!(
        "Retaining {} of {} kernel components (largest eigenvalue {:.6e}, floor {:.3e}).",
        q, n_sub, largest, floor
    );

    let mut retained_values = Array1::<f64>::zeros(q);
    let mut alphas = Array2::<f64>::zeros((n_sub, q));
    for (k, &src) in order.iter().take(q).enumerate() {
        let lambda = eigenvalues[src];
        retained_values[k] = lambda;
        let scale = 1.0 / lambda.sqrt();
        alphas
            .column_mut(k)
            .assign(&eigenvectors.column(src).mapv(|v| v * scale));
    }
    trace!("Eigenvalue spectrum head: {:?}", retained_values.iter().take(5).collect::<Vec<_>>());

    Ok(KernelEigenbasis { eigenvalues: retained_values, alphas })
}
