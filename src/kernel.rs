// src/kernel.rs

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::KpcaError;

/// Degree used by [`Kernel::polynomial_default`].
pub const DEFAULT_POLYNOMIAL_DEGREE: u32 = 3;

/// Kernel used to build gram matrices.
///
/// Both variants are functions of the squared Euclidean distance between
/// two points, so `k(x, x) == 1` for each of them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Kernel {
    /// Radial basis function: `exp(-gamma * ||a - b||^2)` with `gamma = 1 / (2 sigma^2)`.
    Rbf { sigma: f64 },
    /// Distance polynomial: `(||a - b||^2 + 1)^degree`.
    Polynomial { degree: u32 },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Rbf { sigma: 1.0 }
    }
}

impl Kernel {
    /// RBF kernel with bandwidth `sigma`.
    pub fn rbf(sigma: f64) -> Self {
        Kernel::Rbf { sigma }
    }

    /// Polynomial kernel of the given degree.
    pub fn polynomial(degree: u32) -> Self {
        Kernel::Polynomial { degree }
    }

    pub fn polynomial_default() -> Self {
        Kernel::Polynomial { degree: DEFAULT_POLYNOMIAL_DEGREE }
    }

    /// `1 / (2 sigma^2)` for the RBF kernel, `None` otherwise.
    pub fn gamma(&self) -> Option<f64> {
        match *self {
            Kernel::Rbf { sigma } => Some(1.0 / (2.0 * sigma * sigma)),
            Kernel::Polynomial { .. } => None,
        }
    }

    /// Value of `k(x, x)` for any `x`.
    pub fn self_similarity(&self) -> f64 {
        1.0
    }

    pub fn validate(&self) -> Result<(), KpcaError> {
        match *self {
            Kernel::Rbf { sigma } => {
                if !(sigma.is_finite() && sigma > 0.0) {
                    return Err(KpcaError::invalid("kernel.sigma", format!("must be finite and > 0, got {}", sigma)));
                }
            }
            Kernel::Polynomial { degree } => {
                if degree < 1 {
                    return Err(KpcaError::invalid("kernel.degree", "must be at least 1"));
                }
                polynomial_exponent(degree)?;
            }
        }
        Ok(())
    }

    /// Builds the `a.nrows() x b.nrows()` gram matrix with `K[i, j] = k(a[i], b[j])`.
    ///
    /// Squared distances come from `||a||^2 + ||b||^2 - 2 a.b`, so the only
    /// O(m1 * m2 * d) work is a single matrix product. Distances that round
    /// below zero are clamped before the kernel transform.
    ///
    /// # Errors
    /// `EmptyInput` if either point set has no rows or no columns,
    /// `FeatureMismatch` if the column counts differ.
    pub fn gram_matrix(&self, a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array2<f64>, KpcaError> {
        for (rows, cols) in [a.dim(), b.dim()] {
            if rows == 0 || cols == 0 {
                return Err(KpcaError::EmptyInput { rows, cols });
            }
        }
        if a.ncols() != b.ncols() {
            return Err(KpcaError::FeatureMismatch { expected: a.ncols(), found: b.ncols() });
        }

        let mut gram = squared_distances(a, b);
        match *self {
            Kernel::Rbf { .. } => {
                let gamma = self.gamma().unwrap_or(1.0);
                gram.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .for_each(|mut row| row.mapv_inplace(|d| (-gamma * d.max(0.0)).exp()));
            }
            Kernel::Polynomial { degree } => {
                let exponent = polynomial_exponent(degree)?;
                gram.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .for_each(|mut row| row.mapv_inplace(|d| (d.max(0.0) + 1.0).powi(exponent)));
            }
        }
        Ok(gram)
    }
}

fn polynomial_exponent(degree: u32) -> Result<i32, KpcaError> {
    i32::try_from(degree)
        .map_err(|_| KpcaError::invalid("kernel.degree", format!("must not exceed {}, got {}", i32::MAX, degree)))
}

/// Pairwise squared Euclidean distances between the rows of `a` and `b`.
fn squared_distances(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let a_sq: Array1<f64> = a.map_axis(Axis(1), |row| row.dot(&row));
    let b_sq: Array1<f64> = b.map_axis(Axis(1), |row| row.dot(&row));

    let mut dists = a.dot(&b.t());
    dists *= -2.0;
    dists += &a_sq.insert_axis(Axis(1));
    dists += &b_sq.insert_axis(Axis(0));
    dists
}
