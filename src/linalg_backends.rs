// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use std::marker::PhantomData;

use crate::error::ThreadSafeStdError;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues, typically sorted in ascending order.
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvector_matrix.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVR or DSYEVD).
/// Implementers will typically expect `matrix` to be symmetric and read only
/// its upper triangle.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, ThreadSafeStdError>;
}

// --- ndarray-linalg (LAPACK) backend ---
use ndarray_linalg::{Eigh as NdLinalgEigh, UPLO};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, ThreadSafeStdError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(format!(
                "Matrix must be square for eigendecomposition, got {}x{}.",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

// --- faer backend ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendEigh, EighOutput};
    use crate::error::ThreadSafeStdError;
    use faer::{ColRef, MatRef};
    use ndarray::{Array1, Array2, ShapeBuilder};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray(faer_mat: MatRef<'_, f64>) -> Array2<f64> {
        let nrows = faer_mat.nrows();
        let ncols = faer_mat.ncols();
        // Column-major to match faer's storage.
        Array2::from_shape_fn((nrows, ncols).f(), |(i, j)| faer_mat[(i, j)])
    }

    fn faer_col_to_ndarray_vec(faer_col: ColRef<'_, f64>) -> Array1<f64> {
        Array1::from_shape_fn(faer_col.nrows(), |i| faer_col[i])
    }

    impl BackendEigh<f64> for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, ThreadSafeStdError> {
            let (nrows, ncols) = matrix.dim();
            if nrows != ncols {
                return Err("Matrix must be square for eigendecomposition.".into());
            }
            if matrix.is_empty() {
                return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
            }
            // faer::MatRef requires contiguous data; gram matrices are built in
            // standard layout, anything else gets copied.
            let contiguous = matrix.as_standard_layout();
            let slice = contiguous
                .as_slice()
                .ok_or_else(|| format!("Failed to get slice from row-major matrix ({}x{})", nrows, ncols))?;
            let faer_mat_view = MatRef::from_row_major_slice(slice, nrows, ncols);
            let eig = faer_mat_view
                .self_adjoint_eigen(faer::Side::Upper)
                .map_err(|e| format!("Faer self-adjoint eigendecomposition failed: {:?}", e))?;
            Ok(EighOutput {
                eigenvalues: faer_col_to_ndarray_vec(eig.S().column_vector()),
                eigenvectors: faer_mat_to_ndarray(eig.U()),
            })
        }
    }
}

/// A provider struct that dispatches to the selected linear algebra backend
/// based on compile-time feature flags.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

impl BackendEigh<f64> for LinAlgBackendProvider<f64> {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, ThreadSafeStdError> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.eigh_upper(matrix)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.eigh_upper(matrix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_provider_eigh_reconstructs_symmetric_matrix() {
        let matrix = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let provider = LinAlgBackendProvider::<f64>::new();
        let EighOutput { eigenvalues, eigenvectors } = provider.eigh_upper(&matrix).unwrap();

        assert_eq!(eigenvalues.len(), 3);
        let reconstructed = eigenvectors.dot(&Array2::from_diag(&eigenvalues)).dot(&eigenvectors.t());
        for (a, b) in reconstructed.iter().zip(matrix.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_ndarray_backend_rejects_non_square() {
        let matrix = Array2::<f64>::zeros((2, 3));
        assert!(NdarrayLinAlgBackend.eigh_upper(&matrix).is_err());
    }
}
