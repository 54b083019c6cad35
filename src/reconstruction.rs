// src/reconstruction.rs

use log::{debug, trace, warn};
use ndarray::{s, Array1, ArrayView1, ArrayView2, Axis};

use crate::error::KpcaError;
use crate::kernel::Kernel;

/// Errors more negative than this (relative to the self-similarity term) are
/// reported when clamped; smaller excursions are ordinary rounding.
const NEGATIVE_ERROR_WARN_LEVEL: f64 = 1e-6;

/// Everything the engine needs from a trained model, borrowed.
#[derive(Clone, Copy, Debug)]
pub struct KernelBasisView<'a> {
    pub kernel: &'a Kernel,
    /// Points spanning the kernel basis. Shape: `(n_sub, d_features)`
    pub subsample: ArrayView2<'a, f64>,
    /// Uncentered gram matrix over `subsample`. Shape: `(n_sub, n_sub)`
    pub gram_matrix: ArrayView2<'a, f64>,
    /// Scaled eigenvectors of the centered gram matrix. Shape: `(n_sub, q)`
    pub alphas: ArrayView2<'a, f64>,
}

/// Squared feature-space distance between each query point and its
/// projection onto the retained kernel eigenbasis.
///
/// Queries are processed `batch_size` rows at a time so the intermediate
/// `n_sub x block` kernel slab stays bounded; the result does not depend on
/// the block size. Tiny negative values caused by rounding are clamped to 0.
///
/// # Errors
/// Shape errors for empty or mismatched inputs, `InvalidParameter` for a zero
/// batch size, `NonFiniteScore` if any error comes out NaN or infinite.
pub fn reconstruction_errors(
    basis: KernelBasisView<'_>,
    queries: ArrayView2<f64>,
    batch_size: usize,
) -> Result<Array1<f64>, KpcaError> {
    let n_samples = queries.nrows();
    let n_sub = basis.subsample.nrows();
    if batch_size == 0 {
        return Err(KpcaError::invalid("batch_size", "must be positive"));
    }
    if n_samples == 0 || queries.ncols() == 0 {
        return Err(KpcaError::EmptyInput { rows: n_samples, cols: queries.ncols() });
    }
    if queries.ncols() != basis.subsample.ncols() {
        return Err(KpcaError::FeatureMismatch { expected: basis.subsample.ncols(), found: queries.ncols() });
    }
    if basis.gram_matrix.dim() != (n_sub, n_sub) || basis.alphas.nrows() != n_sub {
        return Err(KpcaError::invalid(
            "model",
            format!(
                "inconsistent shapes: subsample has {} rows, gram matrix is {:?}, alphas are {:?}",
                n_sub,
                basis.gram_matrix.dim(),
                basis.alphas.dim()
            ),
        ));
    }

    // Per-call constants of the out-of-sample centering.
    let gram_col_means = basis
        .gram_matrix
        .mean_axis(Axis(0))
        .ok_or(KpcaError::EmptyInput { rows: n_sub, cols: n_sub })?;
    let gram_grand_mean = gram_col_means.mean().unwrap_or(0.0);
    let alpha_sums = basis.alphas.sum_axis(Axis(0));
    let mean_projection = gram_col_means.dot(&basis.alphas);
    let self_similarity = basis.kernel.self_similarity();

    let mut errors = Array1::<f64>::zeros(n_samples);
    let mut clamped = 0usize;
    for block_start in (0..n_samples).step_by(batch_size) {
        let block_end = (block_start + batch_size).min(n_samples);
        debug!(
            "Scoring queries... {:.2}%",
            100.0 * block_start as f64 / n_samples as f64
        );

        let block = queries.slice(s![block_start..block_end, ..]);
        // Shape: (n_sub, n_block)
        let k_block = basis.kernel.gram_matrix(basis.subsample, block)?;
        trace!("Kernel slab for rows {}..{} has shape {:?}", block_start, block_end, k_block.dim());

        let block_errors = block_reconstruction_errors(
            k_block.view(),
            basis.alphas,
            gram_grand_mean,
            alpha_sums.view(),
            mean_projection.view(),
            self_similarity,
        );

        for (offset, &raw) in block_errors.iter().enumerate() {
            let index = block_start + offset;
            if !raw.is_finite() {
                return Err(KpcaError::NonFiniteScore { index });
            }
            if raw < 0.0 {
                clamped += 1;
                if raw < -NEGATIVE_ERROR_WARN_LEVEL * self_similarity.max(1.0) {
                    warn!("Reconstruction error {:.3e} for row {} clamped to 0.", raw, index);
                }
            }
            errors[index] = raw.max(0.0);
        }
    }
    debug!("Scoring queries... 100.00%");
    if clamped > 0 {
        debug!("Clamped {} slightly negative reconstruction errors to 0.", clamped);
    }

    Ok(errors)
}

/// Raw (unclamped) reconstruction errors for one block of queries given
/// their kernel slab against the basis points.
fn block_reconstruction_errors(
    k_block: ArrayView2<f64>,
    alphas: ArrayView2<f64>,
    gram_grand_mean: f64,
    alpha_sums: ArrayView1<f64>,
    mean_projection: ArrayView1<f64>,
    self_similarity: f64,
) -> Array1<f64> {
    // Mean kernel value of each query against the basis. Shape: (n_block)
    let query_means = k_block.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k_block.ncols()));

    // Centered projections onto each component. Shape: (n_block, q)
    let mut projections = k_block.t().dot(&alphas);
    let shifted_means = &query_means - gram_grand_mean;
    projections -= &(&shifted_means.view().insert_axis(Axis(1)) * &alpha_sums.view().insert_axis(Axis(0)));
    projections -= &mean_projection.view().insert_axis(Axis(0));

    // Centered squared norm of each query's feature-space image.
    let self_terms = query_means.mapv(|m| self_similarity - 2.0 * m + gram_grand_mean);
    let captured = projections.mapv(|f| f * f).sum_axis(Axis(1));
    self_terms - captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eigenbasis::{double_center, leading_eigenbasis, symmetrize, RetainedComponents};
    use crate::linalg_backends::LinAlgBackendProvider;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    struct TrainedBasis {
        kernel: Kernel,
        subsample: Array2<f64>,
        gram: Array2<f64>,
        alphas: Array2<f64>,
    }

    impl TrainedBasis {
        fn view(&self) -> KernelBasisView<'_> {
            KernelBasisView {
                kernel: &self.kernel,
                subsample: self.subsample.view(),
                gram_matrix: self.gram.view(),
                alphas: self.alphas.view(),
            }
        }
    }

    fn gaussian_points(n: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array2::from_shape_fn((n, d), |_| normal.sample(&mut rng))
    }

    fn train(x: Array2<f64>, kernel: Kernel, components: RetainedComponents) -> TrainedBasis {
        let mut gram = kernel.gram_matrix(x.view(), x.view()).unwrap();
        symmetrize(&mut gram);
        let centered = double_center(gram.view()).unwrap();
        let backend = LinAlgBackendProvider::<f64>::new();
        let basis = leading_eigenbasis(&backend, &centered, components, x.ncols(), 1e-10).unwrap();
        TrainedBasis { kernel, subsample: x, gram, alphas: basis.alphas }
    }

    #[test]
    fn test_full_basis_reconstructs_training_points() {
        let trained = train(gaussian_points(30, 3, 17), Kernel::rbf(1.5), RetainedComponents::Same);
        let errors = reconstruction_errors(trained.view(), trained.subsample.view(), 500).unwrap();
        assert_eq!(errors.len(), 30);
        for &e in errors.iter() {
            assert_abs_diff_eq!(e, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_matches_explicit_feature_space_formula() {
        // err(x) = kc(x, x) - sum_k (sum_j alpha_jk kc(x_j, x))^2 with kc the centered kernel.
        let trained = train(gaussian_points(20, 2, 4), Kernel::rbf(1.0), RetainedComponents::Fixed(4));
        let queries = gaussian_points(5, 2, 99);
        let errors = reconstruction_errors(trained.view(), queries.view(), 2).unwrap();

        let n = trained.subsample.nrows() as f64;
        let k_train_mean = trained.gram.mean_axis(Axis(0)).unwrap();
        let grand = k_train_mean.mean().unwrap();
        for (qi, query) in queries.rows().into_iter().enumerate() {
            let q2 = query.to_owned().insert_axis(Axis(0));
            let k_q = trained.kernel.gram_matrix(trained.subsample.view(), q2.view()).unwrap().column(0).to_owned();
            let q_mean = k_q.sum() / n;
            let centered_k_q = k_q.mapv(|v| v - q_mean) - &k_train_mean + grand;
            let self_term = 1.0 - 2.0 * q_mean + grand;
            let captured: f64 = trained
                .alphas
                .columns()
                .into_iter()
                .map(|a| a.dot(&centered_k_q).powi(2))
                .sum();
            assert_abs_diff_eq!(errors[qi], (self_term - captured).max(0.0), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_block_size_does_not_change_scores() {
        let trained = train(gaussian_points(25, 2, 8), Kernel::rbf(0.7), RetainedComponents::Fixed(5));
        let queries = gaussian_points(37, 2, 21);
        let single = reconstruction_errors(trained.view(), queries.view(), 1).unwrap();
        let odd = reconstruction_errors(trained.view(), queries.view(), 7).unwrap();
        let whole = reconstruction_errors(trained.view(), queries.view(), 37).unwrap();
        for i in 0..37 {
            assert_abs_diff_eq!(single[i], whole[i], epsilon = 1e-10);
            assert_abs_diff_eq!(odd[i], whole[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_far_points_score_near_centered_self_norm() {
        let trained = train(gaussian_points(40, 2, 31), Kernel::rbf(1.0), RetainedComponents::Fixed(3));
        let far = ndarray::array![[50.0, 50.0], [-80.0, 10.0]];
        let errors = reconstruction_errors(trained.view(), far.view(), 500).unwrap();
        let grand = trained.gram.mean().unwrap();
        // Kernel row is zero, so the centered norm is 1 + grand mean minus the mean's projection.
        for &e in errors.iter() {
            assert!(e <= 1.0 + grand + 1e-9);
            assert!(e >= 1.0 - 1e-9);
        }
    }

    #[test]
    fn test_shape_and_parameter_errors() {
        let trained = train(gaussian_points(10, 2, 1), Kernel::rbf(1.0), RetainedComponents::Fixed(2));
        let wrong = Array2::<f64>::zeros((3, 4));
        let empty = Array2::<f64>::zeros((0, 2));
        let fine = Array2::<f64>::zeros((3, 2));

        assert!(matches!(
            reconstruction_errors(trained.view(), wrong.view(), 10),
            Err(KpcaError::FeatureMismatch { expected: 2, found: 4 })
        ));
        assert!(matches!(
            reconstruction_errors(trained.view(), empty.view(), 10),
            Err(KpcaError::EmptyInput { .. })
        ));
        assert!(matches!(
            reconstruction_errors(trained.view(), fine.view(), 0),
            Err(KpcaError::InvalidParameter { name: "batch_size", .. })
        ));
    }
}
