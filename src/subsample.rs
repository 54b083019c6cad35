// src/subsample.rs

use log::{debug, warn};
use ndarray::{Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::KpcaError;

/// Builds the RNG used for subsampling. `None` seeds from OS entropy.
pub fn subsample_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Number of rows that will form the kernel basis.
///
/// Starts at `floor(sample_fraction * n_samples)`. If that falls short of
/// `min_rows` the subsample is grown to `min_rows`, clamped to `n_samples`.
pub fn resolve_subsample_size(n_samples: usize, sample_fraction: f64, min_rows: usize) -> usize {
    let requested = (sample_fraction * n_samples as f64).floor() as usize;
    let requested = requested.min(n_samples);
    if requested >= min_rows.max(1) {
        return requested;
    }

    let adjusted = min_rows.max(1).min(n_samples);
    if adjusted < min_rows {
        warn!(
            "Kernel basis needs at least {} rows but only {} samples are available; using all samples.",
            min_rows, n_samples
        );
    } else {
        debug!(
            "Sample fraction {} yields {} rows, fewer than the required {}; growing the subsample to {} rows.",
            sample_fraction, requested, min_rows, adjusted
        );
    }
    adjusted
}

/// Draws `n_sub` distinct rows of `x` uniformly without replacement.
///
/// The whole index range `[0, n_samples)` is permuted and the first `n_sub`
/// indices are kept, so every row is equally likely to be selected. When
/// `n_sub >= n_samples` an owned copy of `x` is returned in its original order.
pub fn subsample_rows<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    n_sub: usize,
    rng: &mut R,
) -> Result<Array2<f64>, KpcaError> {
    let n_samples = x.nrows();
    if n_samples == 0 || x.ncols() == 0 {
        return Err(KpcaError::EmptyInput { rows: n_samples, cols: x.ncols() });
    }
    if n_sub == 0 {
        return Err(KpcaError::invalid("n_sub", "subsample must contain at least one row"));
    }
    if n_sub >= n_samples {
        return Ok(x.to_owned());
    }

    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(rng);
    indices.truncate(n_sub);
    Ok(x.select(Axis(0), &indices))
}
