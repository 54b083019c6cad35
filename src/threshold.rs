// src/threshold.rs

use ndarray::{Array1, ArrayView1};

use crate::error::KpcaError;

/// Quantile of `values` at probability `p`, linearly interpolated between
/// the closest ranks of the ascending sort (position `h = (n - 1) * p`).
/// This is the "linear" method, so `p = 0` is the minimum and `p = 1` the maximum.
///
/// # Errors
/// `EmptyInput` for an empty vector, `InvalidParameter` if `p` is outside
/// `[0, 1]`, `NonFiniteScore` if any value is NaN or infinite.
pub fn linear_quantile(values: ArrayView1<f64>, p: f64) -> Result<f64, KpcaError> {
    if values.is_empty() {
        return Err(KpcaError::EmptyInput { rows: 0, cols: 1 });
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(KpcaError::invalid("quantile", format!("probability must lie in [0, 1], got {}", p)));
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(KpcaError::NonFiniteScore { index });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = h - lo as f64;
    Ok(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// Checks that `contamination` lies strictly inside `(0, 0.5)`.
pub fn validate_contamination(contamination: f64) -> Result<(), KpcaError> {
    if contamination.is_finite() && contamination > 0.0 && contamination < 0.5 {
        Ok(())
    } else {
        Err(KpcaError::invalid(
            "contamination",
            format!("must lie strictly between 0 and 0.5, got {}", contamination),
        ))
    }
}

/// Score above which the top `contamination` fraction of `scores` lies:
/// the `(1 - contamination)` linear quantile.
pub fn contamination_threshold(scores: ArrayView1<f64>, contamination: f64) -> Result<f64, KpcaError> {
    validate_contamination(contamination)?;
    linear_quantile(scores, 1.0 - contamination)
}

/// Binary labels: 1 where `score >= threshold` (outlier), 0 otherwise.
pub fn label_scores(scores: ArrayView1<f64>, threshold: f64) -> Array1<u8> {
    scores.mapv(|s| u8::from(s >= threshold))
}
