// Kernel PCA anomaly detection

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::eigenbasis::{double_center, leading_eigenbasis, symmetrize, RetainedComponents};
use crate::error::KpcaError;
use crate::kernel::Kernel;
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use crate::reconstruction::{reconstruction_errors, KernelBasisView};
use crate::subsample::{resolve_subsample_size, subsample_rng, subsample_rows};
use crate::threshold::{contamination_threshold, label_scores, validate_contamination};

/// Default relative eigenvalue floor, as a fraction of the largest eigenvalue.
pub const DEFAULT_EIGENVALUE_TOLERANCE: f64 = 1e-10;

/// Configuration for fitting a kernel PCA detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelPcaConfig {
    /// Kernel used for every gram matrix.
    pub kernel: Kernel,
    /// Number of eigenvectors of the centered gram matrix to keep.
    pub components: RetainedComponents,
    /// Fraction of the training rows, in (0, 1], used as the kernel basis.
    /// Grown automatically when it would leave fewer rows than `components`
    /// or the number of features.
    pub sample_fraction: f64,
    /// Rows scored per block. Bounds the `n_sub x batch_size` kernel slab
    /// held in memory; has no effect on the scores.
    pub batch_size: usize,
    /// Expected fraction of outliers in the training data, in (0, 0.5).
    pub contamination: f64,
    /// Eigenvalues at or below `eigenvalue_tolerance * lambda_max` are
    /// treated as zero.
    pub eigenvalue_tolerance: f64,
    /// Seed for the subsampling permutation. `None` draws from OS entropy.
    pub random_seed: Option<u64>,
}

impl Default for KernelPcaConfig {
    fn default() -> Self {
        KernelPcaConfig {
            kernel: Kernel::default(),
            components: RetainedComponents::Same,
            sample_fraction: 1.0,
            batch_size: 500,
            contamination: 0.1,
            eigenvalue_tolerance: DEFAULT_EIGENVALUE_TOLERANCE,
            random_seed: None,
        }
    }
}

impl KernelPcaConfig {
    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_components(mut self, components: RetainedComponents) -> Self {
        self.components = components;
        self
    }

    pub fn with_sample_fraction(mut self, sample_fraction: f64) -> Self {
        self.sample_fraction = sample_fraction;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_eigenvalue_tolerance(mut self, eigenvalue_tolerance: f64) -> Self {
        self.eigenvalue_tolerance = eigenvalue_tolerance;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Checks every parameter. Called at the start of `fit`.
    pub fn validate(&self) -> Result<(), KpcaError> {
        self.kernel.validate()?;
        if let RetainedComponents::Fixed(0) = self.components {
            return Err(KpcaError::invalid("components", "must retain at least one component"));
        }
        if !(self.sample_fraction.is_finite() && self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(KpcaError::invalid(
                "sample_fraction",
                format!("must lie in (0, 1], got {}", self.sample_fraction),
            ));
        }
        if self.batch_size == 0 {
            return Err(KpcaError::invalid("batch_size", "must be positive"));
        }
        validate_contamination(self.contamination)?;
        if !(self.eigenvalue_tolerance.is_finite() && (0.0..1.0).contains(&self.eigenvalue_tolerance)) {
            return Err(KpcaError::invalid(
                "eigenvalue_tolerance",
                format!("must lie in [0, 1), got {}", self.eigenvalue_tolerance),
            ));
        }
        Ok(())
    }

    /// Fits a detector to `data` (shape `(n_samples, d_features)`) with the
    /// linear algebra backend selected at compile time.
    ///
    /// Learns the kernel eigenbasis from a subsample of the rows, scores every
    /// training row by its reconstruction error, and sets the decision
    /// threshold at the `(1 - contamination)` quantile of those scores.
    ///
    /// # Errors
    /// Configuration errors, shape errors (empty or non-finite input),
    /// `ComponentsExceedSubsample`, `DegenerateKernel`, or backend failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use efficient_kpca::{KernelPcaConfig, RetainedComponents};
    ///
    /// let data = array![[0.0, 0.1], [0.2, 0.0], [0.1, 0.2], [0.3, 0.1], [4.0, 4.0]];
    /// let config = KernelPcaConfig::default()
    ///     .with_components(RetainedComponents::Fixed(2))
    ///     .with_contamination(0.2);
    /// let fitted = config.fit(data.view()).unwrap();
    /// assert_eq!(fitted.decision_scores.len(), 5);
    /// ```
    pub fn fit(&self, data: ArrayView2<f64>) -> Result<KpcaFitOutput, KpcaError> {
        self.fit_with_backend(&LinAlgBackendProvider::<f64>::new(), data)
    }

    /// `fit` with an explicit eigendecomposition backend.
    pub fn fit_with_backend<B: BackendEigh<f64>>(
        &self,
        backend: &B,
        data: ArrayView2<f64>,
    ) -> Result<KpcaFitOutput, KpcaError> {
        self.validate()?;
        check_finite_matrix(data)?;
        let (n_samples, n_features) = data.dim();

        let required = self.components.required_rows(n_features);
        // Centering always leaves a null direction, so q components need q + 1 rows.
        let min_rows = required.map_or(0, |q| q + 1).max(n_features);
        let n_sub = resolve_subsample_size(n_samples, self.sample_fraction, min_rows);
        if let Some(q) = required {
            if q > n_sub {
                return Err(KpcaError::ComponentsExceedSubsample { requested: q, available: n_sub });
            }
        }

        info!(
            "Fitting kernel PCA detector. Samples={}, Features={}, Kernel basis rows={}, Kernel={:?}, Components={:?}",
            n_samples, n_features, n_sub, self.kernel, self.components
        );
        let overall_start_time = Instant::now();

        let mut rng = subsample_rng(self.random_seed);
        let subsample = subsample_rows(data, n_sub, &mut rng)?;

        let gram_start_time = Instant::now();
        let mut gram_matrix = self.kernel.gram_matrix(subsample.view(), subsample.view())?;
        // Absorb floating-point asymmetry before the symmetric eigensolver.
        symmetrize(&mut gram_matrix);
        let centered_gram = double_center(gram_matrix.view())?;
        info!("Computed {}x{} gram matrix in {:?}", n_sub, n_sub, gram_start_time.elapsed());

        let eigen_start_time = Instant::now();
        let basis = leading_eigenbasis(
            backend,
            &centered_gram,
            self.components,
            n_features,
            self.eigenvalue_tolerance,
        )?;
        drop(centered_gram);
        info!(
            "Computed {} kernel components in {:?}",
            basis.num_components(),
            eigen_start_time.elapsed()
        );

        let model = KpcaModel {
            kernel: self.kernel,
            subsample,
            gram_matrix,
            alphas: basis.alphas,
            eigenvalues: basis.eigenvalues,
            threshold: 0.0,
            batch_size: self.batch_size,
        };

        let scoring_start_time = Instant::now();
        let decision_scores = model.decision_function(data)?;
        let threshold = contamination_threshold(decision_scores.view(), self.contamination)?;
        let labels = label_scores(decision_scores.view(), threshold);
        info!("Scored {} training rows in {:?}", n_samples, scoring_start_time.elapsed());

        let n_outliers = labels.iter().filter(|&&l| l == 1).count();
        info!(
            "Finished kernel PCA fit in {:?}. Threshold={:.6e}, flagged {} of {} training rows.",
            overall_start_time.elapsed(),
            threshold,
            n_outliers,
            n_samples
        );

        Ok(KpcaFitOutput {
            model: KpcaModel { threshold, ..model },
            decision_scores,
            labels,
        })
    }
}

/// Immutable trained model: the kernel basis, its eigenvectors, and the
/// decision threshold. Safe to share between threads for scoring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KpcaModel {
    kernel: Kernel,
    /// Rows of the training data spanning the kernel basis.
    /// Shape: (n_sub, d_features)
    subsample: Array2<f64>,
    /// Symmetrized, uncentered gram matrix over `subsample`.
    /// Shape: (n_sub, n_sub)
    gram_matrix: Array2<f64>,
    /// Eigenvectors of the centered gram matrix scaled by `1 / sqrt(eigenvalue)`.
    /// Shape: (n_sub, q)
    alphas: Array2<f64>,
    /// Retained eigenvalues, largest first.
    /// Shape: (q)
    eigenvalues: Array1<f64>,
    /// Scores at or above this are outliers.
    threshold: f64,
    batch_size: usize,
}

impl KpcaModel {
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn subsample(&self) -> &Array2<f64> {
        &self.subsample
    }

    pub fn gram_matrix(&self) -> &Array2<f64> {
        &self.gram_matrix
    }

    pub fn alphas(&self) -> &Array2<f64> {
        &self.alphas
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of features the model was trained on.
    pub fn n_features(&self) -> usize {
        self.subsample.ncols()
    }

    pub fn num_components(&self) -> usize {
        self.alphas.ncols()
    }

    fn basis_view(&self) -> KernelBasisView<'_> {
        KernelBasisView {
            kernel: &self.kernel,
            subsample: self.subsample.view(),
            gram_matrix: self.gram_matrix.view(),
            alphas: self.alphas.view(),
        }
    }

    /// Reconstruction error of each row of `data`; higher is more anomalous.
    pub fn decision_function(&self, data: ArrayView2<f64>) -> Result<Array1<f64>, KpcaError> {
        self.decision_function_with_batch_size(data, self.batch_size)
    }

    /// `decision_function` with a different block size.
    pub fn decision_function_with_batch_size(
        &self,
        data: ArrayView2<f64>,
        batch_size: usize,
    ) -> Result<Array1<f64>, KpcaError> {
        if data.ncols() != self.n_features() && data.nrows() > 0 {
            return Err(KpcaError::FeatureMismatch { expected: self.n_features(), found: data.ncols() });
        }
        check_finite_matrix(data)?;
        reconstruction_errors(self.basis_view(), data, batch_size)
    }

    /// Reconstruction error of a single example.
    pub fn score_sample(&self, sample: ArrayView1<f64>) -> Result<f64, KpcaError> {
        let as_row = sample.insert_axis(Axis(0));
        let scores = self.decision_function(as_row)?;
        Ok(scores[0])
    }

    /// Outlier labels (1 = outlier) for each row of `data`, using `threshold`
    /// or the fitted threshold when `None`.
    pub fn predict(&self, data: ArrayView2<f64>, threshold: Option<f64>) -> Result<Array1<u8>, KpcaError> {
        let threshold = self.resolve_threshold(threshold)?;
        let scores = self.decision_function(data)?;
        Ok(label_scores(scores.view(), threshold))
    }

    /// Outlier label of a single example.
    pub fn predict_sample(&self, sample: ArrayView1<f64>, threshold: Option<f64>) -> Result<u8, KpcaError> {
        let threshold = self.resolve_threshold(threshold)?;
        Ok(u8::from(self.score_sample(sample)? >= threshold))
    }

    fn resolve_threshold(&self, threshold: Option<f64>) -> Result<f64, KpcaError> {
        match threshold {
            Some(t) if t.is_nan() => Err(KpcaError::invalid("threshold", "must not be NaN")),
            Some(t) => Ok(t),
            None => Ok(self.threshold),
        }
    }
}

/// Result of fitting: the trained model plus the training set's scores and labels.
#[derive(Clone, Debug)]
pub struct KpcaFitOutput {
    pub model: KpcaModel,
    /// Reconstruction error of every training row.
    /// Shape: (n_samples)
    pub decision_scores: Array1<f64>,
    /// `1` for training rows at or above the threshold, `0` otherwise.
    /// Shape: (n_samples)
    pub labels: Array1<u8>,
}

impl KpcaFitOutput {
    pub fn threshold(&self) -> f64 {
        self.model.threshold()
    }
}

/// Stateful detector: holds a configuration and, once fitted, the model
/// and training results.
#[derive(Clone, Debug, Default)]
pub struct KernelPcaDetector {
    config: KernelPcaConfig,
    fitted: Option<KpcaFitOutput>,
}

impl KernelPcaDetector {
    /// Creates an unfitted detector.
    ///
    /// # Examples
    ///
    /// ```
    /// use efficient_kpca::{KernelPcaConfig, KernelPcaDetector};
    /// let detector = KernelPcaDetector::new(KernelPcaConfig::default());
    /// assert!(!detector.is_fitted());
    /// ```
    pub fn new(config: KernelPcaConfig) -> Self {
        Self { config, fitted: None }
    }

    pub fn config(&self) -> &KernelPcaConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fits from scratch, replacing any previous fit.
    ///
    /// On error the previous fit, if any, is discarded.
    pub fn fit(&mut self, data: ArrayView2<f64>) -> Result<&mut Self, KpcaError> {
        self.fitted = None;
        let output = self.config.fit(data)?;
        debug!("Detector fitted with {} components.", output.model.num_components());
        self.fitted = Some(output);
        Ok(self)
    }

    fn fitted(&self) -> Result<&KpcaFitOutput, KpcaError> {
        self.fitted.as_ref().ok_or(KpcaError::NotFitted)
    }

    pub fn model(&self) -> Result<&KpcaModel, KpcaError> {
        Ok(&self.fitted()?.model)
    }

    /// Consumes the detector and returns the fitted model.
    pub fn into_model(self) -> Result<KpcaModel, KpcaError> {
        self.fitted.map(|f| f.model).ok_or(KpcaError::NotFitted)
    }

    pub fn decision_scores(&self) -> Result<&Array1<f64>, KpcaError> {
        Ok(&self.fitted()?.decision_scores)
    }

    pub fn labels(&self) -> Result<&Array1<u8>, KpcaError> {
        Ok(&self.fitted()?.labels)
    }

    pub fn threshold(&self) -> Result<f64, KpcaError> {
        Ok(self.fitted()?.threshold())
    }

    pub fn decision_function(&self, data: ArrayView2<f64>) -> Result<Array1<f64>, KpcaError> {
        self.model()?.decision_function(data)
    }

    pub fn score_sample(&self, sample: ArrayView1<f64>) -> Result<f64, KpcaError> {
        self.model()?.score_sample(sample)
    }

    pub fn predict(&self, data: ArrayView2<f64>, threshold: Option<f64>) -> Result<Array1<u8>, KpcaError> {
        self.model()?.predict(data, threshold)
    }

    pub fn predict_sample(&self, sample: ArrayView1<f64>, threshold: Option<f64>) -> Result<u8, KpcaError> {
        self.model()?.predict_sample(sample, threshold)
    }
}

fn check_finite_matrix(data: ArrayView2<f64>) -> Result<(), KpcaError> {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return Err(KpcaError::EmptyInput { rows, cols });
    }
    if let Some(((row, col), _)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(KpcaError::NonFiniteInput { row, col });
    }
    Ok(())
}
