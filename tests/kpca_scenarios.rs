// In tests/kpca_scenarios.rs

use efficient_kpca::{Kernel, KernelPcaConfig, KernelPcaDetector, KpcaError, RetainedComponents};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

const N_INLIERS: usize = 200;
const N_OUTLIERS: usize = 20;
const OUTLIER_RADIUS: f64 = 12.0;

fn standard_normal_cloud(n_samples: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array2::from_shape_fn((n_samples, 2), |_| normal.sample(&mut rng))
}

/// Points evenly spaced on a circle around the origin.
fn ring(n_points: usize, radius: f64, phase: f64) -> Array2<f64> {
    Array2::from_shape_fn((n_points, 2), |(i, j)| {
        let angle = phase + 2.0 * PI * i as f64 / n_points as f64;
        if j == 0 {
            radius * angle.cos()
        } else {
            radius * angle.sin()
        }
    })
}

/// Inliers first, then outliers.
fn contaminated_dataset(seed: u64) -> Array2<f64> {
    let inliers = standard_normal_cloud(N_INLIERS, seed);
    let outliers = ring(N_OUTLIERS, OUTLIER_RADIUS, 0.0);
    concatenate(Axis(0), &[inliers.view(), outliers.view()]).unwrap()
}

fn indices_of_largest(scores: &Array1<f64>, k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);
    order.sort_unstable();
    order
}

// A full basis (`Same`) reconstructs every training row, outliers included,
// so contaminated training data is scored with one component per feature.
fn scenario_config() -> KernelPcaConfig {
    KernelPcaConfig::default()
        .with_kernel(Kernel::rbf(1.0))
        .with_components(RetainedComponents::Auto)
        .with_contamination(0.1)
        .with_random_seed(42)
}

#[test]
fn ring_outliers_receive_the_highest_scores() {
    let data = contaminated_dataset(7);
    let mut detector = KernelPcaDetector::new(scenario_config());
    detector.fit(data.view()).unwrap();

    let scores = detector.decision_scores().unwrap();
    let expected: Vec<usize> = (N_INLIERS..N_INLIERS + N_OUTLIERS).collect();
    assert_eq!(indices_of_largest(scores, N_OUTLIERS), expected);

    let labels = detector.labels().unwrap();
    for i in N_INLIERS..N_INLIERS + N_OUTLIERS {
        assert_eq!(labels[i], 1, "outlier {} should be labelled", i);
    }
    let n_flagged = labels.iter().filter(|&&l| l == 1).count() as f64;
    let expected_flagged = 0.1 * (N_INLIERS + N_OUTLIERS) as f64;
    assert!(
        (n_flagged - expected_flagged).abs() <= 2.0,
        "flagged {} rows, expected about {}",
        n_flagged,
        expected_flagged
    );
}

#[test]
fn fresh_points_are_classified_by_the_fitted_model() {
    let data = contaminated_dataset(11);
    let fitted = scenario_config().fit(data.view()).unwrap();
    let model = &fitted.model;

    let fresh_outliers = ring(10, OUTLIER_RADIUS + 3.0, 0.3);
    let outlier_labels = model.predict(fresh_outliers.view(), None).unwrap();
    assert!(outlier_labels.iter().all(|&l| l == 1), "labels: {:?}", outlier_labels);

    let core = ring(8, 0.3, 0.0);
    let core_labels = model.predict(core.view(), None).unwrap();
    assert!(core_labels.iter().all(|&l| l == 0), "labels: {:?}", core_labels);
}

#[test]
fn full_basis_on_clean_data_separates_new_outliers() {
    let clean = standard_normal_cloud(N_INLIERS, 3);
    let config = KernelPcaConfig::default()
        .with_kernel(Kernel::rbf(2.0))
        .with_components(RetainedComponents::Same)
        .with_random_seed(1);
    let fitted = config.fit(clean.view()).unwrap();

    let far = ring(12, OUTLIER_RADIUS, 0.1);
    for &s in fitted.model.decision_function(far.view()).unwrap().iter() {
        assert!(s >= 0.9, "far point scored {}", s);
    }

    let near = ring(12, 1.5, 0.2);
    let near_scores = fitted.model.decision_function(near.view()).unwrap();
    for &s in near_scores.iter() {
        assert!(s < 0.5, "in-distribution point scored {}", s);
    }
}

#[test]
fn subsampled_basis_still_ranks_outliers_above_inliers() {
    let data = contaminated_dataset(19);
    let config = scenario_config().with_sample_fraction(0.5).with_batch_size(64);
    let fitted = config.fit(data.view()).unwrap();
    assert_eq!(fitted.model.subsample().nrows(), (N_INLIERS + N_OUTLIERS) / 2);

    let scores = &fitted.decision_scores;
    let min_outlier = scores
        .slice(ndarray::s![N_INLIERS..])
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let mut inlier_scores = scores.slice(ndarray::s![..N_INLIERS]).to_vec();
    inlier_scores.sort_by(|a, b| a.total_cmp(b));
    let inlier_median = inlier_scores[N_INLIERS / 2];
    assert!(
        min_outlier > inlier_median,
        "weakest outlier {} should score above the inlier median {}",
        min_outlier,
        inlier_median
    );
}

#[test]
fn too_few_rows_for_requested_components_is_a_configuration_error() {
    let data = standard_normal_cloud(4, 5);
    let config = KernelPcaConfig::default().with_components(RetainedComponents::Fixed(8));
    let err = config.fit(data.view()).unwrap_err();
    assert!(matches!(err, KpcaError::ComponentsExceedSubsample { requested: 8, available: 4 }));
    assert!(err.to_string().contains("8"));
}
