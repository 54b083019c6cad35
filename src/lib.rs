// Kernel principal component analysis (KPCA) for outlier detection

#![doc = include_str!("../README.md")]

pub mod eigenbasis;
pub mod error;
pub mod kernel;
pub mod kpca;
pub mod linalg_backends;
pub mod reconstruction;
pub mod subsample;
pub mod threshold;


pub use eigenbasis::RetainedComponents;
pub use error::KpcaError;
pub use kernel::Kernel;
pub use kpca::{KernelPcaConfig, KernelPcaDetector, KpcaFitOutput, KpcaModel, DEFAULT_EIGENVALUE_TOLERANCE};
