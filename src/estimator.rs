use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::{MacenkoConfig, NmfConfig, SamplingConfig};
use crate::error::{Result, StainError};
use crate::macenko::MacenkoEstimator;
use crate::nmf::NmfEstimator;
use crate::stain_matrix::StainMatrix;
use crate::tile_source::TileSource;

/// Stain separation algorithms offered to the profile builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StainAlgorithm {
    /// Angular percentiles of the optical-density plane (2 stains).
    Macenko,
    /// Non-negative matrix factorization (2 or 3 stains).
    Nmf,
}

/// Result of a successful estimation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StainEstimate {
    pub stain_matrix: StainMatrix,
    /// Number of sampled pixels the estimate was computed from; always > 0.
    pub pixel_count: usize,
}

/// Estimates stain vectors from the image source bound to the estimator.
pub trait StainVectorEstimator {
    fn algorithm(&self) -> StainAlgorithm;

    fn sampling_config(&self) -> &SamplingConfig;

    fn sampling_config_mut(&mut self) -> &mut SamplingConfig;

    /// Samples the image with the current configuration and estimates the
    /// stain matrix.
    fn compute_stain_vectors(&mut self) -> Result<StainEstimate>;

    /// Stores `use_subsample` and `sample_size` in the sampling
    /// configuration, then estimates as [`compute_stain_vectors`] does.
    ///
    /// Exhaustive sampling with a zero sample size is rejected before the
    /// configuration is touched.
    ///
    /// [`compute_stain_vectors`]: StainVectorEstimator::compute_stain_vectors
    fn compute_stain_vectors_with(
        &mut self,
        use_subsample: bool,
        sample_size: usize,
    ) -> Result<StainEstimate> {
        if !use_subsample && sample_size == 0 {
            return Err(StainError::InvalidSampleSize);
        }
        let sampling = self.sampling_config_mut();
        sampling.use_subsample = use_subsample;
        sampling.sample_size = sample_size;
        self.compute_stain_vectors()
    }

    /// Writes the row-major stain matrix into `output` and returns the pixel
    /// count, or zeroes `output` and returns 0 if estimation failed.
    fn fill_stain_vectors(&mut self, output: &mut [f64; 9]) -> usize {
        match self.compute_stain_vectors() {
            Ok(estimate) => {
                *output = estimate.stain_matrix.as_flat();
                estimate.pixel_count
            }
            Err(e) => {
                warn!("{:?} stain vector estimation failed: {}", self.algorithm(), e);
                *output = [0.0; 9];
                0
            }
        }
    }
}

/// Configuration of either estimator, tagged by algorithm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum EstimatorConfig {
    Macenko(MacenkoConfig),
    Nmf(NmfConfig),
}

impl EstimatorConfig {
    /// Default configuration of `algorithm`.
    pub fn for_algorithm(algorithm: StainAlgorithm) -> Self {
        match algorithm {
            StainAlgorithm::Macenko => EstimatorConfig::Macenko(MacenkoConfig::default()),
            StainAlgorithm::Nmf => EstimatorConfig::Nmf(NmfConfig::default()),
        }
    }

    pub fn algorithm(&self) -> StainAlgorithm {
        match self {
            EstimatorConfig::Macenko(_) => StainAlgorithm::Macenko,
            EstimatorConfig::Nmf(_) => StainAlgorithm::Nmf,
        }
    }
}

/// Builds the estimator selected by `config`, bound to `source`.
pub fn build_estimator<S: TileSource + ?Sized + 'static>(
    config: EstimatorConfig,
    source: Arc<S>,
) -> Box<dyn StainVectorEstimator> {
    match config {
        EstimatorConfig::Macenko(config) => Box::new(MacenkoEstimator::with_config(source, config)),
        EstimatorConfig::Nmf(config) => Box::new(NmfEstimator::with_config(source, config)),
    }
}
