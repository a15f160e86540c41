use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::basis_transform::BasisTransform;
use crate::config::{MacenkoConfig, SamplingConfig};
use crate::error::{Result, StainError};
use crate::estimator::{StainAlgorithm, StainEstimate, StainVectorEstimator};
use crate::histogram::PercentileHistogram;
use crate::sampler::WsiSampler;
use crate::stain_matrix::StainMatrix;
use crate::tile_source::TileSource;

/// Macenko stain estimation.
///
/// Sampled optical densities are projected onto their dominant plane. The
/// angular percentile extremes of the projected cloud, mapped back into
/// optical-density space, are the two stain directions. The third row of
/// the resulting matrix is always unresolved.
pub struct MacenkoEstimator<S: TileSource + ?Sized, R: Rng = ChaCha8Rng> {
    sampler: WsiSampler<S, R>,
    config: MacenkoConfig,
}

impl<S: TileSource + ?Sized> MacenkoEstimator<S, ChaCha8Rng> {
    pub fn new(source: Arc<S>) -> Self {
        Self::with_config(source, MacenkoConfig::default())
    }

    pub fn with_config(source: Arc<S>, config: MacenkoConfig) -> Self {
        Self::from_sampler(WsiSampler::new(source), config)
    }
}

impl<S: TileSource + ?Sized, R: Rng> MacenkoEstimator<S, R> {
    pub fn from_sampler(sampler: WsiSampler<S, R>, config: MacenkoConfig) -> Self {
        Self { sampler, config }
    }

    pub fn config(&self) -> &MacenkoConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MacenkoConfig) {
        self.config = config;
    }

    pub fn sampler(&self) -> &WsiSampler<S, R> {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut WsiSampler<S, R> {
        &mut self.sampler
    }

    pub fn sample_size(&self) -> usize {
        self.config.sampling.sample_size
    }

    pub fn set_sample_size(&mut self, sample_size: usize) {
        self.config.sampling.sample_size = sample_size;
    }

    pub fn use_subsample(&self) -> bool {
        self.config.sampling.use_subsample
    }

    pub fn set_use_subsample(&mut self, use_subsample: bool) {
        self.config.sampling.use_subsample = use_subsample;
    }

    pub fn od_threshold(&self) -> f64 {
        self.config.sampling.od_threshold
    }

    pub fn set_od_threshold(&mut self, od_threshold: f64) {
        self.config.sampling.od_threshold = od_threshold;
    }

    pub fn percentile_threshold(&self) -> f64 {
        self.config.percentile_threshold
    }

    pub fn set_percentile_threshold(&mut self, percentile_threshold: f64) {
        self.config.percentile_threshold = percentile_threshold;
    }

    pub fn num_histogram_bins(&self) -> usize {
        self.config.num_histogram_bins
    }

    pub fn set_num_histogram_bins(&mut self, num_histogram_bins: usize) {
        self.config.num_histogram_bins = num_histogram_bins;
    }
}

impl<S: TileSource + ?Sized, R: Rng> StainVectorEstimator for MacenkoEstimator<S, R> {
    fn algorithm(&self) -> StainAlgorithm {
        StainAlgorithm::Macenko
    }

    fn sampling_config(&self) -> &SamplingConfig {
        &self.config.sampling
    }

    fn sampling_config_mut(&mut self) -> &mut SamplingConfig {
        &mut self.config.sampling
    }

    fn compute_stain_vectors(&mut self) -> Result<StainEstimate> {
        if self.sampler.source().is_none() {
            return Err(StainError::NoImageSource);
        }
        self.config.validate()?;
        let histogram =
            PercentileHistogram::new(self.config.percentile_threshold, self.config.num_histogram_bins)?;
        let start_time = Instant::now();
        info!(
            "Macenko estimation: sample size {}, subsample {}, OD threshold {}, percentile {}",
            self.config.sampling.sample_size,
            self.config.sampling.use_subsample,
            self.config.sampling.od_threshold,
            self.config.percentile_threshold
        );

        let samples = self.sampler.sample(&self.config.sampling)?;
        let pixel_count = samples.nrows();
        if pixel_count == 0 {
            return Err(StainError::NoPixelsSampled);
        }

        let transform = BasisTransform::new(samples.view(), true)?;
        let projected = transform.project_points(samples.view(), false)?;
        let extremes = histogram.threshold_vectors(projected.view())?;
        let stains = transform.back_project_points(extremes.view(), false)?;
        debug!("Unnormalized Macenko stains: {:?}", stains);

        let stain_matrix = StainMatrix::from_unnormalized(stains.view())?;
        info!(
            "Macenko estimated {} stains from {} pixels in {:?}",
            stain_matrix.num_resolved(),
            pixel_count,
            start_time.elapsed()
        );
        Ok(StainEstimate {
            stain_matrix,
            pixel_count,
        })
    }
}
