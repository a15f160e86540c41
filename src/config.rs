//! Estimator configuration values.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StainError};

/// Default summed optical density below which a pixel counts as background.
pub const DEFAULT_OD_THRESHOLD: f64 = 0.15;
/// Default Macenko angular percentile, in percent.
pub const DEFAULT_PERCENTILE_THRESHOLD: f64 = 1.0;
/// Default number of angular histogram bins for Macenko.
pub const DEFAULT_NUM_HISTOGRAM_BINS: usize = 1024;
/// Default NMF rank.
pub const DEFAULT_NUM_STAINS: usize = 2;
/// Default NMF iteration cap.
pub const DEFAULT_NMF_MAX_ITERATIONS: usize = 10_000;
/// Default NMF stopping residue.
pub const DEFAULT_NMF_MIN_RESIDUE: f64 = 1e-5;

/// Which pixels of the slide an estimation draws from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of random draws in subsample mode. Must be greater than 0 even
    /// in exhaustive mode, where it is otherwise ignored.
    pub sample_size: usize,
    /// Draw a random subsample when true, sweep every pixel of the level
    /// when false.
    pub use_subsample: bool,
    /// Pixels whose summed R+G+B optical density does not exceed this are
    /// rejected as background.
    pub od_threshold: f64,
    /// Resolution level to sample, 0 being the highest resolution.
    pub level: usize,
    /// Focus plane to sample; `None` selects the image default.
    pub focus_plane: Option<usize>,
    /// Band to sample; `None` selects the image default.
    pub band: Option<usize>,
}

impl Default for SamplingConfig {
    /// Subsample mode at level 0 with the image's default plane and band.
    /// `sample_size` starts at 0 and has to be set before estimating.
    fn default() -> Self {
        SamplingConfig {
            sample_size: 0,
            use_subsample: true,
            od_threshold: DEFAULT_OD_THRESHOLD,
            level: 0,
            focus_plane: None,
            band: None,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(StainError::InvalidSampleSize);
        }
        Ok(())
    }
}

/// Parameters of the Macenko estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacenkoConfig {
    pub sampling: SamplingConfig,
    /// Angular percentile, in percent, clipped off each end of the projected
    /// sample cloud. Must lie in `(0, 100]`.
    pub percentile_threshold: f64,
    pub num_histogram_bins: usize,
}

impl Default for MacenkoConfig {
    fn default() -> Self {
        MacenkoConfig {
            sampling: SamplingConfig::default(),
            percentile_threshold: DEFAULT_PERCENTILE_THRESHOLD,
            num_histogram_bins: DEFAULT_NUM_HISTOGRAM_BINS,
        }
    }
}

impl MacenkoConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        validate_percentile_threshold(self.percentile_threshold)?;
        if self.num_histogram_bins == 0 {
            return Err(StainError::InvalidHistogramBins);
        }
        Ok(())
    }
}

/// Parameters of the NMF estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NmfConfig {
    pub sampling: SamplingConfig,
    /// Factorization rank, 2 or 3.
    pub num_stains: usize,
    pub max_iterations: usize,
    /// Relative change in the reconstruction norm below which the
    /// alternating least squares iteration stops.
    pub min_residue: f64,
}

impl Default for NmfConfig {
    fn default() -> Self {
        NmfConfig {
            sampling: SamplingConfig::default(),
            num_stains: DEFAULT_NUM_STAINS,
            max_iterations: DEFAULT_NMF_MAX_ITERATIONS,
            min_residue: DEFAULT_NMF_MIN_RESIDUE,
        }
    }
}

impl NmfConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        validate_num_stains(self.num_stains)
    }
}

pub(crate) fn validate_percentile_threshold(percentile_threshold: f64) -> Result<()> {
    if !(percentile_threshold > 0.0 && percentile_threshold <= 100.0) {
        return Err(StainError::InvalidPercentileThreshold(percentile_threshold));
    }
    Ok(())
}

pub(crate) fn validate_num_stains(num_stains: usize) -> Result<()> {
    if !(2..=3).contains(&num_stains) {
        return Err(StainError::InvalidStainCount(num_stains));
    }
    Ok(())
}
