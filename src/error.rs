use thiserror::Error;

use crate::tile_source::{ThreadSafeStdError, TileAddress};

/// Every way a sampling or estimation call can fail.
///
/// None of these leave the sampler or estimator in a bad state; the caller can
/// adjust its parameters and call again.
#[derive(Error, Debug)]
pub enum StainError {
    #[error("no image source is attached")]
    NoImageSource,
    #[error("sample size must be greater than 0")]
    InvalidSampleSize,
    #[error("percentile threshold must be in (0, 100], got {0}")]
    InvalidPercentileThreshold(f64),
    #[error("histogram bin count must be greater than 0")]
    InvalidHistogramBins,
    #[error("number of stains must be 2 or 3, got {0}")]
    InvalidStainCount(usize),
    #[error("resolution level {level} is out of range, image has {num_levels} levels")]
    LevelOutOfRange { level: usize, num_levels: usize },
    #[error("focus plane {focus_plane} is out of range, image has {num_focus_planes} focus planes")]
    FocusPlaneOutOfRange {
        focus_plane: usize,
        num_focus_planes: usize,
    },
    #[error("band {band} is out of range, image has {num_bands} bands")]
    BandOutOfRange { band: usize, num_bands: usize },
    #[error("no pixels above the optical density threshold were sampled")]
    NoPixelsSampled,
    #[error("at least {required} samples are required, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },
    #[error("expected {expected} columns, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("linear algebra failure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("failed to fetch tile {address:?}: {source}")]
    TileSource {
        address: TileAddress,
        #[source]
        source: ThreadSafeStdError,
    },
}

pub type Result<T> = std::result::Result<T, StainError>;
