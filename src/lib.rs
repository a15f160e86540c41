// Stain vector estimation for whole-slide images

#![doc = include_str!("../README.md")]

pub mod basis_transform;
pub mod config;
pub mod error;
pub mod estimator;
pub mod histogram;
pub mod macenko;
pub mod nmf;
pub mod od_conversion;
pub mod sampler;
pub mod stain_matrix;
pub mod tile_cache;
pub mod tile_source;


pub use config::{MacenkoConfig, NmfConfig, SamplingConfig};
pub use error::{Result, StainError};
pub use estimator::{build_estimator, EstimatorConfig, StainAlgorithm, StainEstimate, StainVectorEstimator};
pub use macenko::MacenkoEstimator;
pub use nmf::{AlsFactorizer, NmfEstimator, NmfFactorization};
pub use sampler::{SampleMatrix, SamplePlane, WsiSampler};
pub use stain_matrix::StainMatrix;
pub use tile_source::{PixelLayout, ThreadSafeStdError, Tile, TileAddress, TileSize, TileSource};
