use log::debug;
use ndarray::{Array1, Array2, ArrayView2};

use crate::basis_transform::point_angles;
use crate::config::validate_percentile_threshold;
use crate::error::{Result, StainError};

/// Finds the angular extremes of a projected sample cloud, robust to
/// outliers by clipping a percentile off each end.
///
/// For a threshold `p` the extremes are the `min(p, 100 - p)` and
/// `100 - min(p, 100 - p)` percentiles of the point angles, read off a
/// histogram spanning the observed angle range. `p = 100` therefore keeps
/// the full range: the low extreme is the smallest angle and the high
/// extreme the largest.
///
/// The bins cover `[min, max]` of the observed angles rather than the whole
/// circle, so every bin lands inside the cloud and a few bins resolve a
/// narrow one. Either way a percentile angle moves by at most one bin width.
#[derive(Clone, Debug, PartialEq)]
pub struct PercentileHistogram {
    percentile_threshold: f64,
    num_bins: usize,
}

impl PercentileHistogram {
    pub fn new(percentile_threshold: f64, num_bins: usize) -> Result<Self> {
        validate_percentile_threshold(percentile_threshold)?;
        if num_bins == 0 {
            return Err(StainError::InvalidHistogramBins);
        }
        Ok(Self {
            percentile_threshold,
            num_bins,
        })
    }

    pub fn percentile_threshold(&self) -> f64 {
        self.percentile_threshold
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Low and high percentile angles, in radians, of the (n, 2) `points`.
    pub fn threshold_angles(&self, points: ArrayView2<f64>) -> Result<(f64, f64)> {
        if points.ncols() != 2 {
            return Err(StainError::DimensionMismatch {
                expected: 2,
                actual: points.ncols(),
            });
        }
        if points.nrows() == 0 {
            return Err(StainError::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }
        let angles = point_angles(points);
        Ok(self.angles_at_percentiles(&angles))
    }

    /// Unit 2D vectors at the low and high percentile angles, one per row.
    pub fn threshold_vectors(&self, points: ArrayView2<f64>) -> Result<Array2<f64>> {
        let (low, high) = self.threshold_angles(points)?;
        Ok(Array2::from(vec![
            [low.cos(), low.sin()],
            [high.cos(), high.sin()],
        ]))
    }

    fn angles_at_percentiles(&self, angles: &Array1<f64>) -> (f64, f64) {
        let n_points = angles.len();
        let min_angle = angles.iter().copied().fold(f64::INFINITY, f64::min);
        let max_angle = angles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let bin_width = (max_angle - min_angle) / self.num_bins as f64;
        if !(bin_width > 0.0) {
            return (min_angle, min_angle);
        }

        let mut cumulative = vec![0usize; self.num_bins];
        for &angle in angles {
            let bin = (((angle - min_angle) / bin_width) as usize).min(self.num_bins - 1);
            cumulative[bin] += 1;
        }
        for bin in 1..self.num_bins {
            cumulative[bin] += cumulative[bin - 1];
        }

        let low_percent = self.percentile_threshold.min(100.0 - self.percentile_threshold);
        let high_percent = 100.0 - low_percent;
        let low_bin = bin_reaching(&cumulative, rank_at(low_percent, n_points));
        let high_bin = bin_reaching(&cumulative, rank_at(high_percent, n_points));

        let low_angle = min_angle + low_bin as f64 * bin_width;
        let high_angle = if high_bin + 1 == self.num_bins {
            max_angle
        } else {
            min_angle + (high_bin + 1) as f64 * bin_width
        };
        debug!(
            "Angles span [{:.4}, {:.4}]; {}th/{}th percentile edges at {:.4}, {:.4}",
            min_angle, max_angle, low_percent, high_percent, low_angle, high_angle
        );
        (low_angle, high_angle)
    }
}

/// 1-based rank of the `percent` percentile among `n_points` sorted values.
fn rank_at(percent: f64, n_points: usize) -> usize {
    let rank = (percent / 100.0 * n_points as f64 - 1e-9).ceil();
    (rank.max(1.0) as usize).min(n_points)
}

/// First bin whose cumulative count reaches `rank`.
fn bin_reaching(cumulative: &[usize], rank: usize) -> usize {
    cumulative.partition_point(|&count| count < rank)
}
