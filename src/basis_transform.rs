use log::debug;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};

use crate::error::{Result, StainError};

/// Number of optical-density channels.
const NUM_CHANNELS: usize = 3;
/// Dimension of the projection plane.
const PLANE_DIM: usize = 2;

/// Projection of 3-channel optical-density samples onto their dominant plane.
///
/// The plane is spanned by the two leading eigenvectors of the uncentered
/// second-moment matrix `X^T X / n`. For non-negative optical densities the
/// leading eigenvector lies inside the stained octant, so projected samples
/// have a non-negative first coordinate and their angles never wrap around
/// `+-pi`. Both directions of an eigenvector are equally valid, so with
/// `optimize_directions` each axis is flipped to a fixed sign convention
/// (see [`orient_axis`]); without it the sign of projected angles is whatever
/// the eigensolver returned.
#[derive(Clone, Debug)]
pub struct BasisTransform {
    /// Mean of the samples the basis was computed from.
    /// Shape: (3)
    mean: Array1<f64>,
    /// Orthonormal basis vectors as columns.
    /// Shape: (3, 2)
    basis: Array2<f64>,
    /// Second-moment eigenvalues of the two axes, largest first.
    eigenvalues: Array1<f64>,
}

impl BasisTransform {
    /// Computes the projection plane of `samples`, shape (n_samples, 3).
    ///
    /// # Errors
    /// Returns an error if `samples` does not have 3 columns, has fewer than
    /// 2 rows, or if the eigendecomposition fails.
    pub fn new(samples: ArrayView2<f64>, optimize_directions: bool) -> Result<Self> {
        if samples.ncols() != NUM_CHANNELS {
            return Err(StainError::DimensionMismatch {
                expected: NUM_CHANNELS,
                actual: samples.ncols(),
            });
        }
        let n_samples = samples.nrows();
        if n_samples < 2 {
            return Err(StainError::InsufficientSamples {
                required: 2,
                actual: n_samples,
            });
        }

        let mean = samples
            .mean_axis(Axis(0))
            .ok_or(StainError::InsufficientSamples {
                required: 2,
                actual: n_samples,
            })?;
        let mut moment_matrix = samples.t().dot(&samples);
        moment_matrix /= n_samples as f64;

        // eigh returns eigenvalues in ascending order
        let (vals, vecs) = moment_matrix.eigh(UPLO::Upper)?;
        let mut eig_pairs: Vec<(f64, Array1<f64>)> = vals
            .into_iter()
            .zip(vecs.columns().into_iter().map(|col| col.to_owned()))
            .collect();
        eig_pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut basis = Array2::<f64>::zeros((NUM_CHANNELS, PLANE_DIM));
        let mut eigenvalues = Array1::<f64>::zeros(PLANE_DIM);
        for (i, (eig_val, eig_vec)) in eig_pairs.into_iter().take(PLANE_DIM).enumerate() {
            let mut axis = eig_vec;
            let norm = axis.dot(&axis).sqrt();
            if norm > 1e-12 {
                axis.mapv_inplace(|x| x / norm);
            }
            if optimize_directions {
                orient_axis(&mut axis);
            }
            basis.column_mut(i).assign(&axis);
            eigenvalues[i] = eig_val.max(0.0);
        }
        debug!(
            "Basis from {} samples: mean {:?}, eigenvalues {:?}",
            n_samples, mean, eigenvalues
        );

        Ok(Self {
            mean,
            basis,
            eigenvalues,
        })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Basis vectors as the columns of a (3, 2) matrix.
    pub fn basis(&self) -> &Array2<f64> {
        &self.basis
    }

    /// Eigenvalues of the two basis axes, largest first.
    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    /// Projects (n, 3) points into the (n, 2) plane coordinates.
    ///
    /// With `use_mean` the sample mean is subtracted before projecting.
    pub fn project_points(&self, points: ArrayView2<f64>, use_mean: bool) -> Result<Array2<f64>> {
        if points.ncols() != NUM_CHANNELS {
            return Err(StainError::DimensionMismatch {
                expected: NUM_CHANNELS,
                actual: points.ncols(),
            });
        }
        if use_mean {
            Ok((&points - &self.mean).dot(&self.basis))
        } else {
            Ok(points.dot(&self.basis))
        }
    }

    /// Maps (n, 2) plane coordinates back to (n, 3) optical densities.
    ///
    /// With `use_mean` the sample mean is added back after mapping.
    pub fn back_project_points(&self, points: ArrayView2<f64>, use_mean: bool) -> Result<Array2<f64>> {
        if points.ncols() != PLANE_DIM {
            return Err(StainError::DimensionMismatch {
                expected: PLANE_DIM,
                actual: points.ncols(),
            });
        }
        let mut back_projected = points.dot(&self.basis.t());
        if use_mean {
            back_projected += &self.mean;
        }
        Ok(back_projected)
    }
}

/// Flips `axis` so its components sum to a positive value, which for
/// optical densities points it into the stained octant. Axes whose sum is
/// numerically zero fall back to a positive largest-magnitude component.
fn orient_axis(axis: &mut Array1<f64>) {
    let sum = axis.sum();
    let flip = if sum.abs() > 1e-9 {
        sum < 0.0
    } else {
        largest_magnitude(axis.view()) < 0.0
    };
    if flip {
        axis.mapv_inplace(|x| -x);
    }
}

fn largest_magnitude(values: ArrayView1<f64>) -> f64 {
    values
        .iter()
        .copied()
        .fold(0.0, |best: f64, x| if x.abs() > best.abs() { x } else { best })
}

/// Angle of each projected point, `atan2(y, x)`, in `(-pi, pi]`.
pub fn point_angles(points: ArrayView2<f64>) -> Array1<f64> {
    points
        .slice(s![.., ..PLANE_DIM])
        .rows()
        .into_iter()
        .map(|row| row[1].atan2(row[0]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Non-negative mixtures of two stain directions: a cloud lying in a
    /// plane through the origin.
    fn two_stain_cloud(n_samples: usize, seed: u64) -> Array2<f64> {
        let hematoxylin = array![0.65, 0.70, 0.29];
        let eosin = array![0.07, 0.99, 0.11];
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut samples = Array2::<f64>::zeros((n_samples, 3));
        for mut row in samples.rows_mut() {
            let a: f64 = rng.gen_range(0.0..1.5);
            let b: f64 = rng.gen_range(0.0..1.5);
            row.assign(&(&hematoxylin * a + &eosin * b));
        }
        samples
    }

    #[test]
    fn basis_is_orthonormal() {
        let samples = two_stain_cloud(500, 7);
        let transform = BasisTransform::new(samples.view(), true).unwrap();
        let gram = transform.basis().t().dot(transform.basis());
        assert_abs_diff_eq!(gram, Array2::eye(2), epsilon = 1e-10);
        assert!(transform.eigenvalues()[0] >= transform.eigenvalues()[1]);
        // leading axis points into the stained octant
        assert!(transform.basis().column(0).iter().all(|&x| x >= -1e-12));
    }

    #[test]
    fn round_trip_reproduces_planar_points() {
        let samples = two_stain_cloud(300, 11);
        let transform = BasisTransform::new(samples.view(), true).unwrap();

        let projected = transform.project_points(samples.view(), false).unwrap();
        let restored = transform.back_project_points(projected.view(), false).unwrap();
        assert_abs_diff_eq!(restored, samples, epsilon = 1e-9);

        let centered = transform.project_points(samples.view(), true).unwrap();
        let restored = transform.back_project_points(centered.view(), true).unwrap();
        assert_abs_diff_eq!(restored, samples, epsilon = 1e-9);
    }

    #[test]
    fn orientation_is_sign_invariant() {
        let samples = two_stain_cloud(200, 3);
        let transform = BasisTransform::new(samples.view(), false).unwrap();
        for axis in transform.basis().columns() {
            let mut kept = axis.to_owned();
            let mut flipped = axis.mapv(|x| -x);
            orient_axis(&mut kept);
            orient_axis(&mut flipped);
            assert_abs_diff_eq!(kept, flipped, epsilon = 1e-15);
            assert!(kept.sum() > 0.0);
        }

        let oriented = BasisTransform::new(samples.view(), true).unwrap();
        assert!(oriented.basis().column(0).sum() > 0.0);
    }

    #[test]
    fn rejects_bad_shapes() {
        let too_few = array![[0.1, 0.2, 0.3]];
        assert!(matches!(
            BasisTransform::new(too_few.view(), true),
            Err(StainError::InsufficientSamples { required: 2, actual: 1 })
        ));

        let wrong_width = Array2::<f64>::zeros((4, 2));
        assert!(BasisTransform::new(wrong_width.view(), true).is_err());

        let transform = BasisTransform::new(two_stain_cloud(10, 1).view(), false).unwrap();
        let three_d = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            transform.back_project_points(three_d.view(), false),
            Err(StainError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        let two_d = Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            transform.project_points(two_d.view(), false),
            Err(StainError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn angles_follow_atan2() {
        let points = array![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [1.0, -1.0]];
        let angles = point_angles(points.view());
        assert_abs_diff_eq!(
            angles,
            array![
                0.0,
                std::f64::consts::FRAC_PI_2,
                std::f64::consts::PI,
                -std::f64::consts::FRAC_PI_4
            ],
            epsilon = 1e-12
        );
    }
}
