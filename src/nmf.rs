use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, trace};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix2};
use ndarray_linalg::{Eigh, UPLO};
use rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::{NmfConfig, SamplingConfig};
use crate::error::{Result, StainError};
use crate::estimator::{StainAlgorithm, StainEstimate, StainVectorEstimator};
use crate::sampler::WsiSampler;
use crate::stain_matrix::StainMatrix;
use crate::tile_source::TileSource;

/// Non-negative factors of a data matrix `V ~ W H`.
#[derive(Clone, Debug)]
pub struct NmfFactorization {
    /// Per-sample weights, `W`.
    /// Shape: (n_samples, rank)
    pub basis: Array2<f64>,
    /// Components, `H`, one per row.
    /// Shape: (rank, n_features)
    pub encoding: Array2<f64>,
    /// Update rounds run before stopping.
    pub iterations: usize,
    /// Relative change of `||W H||_F` over the last round.
    pub residue: f64,
    /// `||V - W H||_F / ||V||_F` of the returned factors.
    pub reconstruction_error: f64,
}

/// Alternating least squares NMF.
///
/// Each round solves the unconstrained least squares problem for `W` with `H`
/// fixed, clamps negative entries to zero, then does the same for `H`. The
/// iteration stops once `||W H||_F` changes by less than `min_residue`
/// relative to the previous round, or after `max_iterations` rounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlsFactorizer {
    max_iterations: usize,
    min_residue: f64,
}

impl AlsFactorizer {
    pub fn new(max_iterations: usize, min_residue: f64) -> Self {
        Self {
            max_iterations,
            min_residue,
        }
    }

    /// Factors the non-negative (n_samples, n_features) `data` at `rank`.
    ///
    /// The encoding starts from sample rows spread out in angle, so data made
    /// of `rank` pure directions is already a fixed point. A component without
    /// a distinct starting row, or whose encoding row collapsed to zero, is
    /// redrawn uniformly from `rng` at the start of the next round. One that
    /// collapses in the final round, as on data of lower rank than requested,
    /// is returned as an all-zero row.
    pub fn factorize<R: Rng + ?Sized>(
        &self,
        data: ArrayView2<f64>,
        rank: usize,
        rng: &mut R,
    ) -> Result<NmfFactorization> {
        let (n_samples, n_features) = data.dim();
        if rank == 0 {
            return Err(StainError::InvalidStainCount(rank));
        }
        if n_samples == 0 || n_features == 0 {
            return Err(StainError::InsufficientSamples {
                required: 1,
                actual: n_samples,
            });
        }

        let unit = Uniform::new(0.0, 1.0);
        let mut basis = Array2::<f64>::zeros((n_samples, rank));
        let mut encoding = spread_initial_encoding(data, rank);

        let mut previous_norm = 0.0f64;
        let mut residue = f64::INFINITY;
        let mut iterations = 0;
        while iterations < self.max_iterations {
            iterations += 1;
            reseed_collapsed_rows(&mut encoding, unit, rng);

            // W = V H^T (H H^T)^+
            let gram = encoding.dot(&encoding.t());
            basis = data.dot(&encoding.t()).dot(&symmetric_pseudo_inverse(&gram)?);
            clamp_negative(&mut basis);

            // H = (W^T W)^+ W^T V
            let gram = basis.t().dot(&basis);
            encoding = symmetric_pseudo_inverse(&gram)?.dot(&basis.t().dot(&data));
            clamp_negative(&mut encoding);

            let norm = frobenius_norm(&basis.dot(&encoding));
            residue = (previous_norm - norm).abs() / previous_norm.max(f64::MIN_POSITIVE);
            previous_norm = norm;
            trace!("ALS round {}: ||WH|| = {:.6e}, residue {:.3e}", iterations, norm, residue);
            if residue < self.min_residue {
                break;
            }
        }

        let data_norm = frobenius_norm(&data);
        let reconstruction_error =
            frobenius_norm(&(&data - &basis.dot(&encoding))) / data_norm.max(f64::MIN_POSITIVE);
        Ok(NmfFactorization {
            basis,
            encoding,
            iterations,
            residue,
            reconstruction_error,
        })
    }
}

/// Cosines above this count as the same direction when picking start rows.
const SAME_DIRECTION_COSINE: f64 = 1.0 - 1e-9;

/// Starting components taken from the rows of `data`: first the row farthest
/// in angle from the mean direction, then repeatedly the row whose nearest
/// chosen component is farthest away. Components left without a row of a new
/// direction stay zero.
fn spread_initial_encoding(data: ArrayView2<f64>, rank: usize) -> Array2<f64> {
    let mut encoding = Array2::zeros((rank, data.ncols()));
    let norms = data.map_axis(Axis(1), |row| row.dot(&row).sqrt());
    let mut directions = data.to_owned();
    for (mut row, &norm) in directions.rows_mut().into_iter().zip(norms.iter()) {
        if norm > 0.0 {
            row /= norm;
        }
    }

    // largest cosine to any chosen component; to the mean before the first pick
    let mut closeness = directions.dot(&directions.sum_axis(Axis(0)));
    closeness.zip_mut_with(&norms, |c, &norm| {
        if norm == 0.0 {
            *c = f64::INFINITY;
        }
    });
    for component in 0..rank {
        let Some((chosen, &nearest)) = closeness
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
        else {
            break;
        };
        if !nearest.is_finite() || (component > 0 && nearest > SAME_DIRECTION_COSINE) {
            trace!("No distinct start row for NMF components {}..{}", component, rank);
            break;
        }
        encoding.row_mut(component).assign(&data.row(chosen));

        let cosines = directions.dot(&directions.row(chosen));
        if component == 0 {
            closeness.zip_mut_with(&cosines, |c, &cos| {
                if c.is_finite() {
                    *c = cos;
                }
            });
        } else {
            closeness.zip_mut_with(&cosines, |c, &cos| *c = c.max(cos));
        }
    }
    encoding
}

/// Moore-Penrose inverse of a symmetric positive semi-definite matrix.
/// Eigenvalues below the usual `n * eps * max` cutoff are treated as zero.
fn symmetric_pseudo_inverse(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper)?;
    let largest = eigenvalues.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let cutoff = largest * matrix.nrows() as f64 * f64::EPSILON;
    let inverted = eigenvalues.mapv(|v| if v > cutoff { 1.0 / v } else { 0.0 });
    Ok((&eigenvectors * &inverted).dot(&eigenvectors.t()))
}

fn reseed_collapsed_rows<R: Rng + ?Sized>(encoding: &mut Array2<f64>, unit: Uniform<f64>, rng: &mut R) {
    for (component, mut row) in encoding.rows_mut().into_iter().enumerate() {
        if row.iter().all(|&x| x == 0.0) {
            trace!("Redrawing collapsed NMF component {}", component);
            let redrawn = Array1::random_using(row.len(), unit, rng);
            row.assign(&redrawn);
        }
    }
}

fn clamp_negative(matrix: &mut Array2<f64>) {
    matrix.mapv_inplace(|x| if x > 0.0 { x } else { 0.0 });
}

fn frobenius_norm<D: Data<Elem = f64>>(matrix: &ArrayBase<D, Ix2>) -> f64 {
    matrix.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Estimates 2 or 3 stain vectors as the encoding rows of a non-negative
/// factorization of the sampled optical densities.
pub struct NmfEstimator<S: TileSource + ?Sized, R: Rng = ChaCha8Rng> {
    sampler: WsiSampler<S, R>,
    config: NmfConfig,
}

impl<S: TileSource + ?Sized> NmfEstimator<S, ChaCha8Rng> {
    pub fn new(source: Arc<S>) -> Self {
        Self::with_config(source, NmfConfig::default())
    }

    pub fn with_config(source: Arc<S>, config: NmfConfig) -> Self {
        Self::from_sampler(WsiSampler::new(source), config)
    }
}

impl<S: TileSource + ?Sized, R: Rng> NmfEstimator<S, R> {
    /// Wraps an existing sampler, e.g. one with a seeded generator.
    pub fn from_sampler(sampler: WsiSampler<S, R>, config: NmfConfig) -> Self {
        Self { sampler, config }
    }

    pub fn config(&self) -> &NmfConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NmfConfig) {
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

    pub fn num_stains(&self) -> usize {
        self.config.num_stains
    }

    pub fn set_num_stains(&mut self, num_stains: usize) {
        self.config.num_stains = num_stains;
    }

    /// Samples the slide and factors the samples, returning the stain
    /// estimate together with the raw factorization.
    pub fn compute_factorization(&mut self) -> Result<(StainEstimate, NmfFactorization)> {
        if self.sampler.source().is_none() {
            return Err(StainError::NoImageSource);
        }
        self.config.validate()?;
        let start_time = Instant::now();
        info!(
            "NMF estimation: {} stains, sample size {}, subsample {}, OD threshold {}",
            self.config.num_stains,
            self.config.sampling.sample_size,
            self.config.sampling.use_subsample,
            self.config.sampling.od_threshold
        );

        let samples = self.sampler.sample(&self.config.sampling)?;
        let pixel_count = samples.nrows();
        if pixel_count == 0 {
            return Err(StainError::NoPixelsSampled);
        }
        if pixel_count < self.config.num_stains {
            return Err(StainError::InsufficientSamples {
                required: self.config.num_stains,
                actual: pixel_count,
            });
        }

        let factorizer = AlsFactorizer::new(self.config.max_iterations, self.config.min_residue);
        let factorization =
            factorizer.factorize(samples.view(), self.config.num_stains, self.sampler.rng_mut())?;
        debug!(
            "ALS stopped after {} rounds, residue {:.3e}, reconstruction error {:.4}",
            factorization.iterations, factorization.residue, factorization.reconstruction_error
        );

        let stain_matrix = StainMatrix::from_unnormalized(factorization.encoding.view())?;
        info!(
            "NMF estimated {} stains from {} pixels in {:?}",
            stain_matrix.num_resolved(),
            pixel_count,
            start_time.elapsed()
        );
        Ok((
            StainEstimate {
                stain_matrix,
                pixel_count,
            },
            factorization,
        ))
    }
}

impl<S: TileSource + ?Sized, R: Rng> StainVectorEstimator for NmfEstimator<S, R> {
    fn algorithm(&self) -> StainAlgorithm {
        StainAlgorithm::Nmf
    }

    fn sampling_config(&self) -> &SamplingConfig {
        &self.config.sampling
    }

    fn sampling_config_mut(&mut self) -> &mut SamplingConfig {
        &mut self.config.sampling
    }

    fn compute_stain_vectors(&mut self) -> Result<StainEstimate> {
        self.compute_factorization().map(|(estimate, _)| estimate)
    }
}
