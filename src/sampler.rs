use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::config::SamplingConfig;
use crate::error::{Result, StainError};
use crate::od_conversion::rgb_to_od;
use crate::tile_cache::{CacheStats, CachedTileSource, TILE_CACHE_CAPACITY};
use crate::tile_source::{PixelLayout, Tile, TileAddress, TileSource};

/// Optical densities of sampled pixels, one `[R, G, B]` row per pixel.
///
/// Row order carries no spatial meaning.
pub type SampleMatrix = Array2<f64>;

/// Resolution level, focus plane and band to sample from.
///
/// `None` for the focus plane or band selects the image's default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplePlane {
    pub level: usize,
    pub focus_plane: Option<usize>,
    pub band: Option<usize>,
}

impl SamplePlane {
    pub fn at_level(level: usize) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

impl From<&SamplingConfig> for SamplePlane {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            level: config.level,
            focus_plane: config.focus_plane,
            band: config.band,
        }
    }
}

/// A plane checked against the image geometry, with defaults filled in.
#[derive(Clone, Copy, Debug)]
struct ResolvedPlane {
    level: usize,
    focus_plane: usize,
    band: usize,
    num_tiles: usize,
    tile_pixels: usize,
}

impl ResolvedPlane {
    fn address(&self, index: usize) -> TileAddress {
        TileAddress {
            level: self.level,
            index,
            focus_plane: self.focus_plane,
            band: self.band,
        }
    }
}

/// Draws optical-density samples from a tiled whole-slide image.
///
/// Tiles are fetched through a bounded cache owned by the sampler, so
/// repeated calls against the same image reuse recently decoded tiles. The
/// random generator is owned too and advances from call to call; inject a
/// seeded one with [`WsiSampler::with_rng`] for reproducible draws.
pub struct WsiSampler<S: TileSource + ?Sized, R: Rng = ChaCha8Rng> {
    cache: Option<CachedTileSource<S>>,
    rng: R,
}

impl<S: TileSource + ?Sized> WsiSampler<S, ChaCha8Rng> {
    /// Creates a sampler over `source` with an entropy-seeded generator.
    pub fn new(source: Arc<S>) -> Self {
        Self::with_rng(source, ChaCha8Rng::from_entropy())
    }

    /// Creates a sampler with no image attached. Every sampling call fails
    /// with [`StainError::NoImageSource`] until [`WsiSampler::set_source`].
    pub fn detached() -> Self {
        Self::detached_with_rng(ChaCha8Rng::from_entropy())
    }
}

impl<S: TileSource + ?Sized, R: Rng> WsiSampler<S, R> {
    pub fn with_rng(source: Arc<S>, rng: R) -> Self {
        Self {
            cache: Some(CachedTileSource::new(source, TILE_CACHE_CAPACITY)),
            rng,
        }
    }

    pub fn detached_with_rng(rng: R) -> Self {
        Self { cache: None, rng }
    }

    pub fn source(&self) -> Option<&Arc<S>> {
        self.cache.as_ref().map(|cache| cache.source())
    }

    /// Attaches a new image (or detaches with `None`). The tile cache is
    /// rebuilt, so no tile of the previous image can leak into a sample.
    pub fn set_source(&mut self, source: Option<Arc<S>>) {
        self.cache = source.map(|source| CachedTileSource::new(source, TILE_CACHE_CAPACITY));
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Samples according to `config`: a random subsample of
    /// `config.sample_size` draws, or every pixel of the level.
    pub fn sample(&mut self, config: &SamplingConfig) -> Result<SampleMatrix> {
        let plane = SamplePlane::from(config);
        if config.use_subsample {
            self.choose_random_pixels(config.sample_size, config.od_threshold, plane)
        } else {
            self.get_all_pixels(config.od_threshold, plane)
        }
    }

    /// Draws up to `target_count` pixels at random from `plane`.
    ///
    /// Tiles are drawn with replacement, uniformly over the level; each tile
    /// then contributes as many distinct pixel positions as it was drawn.
    /// Draws exceeding a tile's pixel count are dropped. Pixels whose summed
    /// optical density does not exceed `od_threshold` are discarded, so the
    /// returned row count can be below `target_count`.
    pub fn choose_random_pixels(
        &mut self,
        target_count: usize,
        od_threshold: f64,
        plane: SamplePlane,
    ) -> Result<SampleMatrix> {
        let cache = self.cache.as_ref().ok_or(StainError::NoImageSource)?;
        let resolved = resolve_plane(cache.source().as_ref(), plane)?;
        let start_time = Instant::now();

        if target_count == 0 || resolved.num_tiles == 0 {
            return Ok(Array2::zeros((0, 3)));
        }

        let mut tile_draw_counts = vec![0usize; resolved.num_tiles];
        for _ in 0..target_count {
            tile_draw_counts[self.rng.gen_range(0..resolved.num_tiles)] += 1;
        }

        let mut dropped_draws = 0usize;
        let mut jobs: Vec<(usize, Vec<usize>)> = Vec::new();
        for (tile_index, &draws) in tile_draw_counts.iter().enumerate() {
            if draws == 0 {
                continue;
            }
            let kept = draws.min(resolved.tile_pixels);
            dropped_draws += draws - kept;
            if kept == 0 {
                continue;
            }
            let mut pixels =
                rand::seq::index::sample(&mut self.rng, resolved.tile_pixels, kept).into_vec();
            pixels.sort_unstable();
            jobs.push((tile_index, pixels));
        }
        if dropped_draws > 0 {
            debug!(
                "Dropped {} draws that exceeded the {} pixels of their tile.",
                dropped_draws, resolved.tile_pixels
            );
        }
        debug!(
            "Sampling {} draws from {} of {} tiles on level {}.",
            target_count,
            jobs.len(),
            resolved.num_tiles,
            resolved.level
        );

        let per_tile = jobs
            .into_par_iter()
            .map(|(tile_index, pixels)| {
                let address = resolved.address(tile_index);
                let tile = fetch_tile(cache, address)?;
                Ok(extract_tile_pixels(&tile, address, pixels, od_threshold))
            })
            .collect::<Result<Vec<_>>>()?;

        let samples = merge_tile_samples(per_tile);
        info!(
            "Kept {} of {} randomly drawn pixels above OD threshold {} in {:?}",
            samples.nrows(),
            target_count,
            od_threshold,
            start_time.elapsed()
        );
        log_cache_stats(cache);
        Ok(samples)
    }

    /// Converts every pixel of every tile on `plane` and keeps those whose
    /// summed optical density exceeds `od_threshold`.
    pub fn get_all_pixels(&self, od_threshold: f64, plane: SamplePlane) -> Result<SampleMatrix> {
        let cache = self.cache.as_ref().ok_or(StainError::NoImageSource)?;
        let resolved = resolve_plane(cache.source().as_ref(), plane)?;
        let start_time = Instant::now();

        let per_tile = (0..resolved.num_tiles)
            .into_par_iter()
            .map(|tile_index| {
                let address = resolved.address(tile_index);
                let tile = fetch_tile(cache, address)?;
                let pixels = 0..tile.num_pixels();
                Ok(extract_tile_pixels(&tile, address, pixels, od_threshold))
            })
            .collect::<Result<Vec<_>>>()?;

        let samples = merge_tile_samples(per_tile);
        info!(
            "Kept {} pixels above OD threshold {} from {} tiles on level {} in {:?}",
            samples.nrows(),
            od_threshold,
            resolved.num_tiles,
            resolved.level,
            start_time.elapsed()
        );
        log_cache_stats(cache);
        Ok(samples)
    }
}

fn resolve_plane<S: TileSource + ?Sized>(source: &S, plane: SamplePlane) -> Result<ResolvedPlane> {
    let num_levels = source.num_levels();
    if plane.level >= num_levels {
        return Err(StainError::LevelOutOfRange {
            level: plane.level,
            num_levels,
        });
    }

    let num_focus_planes = source.num_focus_planes();
    let focus_plane = match plane.focus_plane {
        Some(focus_plane) if focus_plane >= num_focus_planes => {
            return Err(StainError::FocusPlaneOutOfRange {
                focus_plane,
                num_focus_planes,
            })
        }
        Some(focus_plane) => focus_plane,
        None => source.default_focus_plane(),
    };

    let num_bands = source.num_bands();
    let band = match plane.band {
        Some(band) if band >= num_bands => {
            return Err(StainError::BandOutOfRange { band, num_bands })
        }
        Some(band) => band,
        None => source.default_band(),
    };

    Ok(ResolvedPlane {
        level: plane.level,
        focus_plane,
        band,
        num_tiles: source.num_tiles(plane.level),
        tile_pixels: source.tile_size().num_pixels(),
    })
}

fn log_cache_stats<S: TileSource + ?Sized>(cache: &CachedTileSource<S>) {
    let stats = cache.stats();
    debug!("Tile cache: {} hits, {} misses.", stats.hits, stats.misses);
}

fn fetch_tile<S: TileSource + ?Sized>(
    cache: &CachedTileSource<S>,
    address: TileAddress,
) -> Result<Arc<Tile>> {
    cache
        .get_tile(address)
        .map_err(|source| StainError::TileSource { address, source })
}

/// Optical densities of the listed pixels of one tile that pass the
/// threshold. `pixels` must be ascending.
///
/// An unreadable layout yields nothing. A buffer that ends early stops the
/// tile at that pixel; earlier pixels are kept.
fn extract_tile_pixels(
    tile: &Tile,
    address: TileAddress,
    pixels: impl IntoIterator<Item = usize>,
    od_threshold: f64,
) -> Vec<[f64; 3]> {
    if let PixelLayout::Other(code) = tile.layout() {
        warn!("Skipping tile {:?}: unsupported pixel layout {}.", address, code);
        return Vec::new();
    }
    if tile.channels() < 3 {
        warn!(
            "Skipping tile {:?}: {} channels, RGB needs 3.",
            address,
            tile.channels()
        );
        return Vec::new();
    }

    let mut kept = Vec::new();
    for pixel in pixels {
        // padded tiles can decode smaller than the declared tile size
        if pixel >= tile.num_pixels() {
            break;
        }
        let Some(rgb) = tile.rgb(pixel) else {
            warn!(
                "Tile {:?} sample buffer ends at pixel {}; keeping {} earlier pixels.",
                address,
                pixel,
                kept.len()
            );
            break;
        };
        let od = rgb_to_od(rgb);
        if od[0] + od[1] + od[2] > od_threshold {
            kept.push(od);
        }
    }
    kept
}

fn merge_tile_samples(per_tile: Vec<Vec<[f64; 3]>>) -> SampleMatrix {
    let rows: Vec<[f64; 3]> = per_tile.into_iter().flatten().collect();
    Array2::from(rows)
}
