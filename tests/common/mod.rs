// Synthetic in-memory slides shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wsi_stain_vectors::od_conversion::rgb_to_od;
use wsi_stain_vectors::{PixelLayout, ThreadSafeStdError, Tile, TileAddress, TileSize, TileSource};

pub const WHITE: [u16; 3] = [255, 255, 255];

/// Unit hematoxylin-like and eosin-like optical-density directions.
pub fn hematoxylin() -> [f64; 3] {
    unit([0.65, 0.70, 0.29])
}

pub fn eosin() -> [f64; 3] {
    unit([0.07, 0.99, 0.11])
}

pub fn unit(v: [f64; 3]) -> [f64; 3] {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    v.map(|x| x / norm)
}

pub fn cosine(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a.iter().map(|x| x * x).sum::<f64>().sqrt() * b.iter().map(|x| x * x).sum::<f64>().sqrt())
}

/// Best cosine similarity between `truth` and any of `rows`.
pub fn best_match(rows: &[[f64; 3]], truth: [f64; 3]) -> f64 {
    rows.iter()
        .filter(|row| row.iter().any(|&x| x != 0.0))
        .map(|&row| cosine(row, truth))
        .fold(f64::NEG_INFINITY, f64::max)
}

/// 8-bit intensities whose optical density is `od`, up to rounding.
pub fn intensities_for(od: [f64; 3]) -> [u16; 3] {
    od.map(|x| (255.0 * 10f64.powf(-x)).round().clamp(0.0, 255.0) as u16)
}

/// A multi-level slide held entirely in memory.
///
/// Level 0 is painted by the constructor; every further level keeps the
/// first half of the previous level's tiles.
pub struct SyntheticSlide {
    tile_size: TileSize,
    layout: PixelLayout,
    levels: Vec<Vec<Vec<[u16; 3]>>>,
    unreadable_tiles: Vec<usize>,
    pub fetches: AtomicUsize,
}

impl SyntheticSlide {
    pub fn from_painter(
        num_tiles: usize,
        tile_size: TileSize,
        mut painter: impl FnMut(usize, usize) -> [u16; 3],
    ) -> Self {
        let tiles = (0..num_tiles)
            .map(|tile| (0..tile_size.num_pixels()).map(|pixel| painter(tile, pixel)).collect())
            .collect();
        Self {
            tile_size,
            layout: PixelLayout::Interleaved,
            levels: vec![tiles],
            unreadable_tiles: Vec::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Alternating pixels of two fixed colors.
    pub fn two_color(first: [u16; 3], second: [u16; 3], num_tiles: usize, tile_size: TileSize) -> Self {
        Self::from_painter(num_tiles, tile_size, |tile, pixel| {
            if (tile + pixel) % 2 == 0 {
                first
            } else {
                second
            }
        })
    }

    /// A quarter each of pure first stain, pure second stain, mixtures of
    /// both and white background.
    pub fn stain_mixture(first: [f64; 3], second: [f64; 3], num_tiles: usize, tile_size: TileSize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::from_painter(num_tiles, tile_size, |_, pixel| {
            let (a, b): (f64, f64) = match pixel % 4 {
                0 => (rng.gen_range(0.2..1.2), 0.0),
                1 => (0.0, rng.gen_range(0.2..1.2)),
                2 => (rng.gen_range(0.1..1.0), rng.gen_range(0.1..1.0)),
                _ => return WHITE,
            };
            intensities_for([0, 1, 2].map(|c| first[c] * a + second[c] * b))
        })
    }

    pub fn with_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_extra_level(mut self) -> Self {
        if let Some(last) = self.levels.last() {
            let half = last[..(last.len() / 2).max(1)].to_vec();
            self.levels.push(half);
        }
        self
    }

    pub fn with_unreadable_tile(mut self, index: usize) -> Self {
        self.unreadable_tiles.push(index);
        self
    }

    pub fn num_pixels(&self, level: usize) -> usize {
        self.levels[level].len() * self.tile_size.num_pixels()
    }

    /// Pixels on `level` whose summed optical density exceeds `od_threshold`.
    pub fn pixels_above(&self, level: usize, od_threshold: f64) -> usize {
        self.levels[level]
            .iter()
            .flatten()
            .filter(|&&rgb| rgb_to_od(rgb).iter().sum::<f64>() > od_threshold)
            .count()
    }

    pub fn pixels_above_in_tile(&self, level: usize, tile: usize, od_threshold: f64) -> usize {
        self.levels[level][tile]
            .iter()
            .filter(|&&rgb| rgb_to_od(rgb).iter().sum::<f64>() > od_threshold)
            .count()
    }
}

impl TileSource for SyntheticSlide {
    fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn num_tiles(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    fn tile_size(&self) -> TileSize {
        self.tile_size
    }

    fn num_focus_planes(&self) -> usize {
        1
    }

    fn default_focus_plane(&self) -> usize {
        0
    }

    fn num_bands(&self) -> usize {
        1
    }

    fn default_band(&self) -> usize {
        0
    }

    fn get_tile(&self, address: TileAddress) -> Result<Tile, ThreadSafeStdError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let pixels = self
            .levels
            .get(address.level)
            .and_then(|tiles| tiles.get(address.index))
            .ok_or_else(|| format!("no tile at {:?}", address))?;

        let n_pixels = pixels.len();
        let mut samples = vec![0u16; 3 * n_pixels];
        for (pixel, rgb) in pixels.iter().enumerate() {
            for (channel, &value) in rgb.iter().enumerate() {
                let offset = match self.layout {
                    PixelLayout::Planar => channel * n_pixels + pixel,
                    _ => 3 * pixel + channel,
                };
                samples[offset] = value;
            }
        }
        let layout = if self.unreadable_tiles.contains(&address.index) {
            PixelLayout::Other(42)
        } else {
            self.layout
        };
        Ok(Tile::new(self.tile_size.width, self.tile_size.height, 3, layout, samples))
    }
}
