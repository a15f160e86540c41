use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use wsi_stain_vectors::{
    MacenkoConfig, MacenkoEstimator, NmfConfig, NmfEstimator, PixelLayout, SamplePlane,
    StainVectorEstimator, ThreadSafeStdError, Tile, TileAddress, TileSize, TileSource, WsiSampler,
};

const TILE_EDGE: usize = 256;

/// Slide whose tiles are decoded on demand from a seeded generator, so
/// every fetch pays a realistic per-pixel cost.
struct GeneratedSlide {
    num_tiles: usize,
    seed: u64,
}

impl TileSource for GeneratedSlide {
    fn num_levels(&self) -> usize {
        1
    }

    fn num_tiles(&self, _level: usize) -> usize {
        self.num_tiles
    }

    fn tile_size(&self) -> TileSize {
        TileSize::new(TILE_EDGE, TILE_EDGE)
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
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ address.index as u64);
        let n_pixels = TILE_EDGE * TILE_EDGE;
        let mut samples = Vec::with_capacity(3 * n_pixels);
        for _ in 0..n_pixels {
            // hematoxylin/eosin-like absorption with white gaps
            let h: f64 = rng.gen_range(0.0..1.0);
            let e: f64 = rng.gen_range(0.0..1.0);
            let od = [0.65 * h + 0.07 * e, 0.70 * h + 0.99 * e, 0.29 * h + 0.11 * e];
            samples.extend(od.iter().map(|x| (255.0 * 10f64.powf(-x)).round() as u16));
        }
        Ok(Tile::new(TILE_EDGE, TILE_EDGE, 3, PixelLayout::Interleaved, samples))
    }
}

fn slide(num_tiles: usize) -> Arc<GeneratedSlide> {
    Arc::new(GeneratedSlide { num_tiles, seed: 42 })
}

fn criterion_benchmark_runner(c: &mut Criterion) {
    let mut sampling_group = c.benchmark_group("RandomSampling");
    for &sample_size in &[10_000usize, 100_000] {
        sampling_group.throughput(Throughput::Elements(sample_size as u64));
        let mut sampler = WsiSampler::with_rng(slide(64), ChaCha8Rng::seed_from_u64(1));
        sampling_group.bench_with_input(
            BenchmarkId::from_parameter(sample_size),
            &sample_size,
            |b, &sample_size| {
                b.iter(|| {
                    sampler
                        .choose_random_pixels(sample_size, 0.15, SamplePlane::default())
                        .map(|samples| samples.nrows())
                })
            },
        );
    }
    sampling_group.finish();

    let mut estimator_group = c.benchmark_group("Estimators");
    estimator_group.sample_size(20);
    for &sample_size in &[5_000usize, 50_000] {
        let mut macenko_config = MacenkoConfig::default();
        macenko_config.sampling.sample_size = sample_size;
        let mut macenko = MacenkoEstimator::from_sampler(
            WsiSampler::with_rng(slide(32), ChaCha8Rng::seed_from_u64(2)),
            macenko_config,
        );
        estimator_group.bench_with_input(
            BenchmarkId::new("Macenko", sample_size),
            &sample_size,
            |b, _| b.iter(|| macenko.compute_stain_vectors().map(|e| e.pixel_count)),
        );

        let mut nmf_config = NmfConfig::default();
        nmf_config.sampling.sample_size = sample_size;
        let mut nmf = NmfEstimator::from_sampler(
            WsiSampler::with_rng(slide(32), ChaCha8Rng::seed_from_u64(3)),
            nmf_config,
        );
        estimator_group.bench_with_input(
            BenchmarkId::new("Nmf", sample_size),
            &sample_size,
            |b, _| b.iter(|| nmf.compute_stain_vectors().map(|e| e.pixel_count)),
        );
    }
    estimator_group.finish();
}

criterion_group!(benches, criterion_benchmark_runner);
criterion_main!(benches);
