use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::tile_source::{ThreadSafeStdError, Tile, TileAddress, TileSource};

/// Number of decoded tiles kept by a sampler's cache.
pub const TILE_CACHE_CAPACITY: u64 = 30;

/// Hit/miss counters of a [`CachedTileSource`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// A bounded cache of recently decoded tiles in front of a [`TileSource`].
///
/// Once full, the least recently used tile makes room for the newest one.
///
/// Purely a speed-up: a hit returns the same tile a fresh fetch would. The
/// cache is safe to share between threads; two threads missing on the same
/// address may both decode it, and the later insert wins.
pub struct CachedTileSource<S: TileSource + ?Sized> {
    source: Arc<S>,
    tiles: Cache<TileAddress, Arc<Tile>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: TileSource + ?Sized> CachedTileSource<S> {
    pub fn new(source: Arc<S>, capacity: u64) -> Self {
        Self {
            source,
            tiles: Cache::builder()
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped source, for geometry queries.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Returns the tile at `address`, decoding it only on a miss.
    pub fn get_tile(&self, address: TileAddress) -> Result<Arc<Tile>, ThreadSafeStdError> {
        if let Some(tile) = self.tiles.get(&address) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("tile cache hit {:?}", address);
            return Ok(tile);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!("tile cache miss {:?}", address);
        let tile = Arc::new(self.source.get_tile(address)?);
        self.tiles.insert(address, Arc::clone(&tile));
        Ok(tile)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drops every cached tile. Counters are kept.
    pub fn clear(&self) {
        self.tiles.invalidate_all();
    }
}
