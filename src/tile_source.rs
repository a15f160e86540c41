use std::error::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Address of one tile in a multi-resolution, multi-plane slide.
///
/// Level 0 is the highest resolution. `index` is the linear tile index within
/// the level, in whatever order the backend enumerates its tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    pub level: usize,
    pub index: usize,
    pub focus_plane: usize,
    pub band: usize,
}

/// Pixel dimensions of a tile.
///
/// Backends pad edge tiles, so every tile on a level reports this size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileSize {
    pub width: usize,
    pub height: usize,
}

impl TileSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }
}

/// In-memory ordering of the channel samples of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// `R G B R G B ...`
    Interleaved,
    /// `R R R ... G G G ... B B B ...`
    Planar,
    /// A layout code the backend reported that this crate cannot read.
    Other(u32),
}

/// A decoded tile: raw integer channel samples plus the geometry needed to
/// address them.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    width: usize,
    height: usize,
    channels: usize,
    layout: PixelLayout,
    samples: Vec<u16>,
}

impl Tile {
    /// Wraps a decoded sample buffer.
    ///
    /// The buffer is taken as-is; a buffer shorter than
    /// `width * height * channels` is tolerated and read up to its end.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        layout: PixelLayout,
        samples: Vec<u16>,
    ) -> Self {
        Self {
            width,
            height,
            channels,
            layout,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Flat buffer offsets of the R, G and B samples of pixel `pixel`.
    ///
    /// Returns `None` when the layout is unreadable or when any of the three
    /// offsets falls outside the sample buffer.
    pub fn rgb_offsets(&self, pixel: usize) -> Option<[usize; 3]> {
        let offsets = match self.layout {
            PixelLayout::Interleaved => {
                let base = pixel * self.channels;
                [base, base + 1, base + 2]
            }
            PixelLayout::Planar => {
                let plane = self.num_pixels();
                [pixel, plane + pixel, 2 * plane + pixel]
            }
            PixelLayout::Other(_) => return None,
        };
        let len = self.samples.len().min(self.num_pixels() * self.channels);
        if offsets.iter().any(|&offset| offset >= len) {
            return None;
        }
        Some(offsets)
    }

    /// Raw R, G and B samples of pixel `pixel`, see [`Tile::rgb_offsets`].
    pub fn rgb(&self, pixel: usize) -> Option<[u16; 3]> {
        self.rgb_offsets(pixel)
            .map(|[r, g, b]| [self.samples[r], self.samples[g], self.samples[b]])
    }
}

/// Defines how the sampler reaches the host's tiled-image backend.
///
/// Implementors own decoding and storage; the sampler only needs the slide
/// geometry and a way to fetch one decoded tile at a time. Fetches may happen
/// from several rayon worker threads at once.
pub trait TileSource: Send + Sync {
    /// Number of resolution levels. Level 0 is the highest resolution.
    fn num_levels(&self) -> usize;

    /// Number of tiles on `level`.
    fn num_tiles(&self, level: usize) -> usize;

    /// Size of every tile (edge tiles are padded to this size).
    fn tile_size(&self) -> TileSize;

    fn num_focus_planes(&self) -> usize;

    fn default_focus_plane(&self) -> usize;

    fn num_bands(&self) -> usize;

    fn default_band(&self) -> usize;

    /// Fetches and decodes the tile at `address`.
    fn get_tile(&self, address: TileAddress) -> Result<Tile, ThreadSafeStdError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_offsets_step_by_channel_count() {
        let tile = Tile::new(2, 1, 4, PixelLayout::Interleaved, (0..8).collect());
        assert_eq!(tile.rgb_offsets(0), Some([0, 1, 2]));
        assert_eq!(tile.rgb_offsets(1), Some([4, 5, 6]));
        assert_eq!(tile.rgb(1), Some([4, 5, 6]));
    }

    #[test]
    fn planar_offsets_step_by_plane_size() {
        let tile = Tile::new(2, 2, 3, PixelLayout::Planar, (0..12).collect());
        assert_eq!(tile.rgb_offsets(0), Some([0, 4, 8]));
        assert_eq!(tile.rgb_offsets(3), Some([3, 7, 11]));
    }

    #[test]
    fn unreadable_layout_and_short_buffers_yield_none() {
        let other = Tile::new(1, 1, 3, PixelLayout::Other(7), vec![1, 2, 3]);
        assert_eq!(other.rgb_offsets(0), None);

        let short = Tile::new(2, 1, 3, PixelLayout::Interleaved, vec![1, 2, 3, 4]);
        assert_eq!(short.rgb(0), Some([1, 2, 3]));
        assert_eq!(short.rgb(1), None);
    }
}
