use thiserror::Error;

use crate::{Dab, DabError, TileKey};

/// Largest absolute surface coordinate a dab's bounding box may reach.
///
/// Integers up to this value are exact in `f32`, so tile origins and
/// tile-local centers reconstruct the surface position without drift.
pub const MAX_SURFACE_COORDINATE: f32 = 16_777_216.0;

/// Upper bound on the tiles a single dab is replicated into.
pub const MAX_TILES_PER_DAB: usize = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TileGridError {
    #[error("tile size must be at least 1")]
    ZeroTileSize,
    #[error("tile size {0} is not a power of two")]
    NotPowerOfTwo(u32),
}

/// Fixed square tile grid anchored at the surface origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    tile_size: u32,
}

impl TileGrid {
    pub fn new(tile_size: u32) -> Result<Self, TileGridError> {
        if tile_size == 0 {
            return Err(TileGridError::ZeroTileSize);
        }
        if !tile_size.is_power_of_two() {
            return Err(TileGridError::NotPowerOfTwo(tile_size));
        }
        Ok(Self { tile_size })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Top-left corner of `key` in surface space.
    pub fn tile_origin(&self, key: TileKey) -> [f32; 2] {
        let size = self.tile_size as f32;
        [key.tx as f32 * size, key.ty as f32 * size]
    }

    /// Top-left corner of `key` in integer surface pixels.
    pub fn tile_origin_pixels(&self, key: TileKey) -> (i64, i64) {
        let size = i64::from(self.tile_size);
        (i64::from(key.tx) * size, i64::from(key.ty) * size)
    }

    /// Inclusive tile range covered by the axis-aligned box of a circle.
    pub fn range_for_circle(&self, center: [f32; 2], radius: f32) -> TileRange {
        TileRange {
            tx0: self.axis_index(center[0] - radius),
            tx1: self.axis_index(center[0] + radius),
            ty0: self.axis_index(center[1] - radius),
            ty1: self.axis_index(center[1] + radius),
        }
    }

    /// Tiles a validated dab is replicated into.
    ///
    /// Rejects dabs whose bounding box leaves `±MAX_SURFACE_COORDINATE` or
    /// that would fan out into more than `MAX_TILES_PER_DAB` tiles.
    pub fn route_dab(&self, dab: &Dab) -> Result<TileRange, DabError> {
        let [x, y] = dab.center;
        let radius = dab.radius;
        let addressable = [x - radius, x + radius, y - radius, y + radius]
            .iter()
            .all(|edge| edge.abs() <= MAX_SURFACE_COORDINATE);
        if !addressable {
            return Err(DabError::OutOfAddressableRange {
                x,
                y,
                radius,
                limit: MAX_SURFACE_COORDINATE,
            });
        }
        let range = self.range_for_circle(dab.center, radius);
        let tiles = range.len();
        if tiles > MAX_TILES_PER_DAB {
            return Err(DabError::TooManyTiles {
                tiles,
                limit: MAX_TILES_PER_DAB,
            });
        }
        Ok(range)
    }

    fn axis_index(&self, coordinate: f32) -> i32 {
        (coordinate / self.tile_size as f32).floor() as i32
    }
}

/// Inclusive rectangle of tile indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub tx0: i32,
    pub tx1: i32,
    pub ty0: i32,
    pub ty1: i32,
}

impl TileRange {
    pub fn width(&self) -> usize {
        (i64::from(self.tx1) - i64::from(self.tx0) + 1).max(0) as usize
    }

    pub fn height(&self) -> usize {
        (i64::from(self.ty1) - i64::from(self.ty0) + 1).max(0) as usize
    }

    pub fn len(&self) -> usize {
        self.width().saturating_mul(self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major iteration over every key in the range.
    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        (self.ty0..=self.ty1)
            .flat_map(move |ty| (self.tx0..=self.tx1).map(move |tx| TileKey { tx, ty }))
    }
}
