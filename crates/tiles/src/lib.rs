//! Sparse tile bookkeeping for dab compositing.
//!
//! This crate owns everything about tiles that does not touch pixels:
//! - `grid`: tile size, tile addressing and dab-to-tile routing.
//! - `dab`: dab validation and tile-local replicas.
//! - `queue`: the per-tile pending dab queue consumed by flush.
//! - `store`: the sparse `TileKey -> image` table and its generation counter.
//! - `commit`: how per-tile flush outcomes are applied back to store and queue.
//!
//! The store is generic over the image type so GPU and software tiles share
//! one lifecycle.

mod commit;
mod dab;
mod grid;
mod queue;
mod store;

pub use commit::{CommitReport, TileFailure, TileOutcome, commit_outcomes};
pub use dab::{Dab, DabError, LocalDab, PendingDab};
pub use grid::{MAX_SURFACE_COORDINATE, MAX_TILES_PER_DAB, TileGrid, TileGridError, TileRange};
pub use queue::{PendingBatch, PendingQueue};
pub use store::{TileResource, TileStore};

pub const DEFAULT_TILE_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub tx: i32,
    pub ty: i32,
}

impl TileKey {
    pub const fn new(tx: i32, ty: i32) -> Self {
        Self { tx, ty }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "({}, {})", self.tx, self.ty)
    }
}
