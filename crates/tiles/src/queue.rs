use std::collections::HashMap;

use crate::{Dab, DabError, PendingDab, TileGrid, TileKey, TileOutcome};

/// Not-yet-rasterized dabs keyed by the tile they target.
///
/// Each tile keeps its dabs in enqueue order, which is stroke order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    tiles: HashMap<TileKey, Vec<PendingDab>>,
    entry_count: usize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `dab` to every tile its bounding box overlaps and returns the
    /// number of entries added. The caller validates the dab first; nothing is
    /// queued when the grid cannot address it.
    pub fn enqueue(&mut self, grid: &TileGrid, dab: Dab) -> Result<usize, DabError> {
        let range = grid.route_dab(&dab)?;
        for key in range.keys() {
            self.tiles.entry(key).or_default().push(PendingDab {
                dab,
                tile_origin: grid.tile_origin(key),
            });
        }
        self.entry_count += range.len();
        Ok(range.len())
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn get(&self, key: TileKey) -> Option<&[PendingDab]> {
        self.tiles.get(&key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.tiles.keys().copied()
    }

    /// Moves every queued tile into a batch, leaving the queue empty.
    pub fn take(&mut self) -> PendingBatch {
        self.entry_count = 0;
        PendingBatch {
            tiles: std::mem::take(&mut self.tiles),
        }
    }

    /// Puts an unflushed tile batch back ahead of anything queued since.
    pub fn restore(&mut self, key: TileKey, mut dabs: Vec<PendingDab>) {
        if dabs.is_empty() {
            return;
        }
        self.entry_count += dabs.len();
        match self.tiles.remove(&key) {
            Some(newer) => {
                dabs.extend(newer);
                self.tiles.insert(key, dabs);
            }
            None => {
                self.tiles.insert(key, dabs);
            }
        }
    }

    /// Restores every tile of a batch that never reached commit.
    pub fn restore_batch(&mut self, batch: PendingBatch) {
        for (key, dabs) in batch.tiles {
            self.restore(key, dabs);
        }
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.entry_count;
        self.tiles.clear();
        self.entry_count = 0;
        dropped
    }
}

/// Pending dabs owned by one flush.
#[derive(Debug, Default)]
pub struct PendingBatch {
    tiles: HashMap<TileKey, Vec<PendingDab>>,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn entry_count(&self) -> usize {
        self.tiles.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileKey, &[PendingDab])> + '_ {
        self.tiles.iter().map(|(key, dabs)| (*key, dabs.as_slice()))
    }

    /// Pairs per-tile results with the dabs that produced them, consuming the
    /// batch so failed tiles can be re-queued.
    pub fn into_outcomes<T, E>(
        mut self,
        results: impl IntoIterator<Item = (TileKey, Result<T, E>)>,
    ) -> Vec<TileOutcome<T, E>> {
        results
            .into_iter()
            .map(|(key, result)| TileOutcome {
                key,
                dabs: self.tiles.remove(&key).unwrap_or_default(),
                result,
            })
            .collect()
    }
}
