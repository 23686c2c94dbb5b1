use std::collections::HashMap;

use crate::TileKey;

/// Image type that can live in a [`TileStore`].
///
/// `release` is called exactly once, when the store gives up the image.
pub trait TileResource {
    fn release(self);
}

/// Sparse table of committed tile images.
///
/// A key missing from the table shows background. `generation` changes every
/// time the table is emptied so a flush that started before a clear can tell
/// its results are stale.
#[derive(Debug)]
pub struct TileStore<T> {
    tiles: HashMap<TileKey, T>,
    generation: u64,
}

impl<T> Default for TileStore<T> {
    fn default() -> Self {
        Self {
            tiles: HashMap::new(),
            generation: 0,
        }
    }
}

impl<T: TileResource> TileStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.tiles.contains_key(&key)
    }

    pub fn get(&self, key: TileKey) -> Option<&T> {
        self.tiles.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.tiles.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileKey, &T)> + '_ {
        self.tiles.iter().map(|(key, image)| (*key, image))
    }

    /// Installs `image` for `key`; the previous image is released only after
    /// the new one is in place.
    pub fn replace(&mut self, key: TileKey, image: T) -> bool {
        match self.tiles.insert(key, image) {
            Some(previous) => {
                previous.release();
                true
            }
            None => false,
        }
    }

    /// Releases every tile and starts a new generation.
    pub fn clear(&mut self) -> usize {
        let released = self.tiles.len();
        for (_, image) in self.tiles.drain() {
            image.release();
        }
        self.generation = self.generation.wrapping_add(1);
        released
    }
}
