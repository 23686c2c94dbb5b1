use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use renderer::{
    BlendBackendKind, Compositor, DrawTarget, GpuContext, PresentStats, TileImage,
    pixmap_to_rgba_image,
};
use tiles::{
    Dab, PendingBatch, PendingDab, PendingQueue, TileGrid, TileKey, TileStore, commit_outcomes,
};
use tiny_skia::PixmapMut;

use crate::{SurfaceConfig, SurfaceError};

/// What one flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub tiles_committed: usize,
    pub entries_flushed: usize,
    /// Tiles dropped because the surface was cleared mid-flush.
    pub tiles_discarded: usize,
}

/// Sparse dab-compositing surface.
///
/// `add_dab` only touches the pending queue and can be called from the input
/// path while a flush runs. `flush` is the only operation that waits on
/// rasterization. Locks are always taken store first, then queue.
pub struct TileSurface {
    config: SurfaceConfig,
    grid: TileGrid,
    gpu: Option<Arc<GpuContext>>,
    compositor: OnceLock<Compositor>,
    store: RwLock<TileStore<TileImage>>,
    queue: Arc<Mutex<PendingQueue>>,
    flush_serial: futures::lock::Mutex<()>,
    disposed: Arc<AtomicBool>,
}

/// Cloneable handle that feeds dabs into a surface's pending queue.
#[derive(Clone)]
pub struct DabSink {
    grid: TileGrid,
    queue: Arc<Mutex<PendingQueue>>,
    disposed: Arc<AtomicBool>,
}

impl DabSink {
    /// Validates and routes one dab; returns how many tile entries it produced.
    ///
    /// Dabs the grid cannot address, or that would fan out past
    /// [`tiles::MAX_TILES_PER_DAB`] tiles, are rejected as invalid.
    pub fn add_dab(
        &self,
        center: [f32; 2],
        radius: f32,
        color: [f32; 4],
    ) -> Result<usize, SurfaceError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SurfaceError::Disposed);
        }
        let dab = Dab::new(center, radius, color);
        dab.validate()?;
        Ok(self.queue.lock().enqueue(&self.grid, dab)?)
    }
}

impl TileSurface {
    /// Creates an empty surface. The blend backend is built on first use.
    pub fn new(config: SurfaceConfig, gpu: Option<Arc<GpuContext>>) -> Result<Self, SurfaceError> {
        config.validate()?;
        let grid = TileGrid::new(config.tile_size).map_err(crate::ConfigError::from)?;
        Ok(Self {
            config,
            grid,
            gpu,
            compositor: OnceLock::new(),
            store: RwLock::new(TileStore::new()),
            queue: Arc::new(Mutex::new(PendingQueue::new())),
            flush_serial: futures::lock::Mutex::new(()),
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    pub fn dab_sink(&self) -> DabSink {
        DabSink {
            grid: self.grid,
            queue: Arc::clone(&self.queue),
            disposed: Arc::clone(&self.disposed),
        }
    }

    pub fn add_dab(
        &self,
        center: [f32; 2],
        radius: f32,
        color: [f32; 4],
    ) -> Result<usize, SurfaceError> {
        self.dab_sink().add_dab(center, radius, color)
    }

    pub fn has_pending_work(&self) -> bool {
        !self.is_disposed() && !self.queue.lock().is_empty()
    }

    pub fn pending_entries(&self) -> usize {
        self.queue.lock().entry_count()
    }

    pub fn pending_dabs(&self, key: TileKey) -> Vec<PendingDab> {
        self.queue
            .lock()
            .get(key)
            .map(<[PendingDab]>::to_vec)
            .unwrap_or_default()
    }

    pub fn tile_count(&self) -> usize {
        self.store.read().len()
    }

    /// Committed tile keys in row-major order.
    pub fn tile_keys(&self) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self.store.read().keys().collect();
        keys.sort_by_key(|key| (key.ty, key.tx));
        keys
    }

    /// The blend backend in use, after any fallback.
    pub fn backend_kind(&self) -> BlendBackendKind {
        self.compositor().kind()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Rasterizes every queued dab into its tiles.
    ///
    /// Dabs added while this runs go to the next flush. Tiles whose backend
    /// call failed stay queued and are reported as [`SurfaceError::PartialFlush`]
    /// after the others commit.
    pub async fn flush(&self) -> Result<FlushReport, SurfaceError> {
        self.ensure_live()?;
        let _serial = self.flush_serial.lock().await;
        self.ensure_live()?;
        let compositor = self.compositor();

        let (prepared, generation, entries_flushed, mut requeue) = {
            let store = self.store.read();
            let batch = self.queue.lock().take();
            if batch.is_empty() {
                return Ok(FlushReport::default());
            }
            let generation = store.generation();
            let entries_flushed = batch.entry_count();
            let prepared: Vec<_> = batch
                .iter()
                .map(|(key, dabs)| compositor.prepare_tile(key, store.get(key), dabs))
                .collect();
            let requeue = RequeueOnDrop {
                surface: self,
                generation,
                batch: Some(batch),
            };
            (prepared, generation, entries_flushed, requeue)
        };
        tracing::debug!(
            tiles = prepared.len(),
            entries = entries_flushed,
            "flushing pending dabs"
        );

        let results = compositor.execute(prepared).await;

        let report = {
            let mut store = self.store.write();
            let mut queue = self.queue.lock();
            let outcomes = requeue.disarm().into_outcomes(results);
            commit_outcomes(&mut store, &mut queue, generation, outcomes)
        };
        tracing::debug!(
            committed = report.committed.len(),
            failed = report.failed.len(),
            discarded = report.discarded,
            "flush committed"
        );
        if !report.failed.is_empty() {
            for failure in &report.failed {
                tracing::warn!(tile = %failure.key, error = %failure.error, "tile flush failed");
            }
            return Err(SurfaceError::PartialFlush {
                committed: report.committed.len(),
                failed: report.failed,
            });
        }
        Ok(FlushReport {
            tiles_committed: report.committed.len(),
            entries_flushed,
            tiles_discarded: report.discarded,
        })
    }

    /// Presents every committed tile onto `target`. Never mutates the store.
    pub fn draw(&self, target: DrawTarget<'_>) -> Result<PresentStats, SurfaceError> {
        self.ensure_live()?;
        let compositor = self.compositor();
        let store = self.store.read();
        Ok(compositor.draw(&self.grid, &store, target)?)
    }

    /// Flattens paper and committed tiles into a `width x height` image.
    pub async fn to_image(&self, width: u32, height: u32) -> Result<RgbaImage, SurfaceError> {
        self.to_image_with_overlay(width, height, |_| {}).await
    }

    /// Like [`Self::to_image`], then runs `overlay` on the flattened raster
    /// before finalizing, e.g. to bake a live stroke that is not committed yet.
    pub async fn to_image_with_overlay<F>(
        &self,
        width: u32,
        height: u32,
        overlay: F,
    ) -> Result<RgbaImage, SurfaceError>
    where
        F: FnOnce(&mut PixmapMut<'_>),
    {
        self.ensure_live()?;
        let compositor = self.compositor();
        let pending = {
            let store = self.store.read();
            compositor.begin_snapshot(&self.grid, &store, width, height)?
        };
        let mut pixmap = pending.finish().await?;
        overlay(&mut pixmap.as_mut());
        Ok(pixmap_to_rgba_image(&pixmap))
    }

    /// Drops every tile and all pending work. Returns the number of tiles released.
    pub fn clear(&self) -> Result<usize, SurfaceError> {
        self.ensure_live()?;
        let mut store = self.store.write();
        let mut queue = self.queue.lock();
        let released = store.clear();
        let dropped = queue.clear();
        tracing::debug!(released, dropped, "surface cleared");
        Ok(released)
    }

    /// Releases all tiles and rejects further use. Calling it again is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut store = self.store.write();
        let mut queue = self.queue.lock();
        let released = store.clear();
        queue.clear();
        tracing::info!(released, "surface disposed");
    }

    fn ensure_live(&self) -> Result<(), SurfaceError> {
        if self.is_disposed() {
            return Err(SurfaceError::Disposed);
        }
        Ok(())
    }

    fn compositor(&self) -> &Compositor {
        self.compositor.get_or_init(|| {
            Compositor::init(
                self.config.backend,
                self.gpu.clone(),
                &self.config.shader_dir,
                self.config.blend_settings(),
            )
        })
    }
}

#[cfg(test)]
impl TileSurface {
    /// Puts `image` straight into the store, bypassing flush.
    pub(crate) fn seed_tile(&self, key: TileKey, image: TileImage) {
        self.store.write().replace(key, image);
    }
}

impl Drop for TileSurface {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owns a taken batch until commit and puts it back if the flush future is
/// dropped first.
struct RequeueOnDrop<'a> {
    surface: &'a TileSurface,
    generation: u64,
    batch: Option<PendingBatch>,
}

impl RequeueOnDrop<'_> {
    fn disarm(&mut self) -> PendingBatch {
        self.batch.take().unwrap_or_default()
    }
}

impl Drop for RequeueOnDrop<'_> {
    fn drop(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        let store = self.surface.store.read();
        if store.generation() != self.generation {
            return;
        }
        let tiles = batch.tile_count();
        self.surface.queue.lock().restore_batch(batch);
        tracing::warn!(tiles, "flush abandoned before commit; batch re-queued");
    }
}
