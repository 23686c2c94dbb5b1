use std::path::Path;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::join_all;
use tiny_skia::Pixmap;
use tiles::{LocalDab, PendingDab, TileGrid, TileKey, TileStore};

use crate::gpu::GpuContext;
use crate::instanced::InstancedBackend;
use crate::present::{self, DrawTarget, PresentStats, ShaderPresenter};
use crate::shaders::{self, ShaderProgram};
use crate::software::{self, SoftwareBackend};
use crate::uniform_array::UniformArrayBackend;
use crate::{
    BLEND_INSTANCED_PROGRAM, BLEND_UNIFORM_PROGRAM, BlendBackendKind, BlendError, BlendSettings,
    PRESENT_PROGRAM, PresentError, ShaderLoadError, TileImage,
};

enum BlendBackend {
    UniformArray(UniformArrayBackend),
    Instanced(InstancedBackend),
    Software(SoftwareBackend),
}

/// Blend backend plus presenter for one surface.
///
/// Built once; the backend it settled on never changes afterwards, so every
/// flush of a tile goes through the same strategy.
pub struct Compositor {
    kind: BlendBackendKind,
    settings: BlendSettings,
    gpu: Option<Arc<GpuContext>>,
    backend: BlendBackend,
    presenter: Option<ShaderPresenter>,
}

/// One tile's share of a flush, ready to run off the store lock.
///
/// Holds only what the backend needs; the dabs themselves stay with the
/// caller's batch until commit.
pub struct PreparedTile {
    key: TileKey,
    work: PreparedWork,
}

/// Per-tile result of [`Compositor::execute`].
pub type TileResult = (TileKey, Result<TileImage, BlendError>);

enum PreparedWork {
    Gpu {
        commands: wgpu::CommandBuffer,
        output: wgpu::Texture,
    },
    Raster {
        tile_size: u32,
        base: Option<Pixmap>,
        local: Vec<LocalDab>,
    },
    Failed(BlendError),
}

impl Compositor {
    /// Builds the requested backend, or the software one when there is no
    /// device, the tile size exceeds the device limit, or a shader program
    /// fails to load.
    pub fn init(
        requested: BlendBackendKind,
        gpu: Option<Arc<GpuContext>>,
        shader_dir: &Path,
        settings: BlendSettings,
    ) -> Self {
        let software = |gpu| Self {
            kind: BlendBackendKind::Software,
            settings,
            gpu,
            backend: BlendBackend::Software(SoftwareBackend::new(settings.tile_size)),
            presenter: None,
        };
        if !requested.uses_shaders() {
            tracing::info!(tile_size = settings.tile_size, "using software blend backend");
            return software(gpu);
        }
        let Some(context) = gpu else {
            tracing::warn!(
                ?requested,
                "no gpu context supplied; falling back to software blending"
            );
            return software(None);
        };
        let max_dimension = context.max_texture_dimension();
        if settings.tile_size > max_dimension {
            tracing::warn!(
                tile_size = settings.tile_size,
                max_dimension,
                "tile size exceeds device texture limit; falling back to software blending"
            );
            return software(Some(context));
        }
        let (blend_program, present_program) = match load_programs(requested, shader_dir) {
            Ok(programs) => programs,
            Err(error) => {
                tracing::warn!(
                    %error,
                    dir = %shader_dir.display(),
                    "shader programs unavailable; falling back to software blending"
                );
                return software(Some(context));
            }
        };

        let backend = if requested == BlendBackendKind::Instanced {
            BlendBackend::Instanced(InstancedBackend::new(
                Arc::clone(&context),
                &blend_program,
                settings.tile_size,
                settings.hardness,
            ))
        } else {
            BlendBackend::UniformArray(UniformArrayBackend::new(
                Arc::clone(&context),
                &blend_program,
                settings.tile_size,
                settings.hardness,
            ))
        };
        let presenter = ShaderPresenter::new(
            Arc::clone(&context),
            &present_program,
            settings.tile_size,
            settings.paper_color,
        );
        tracing::info!(
            backend = ?requested,
            tile_size = settings.tile_size,
            hardness = settings.hardness,
            "gpu blend backend ready"
        );
        Self {
            kind: requested,
            settings,
            gpu: Some(context),
            backend,
            presenter: Some(presenter),
        }
    }

    /// The backend actually in use, after any fallback.
    pub fn kind(&self) -> BlendBackendKind {
        self.kind
    }

    pub fn settings(&self) -> &BlendSettings {
        &self.settings
    }

    pub fn gpu(&self) -> Option<&Arc<GpuContext>> {
        self.gpu.as_ref()
    }

    /// Records or snapshots the work for one tile. Runs under the store lock
    /// and never waits on the device.
    pub fn prepare_tile(
        &self,
        key: TileKey,
        existing: Option<&TileImage>,
        dabs: &[PendingDab],
    ) -> PreparedTile {
        let work = match self.prepare_work(key, existing, dabs) {
            Ok(work) => work,
            Err(error) => PreparedWork::Failed(error),
        };
        PreparedTile { key, work }
    }

    fn prepare_work(
        &self,
        key: TileKey,
        existing: Option<&TileImage>,
        dabs: &[PendingDab],
    ) -> Result<PreparedWork, BlendError> {
        if dabs.is_empty() {
            return Err(BlendError::EmptyBatch(key));
        }
        let local: Vec<LocalDab> = dabs.iter().map(PendingDab::local).collect();
        match &self.backend {
            BlendBackend::UniformArray(backend) => {
                let (commands, output) =
                    backend.encode_tile(key, existing_texture(key, existing)?, &local)?;
                Ok(PreparedWork::Gpu { commands, output })
            }
            BlendBackend::Instanced(backend) => {
                let (commands, output) =
                    backend.encode_tile(key, existing_texture(key, existing)?, &local)?;
                Ok(PreparedWork::Gpu { commands, output })
            }
            BlendBackend::Software(backend) => {
                let base = match existing {
                    None => None,
                    Some(TileImage::Raster(pixmap)) => Some(pixmap.clone()),
                    Some(TileImage::Texture(_)) => return Err(BlendError::TileKindMismatch(key)),
                };
                Ok(PreparedWork::Raster {
                    tile_size: backend.tile_size(),
                    base,
                    local,
                })
            }
        }
    }

    /// Runs every prepared tile concurrently and reports one outcome per tile.
    ///
    /// Raster tiles fan out over the rayon pool; GPU command buffers are
    /// submitted together and resolve when the queue reports them done.
    pub async fn execute(&self, prepared: Vec<PreparedTile>) -> Vec<TileResult> {
        let mut outcomes = Vec::with_capacity(prepared.len());
        let mut commands = Vec::new();
        let mut gpu_tiles = Vec::new();
        let mut raster_jobs = Vec::new();
        for tile in prepared {
            match tile.work {
                PreparedWork::Gpu {
                    commands: buffer,
                    output,
                } => {
                    commands.push(buffer);
                    gpu_tiles.push((tile.key, output));
                }
                PreparedWork::Raster {
                    tile_size,
                    base,
                    local,
                } => {
                    raster_jobs.push(spawn_raster(tile_size, tile.key, base, local));
                }
                PreparedWork::Failed(error) => outcomes.push((tile.key, Err(error))),
            }
        }

        let gpu_work = async {
            match &self.gpu {
                Some(gpu) if !commands.is_empty() => {
                    gpu.queue().submit(commands);
                    gpu.submitted_work_done().await
                }
                _ => Ok(()),
            }
        };
        let (gpu_result, raster_outcomes) = futures::join!(gpu_work, join_all(raster_jobs));

        outcomes.extend(raster_outcomes);
        for (key, output) in gpu_tiles {
            let result = match &gpu_result {
                Ok(()) => Ok(TileImage::Texture(output)),
                Err(error) => Err(BlendError::Gpu(error.clone())),
            };
            outcomes.push((key, result));
        }
        outcomes
    }

    /// Presents every committed tile onto `target`.
    pub fn draw(
        &self,
        grid: &TileGrid,
        store: &TileStore<TileImage>,
        target: DrawTarget<'_>,
    ) -> Result<PresentStats, PresentError> {
        let mut textures = Vec::new();
        let mut rasters = Vec::new();
        for (key, image) in store.iter() {
            match image {
                TileImage::Texture(texture) => textures.push((key, texture)),
                TileImage::Raster(pixmap) => rasters.push((key, pixmap)),
            }
        }

        let stats = match target {
            DrawTarget::Pixmap(mut pixmap) => {
                if !textures.is_empty() {
                    return Err(PresentError::TargetMismatch("texture", "pixmap"));
                }
                present::blit_to_pixmap(grid, &rasters, &mut pixmap)
            }
            DrawTarget::Texture {
                texture,
                view,
                encoder,
            } => {
                let mut stats = PresentStats::default();
                if !textures.is_empty() {
                    let presenter = self
                        .presenter
                        .as_ref()
                        .ok_or(PresentError::TargetMismatch("texture", "unshaded texture"))?;
                    stats = presenter.present(grid, &textures, texture, view, encoder);
                }
                if !rasters.is_empty() {
                    let gpu = self
                        .gpu
                        .as_ref()
                        .ok_or(PresentError::TargetMismatch("raster", "texture"))?;
                    let blitted =
                        present::blit_to_texture(gpu.queue(), grid, &rasters, texture)?;
                    stats.tiles_drawn += blitted.tiles_drawn;
                    stats.tiles_culled += blitted.tiles_culled;
                }
                stats
            }
        };
        tracing::debug!(
            drawn = stats.tiles_drawn,
            culled = stats.tiles_culled,
            "presented tile store"
        );
        Ok(stats)
    }

    pub(crate) fn presenter(&self) -> Option<&ShaderPresenter> {
        self.presenter.as_ref()
    }
}

fn load_programs(
    requested: BlendBackendKind,
    shader_dir: &Path,
) -> Result<(ShaderProgram, ShaderProgram), ShaderLoadError> {
    let blend_name = match requested {
        BlendBackendKind::Instanced => BLEND_INSTANCED_PROGRAM,
        _ => BLEND_UNIFORM_PROGRAM,
    };
    let blend = shaders::load_program(shader_dir, blend_name)?;
    let present = shaders::load_program(shader_dir, PRESENT_PROGRAM)?;
    Ok((blend, present))
}

fn existing_texture(
    key: TileKey,
    existing: Option<&TileImage>,
) -> Result<Option<&wgpu::Texture>, BlendError> {
    match existing {
        None => Ok(None),
        Some(TileImage::Texture(texture)) => Ok(Some(texture)),
        Some(TileImage::Raster(_)) => Err(BlendError::TileKindMismatch(key)),
    }
}

fn spawn_raster(
    tile_size: u32,
    key: TileKey,
    base: Option<Pixmap>,
    local: Vec<LocalDab>,
) -> impl Future<Output = TileResult> {
    let (sender, receiver) = oneshot::channel();
    rayon::spawn(move || {
        let _ = sender.send(software::rasterize_tile(tile_size, base, &local));
    });
    async move {
        let result = match receiver.await {
            Ok(result) => result.map(TileImage::Raster),
            Err(_) => Err(BlendError::WorkerLost(key)),
        };
        (key, result)
    }
}
