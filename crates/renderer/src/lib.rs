//! Renderer crate root.
//!
//! Turns pending tile batches into tile images and tile images into pixels.
//!
//! Internal architecture overview:
//! - `compositor`: owns the configured blend backend and presenter, handles
//!   shader fallback, and runs the per-tile flush fan-out.
//! - `uniform_array`/`instanced`/`software`: the three blend strategies.
//! - `present`: tile store to render target (shader composite or raster blit).
//! - `export`: flat snapshots of the whole store.
//! - `gpu`/`shaders`/`color`/`coverage`: shared plumbing.

mod color;
mod compositor;
mod coverage;
mod export;
mod gpu;
mod instanced;
mod present;
mod shaders;
mod software;
mod uniform_array;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiles::{TileKey, TileResource};

pub use color::{
    linear_to_srgb, srgb_to_linear, srgb_to_linear_rgba, srgb_u8_to_linear, srgb_u8_to_srgb_f32,
};
pub use compositor::{Compositor, PreparedTile, TileResult};
pub use coverage::{color_runs, dab_coverage};
pub use export::{MAX_RASTER_SNAPSHOT_DIMENSION, PendingSnapshot, pixmap_to_rgba_image};
pub use gpu::{GpuContext, GpuError};
pub use present::{DrawTarget, PresentStats};
pub use shaders::{
    BLEND_INSTANCED_PROGRAM, BLEND_UNIFORM_PROGRAM, PRESENT_PROGRAM, ShaderLoadError,
    ShaderProgram, load_program,
};

/// Storage format of GPU tiles: premultiplied, linear light.
pub const TILE_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Offscreen format used for snapshots; hardware encodes linear output to sRGB.
pub const SNAPSHOT_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Directory holding the WGSL programs shipped with this crate.
pub fn default_shader_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendBackendKind {
    #[default]
    UniformArray,
    Instanced,
    Software,
}

impl BlendBackendKind {
    pub fn uses_shaders(self) -> bool {
        !matches!(self, BlendBackendKind::Software)
    }
}

/// Settings fixed for the lifetime of a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendSettings {
    pub tile_size: u32,
    /// Edge hardness in `[0, 1]`; 1.0 is a hard analytic edge. Ignored by the
    /// software backend.
    pub hardness: f32,
    /// Paper color, sRGB encoded.
    pub paper_color: [f32; 4],
}

/// Image held by one tile store slot.
#[derive(Debug)]
pub enum TileImage {
    Texture(wgpu::Texture),
    Raster(tiny_skia::Pixmap),
}

impl TileImage {
    pub fn as_texture(&self) -> Option<&wgpu::Texture> {
        match self {
            TileImage::Texture(texture) => Some(texture),
            TileImage::Raster(_) => None,
        }
    }

    pub fn as_raster(&self) -> Option<&tiny_skia::Pixmap> {
        match self {
            TileImage::Raster(pixmap) => Some(pixmap),
            TileImage::Texture(_) => None,
        }
    }
}

impl TileResource for TileImage {
    fn release(self) {
        // Dropping the texture handle lets wgpu free it once every submission
        // that still samples it has retired.
        drop(self);
    }
}

#[derive(Debug, Clone, Error)]
pub enum BlendError {
    #[error("could not allocate a {size}x{size} software tile")]
    TileAllocation { size: u32 },
    #[error("dab color {0:?} cannot be rasterized")]
    InvalidColor([f32; 4]),
    #[error("tile {0} holds an image from a different backend")]
    TileKindMismatch(TileKey),
    #[error("tile batch for {0} has no dabs")]
    EmptyBatch(TileKey),
    #[error("rasterization worker for tile {0} stopped before reporting")]
    WorkerLost(TileKey),
    #[error("gpu work for the flush did not complete: {0}")]
    Gpu(#[from] GpuError),
}

#[derive(Debug, Clone, Error)]
pub enum PresentError {
    #[error("{0} tiles cannot be presented onto a {1} target")]
    TargetMismatch(&'static str, &'static str),
    #[error("target format {0:?} is not supported for raster blits")]
    UnsupportedTargetFormat(wgpu::TextureFormat),
    #[error("target texture needs {0:?} usage")]
    MissingTargetUsage(wgpu::TextureUsages),
}

#[derive(Debug, Clone, Error)]
pub enum ExportError {
    #[error("snapshot size {width}x{height} is outside 1..={max}")]
    InvalidSize { width: u32, height: u32, max: u32 },
    #[error(transparent)]
    Present(#[from] PresentError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

#[cfg(test)]
mod wgsl_tests;
