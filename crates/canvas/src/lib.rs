//! Public drawing surface.
//!
//! `TileSurface` ties the tile bookkeeping of `tiles` to the blend backends and
//! presenters of `renderer`:
//! - `add_dab` routes a dab into the pending queue,
//! - `flush` rasterizes queued dabs into tiles,
//! - `draw` / `to_image` present committed tiles,
//! - `clear` / `dispose` release them.

mod config;
mod surface;

use renderer::{BlendError, ExportError, PresentError};
use thiserror::Error;
use tiles::{DabError, TileFailure};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub use config::{ConfigError, PaperColor, SurfaceConfig};
pub use renderer::{BlendBackendKind, DrawTarget, GpuContext, PresentStats};
pub use surface::{DabSink, FlushReport, TileSurface};
pub use tiles::{DEFAULT_TILE_SIZE, TileKey};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("surface has been disposed")]
    Disposed,
    #[error("invalid dab: {0}")]
    InvalidDab(#[from] DabError),
    #[error("{} tiles failed to flush ({committed} committed); they stay queued", .failed.len())]
    PartialFlush {
        committed: usize,
        failed: Vec<TileFailure<BlendError>>,
    },
    #[error(transparent)]
    Present(#[from] PresentError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests;
