//! CPU fallback backend.
//!
//! Tiles are premultiplied RGBA8 pixmaps holding sRGB-encoded, display-ready
//! pixels. Each dab is an anti-aliased filled circle composited source-over
//! with flat coverage; hardness shaping is a shader-only feature.

use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Transform};
use tiles::LocalDab;

use crate::BlendError;
use crate::color::linear_to_skia_color;

#[derive(Debug)]
pub(crate) struct SoftwareBackend {
    tile_size: u32,
}

impl SoftwareBackend {
    pub(crate) fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    pub(crate) fn tile_size(&self) -> u32 {
        self.tile_size
    }
}

/// Blends `dabs` onto a copy of `base` (or a transparent tile).
pub(crate) fn rasterize_tile(
    tile_size: u32,
    base: Option<Pixmap>,
    dabs: &[LocalDab],
) -> Result<Pixmap, BlendError> {
    let mut pixmap = match base {
        Some(pixmap) => pixmap,
        None => Pixmap::new(tile_size, tile_size)
            .ok_or(BlendError::TileAllocation { size: tile_size })?,
    };
    for dab in dabs {
        let Some(path) = PathBuilder::from_circle(dab.center[0], dab.center[1], dab.radius) else {
            continue;
        };
        let color = linear_to_skia_color(dab.color).ok_or(BlendError::InvalidColor(dab.color))?;
        let mut paint = Paint::default();
        paint.set_color(color);
        paint.anti_alias = true;
        pixmap.fill_path(
            &path,
            &paint,
            FillRule::Winding,
            Transform::identity(),
            None,
        );
    }
    Ok(pixmap)
}
