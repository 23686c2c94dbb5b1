//! Flat snapshots of the whole tile store.
//!
//! Snapshot work is split so the caller can release the store lock between
//! recording (`Compositor::begin_snapshot`) and waiting for GPU readback
//! (`PendingSnapshot::finish`).

use std::sync::Arc;

use image::RgbaImage;
use tiny_skia::{IntSize, Pixmap};
use tiles::{TileGrid, TileStore};

use crate::color::{linear_to_wgpu_color, srgb_to_skia_color};
use crate::compositor::Compositor;
use crate::gpu::{GpuContext, padded_bytes_per_row};
use crate::present::DrawTarget;
use crate::{ExportError, SNAPSHOT_TEXTURE_FORMAT, TileImage};

/// Largest edge of a software snapshot.
pub const MAX_RASTER_SNAPSHOT_DIMENSION: u32 = 16_384;

/// Snapshot whose pixels may still be on the device.
pub struct PendingSnapshot {
    inner: SnapshotState,
}

enum SnapshotState {
    Ready(Pixmap),
    Readback {
        gpu: Arc<GpuContext>,
        buffer: wgpu::Buffer,
        width: u32,
        height: u32,
        padded_bytes_per_row: u32,
    },
}

impl PendingSnapshot {
    /// Waits for readback if needed and returns an opaque pixmap.
    pub async fn finish(self) -> Result<Pixmap, ExportError> {
        match self.inner {
            SnapshotState::Ready(pixmap) => Ok(pixmap),
            SnapshotState::Readback {
                gpu,
                buffer,
                width,
                height,
                padded_bytes_per_row,
            } => {
                let pixels = gpu
                    .read_texture_rgba8(buffer, width, height, padded_bytes_per_row)
                    .await?;
                // Present output is opaque, so straight and premultiplied bytes agree.
                IntSize::from_wh(width, height)
                    .and_then(|size| Pixmap::from_vec(pixels, size))
                    .ok_or(ExportError::InvalidSize {
                        width,
                        height,
                        max: width.max(height),
                    })
            }
        }
    }
}

impl Compositor {
    /// Paints the paper color and every committed tile into a fresh
    /// `width x height` raster.
    pub fn begin_snapshot(
        &self,
        grid: &TileGrid,
        store: &TileStore<TileImage>,
        width: u32,
        height: u32,
    ) -> Result<PendingSnapshot, ExportError> {
        match (self.gpu(), self.presenter()) {
            (Some(gpu), Some(presenter)) => {
                check_size(width, height, gpu.max_texture_dimension())?;
                let background = linear_to_wgpu_color(presenter.background());
                self.begin_gpu_snapshot(gpu, grid, store, width, height, background)
            }
            _ => {
                check_size(width, height, MAX_RASTER_SNAPSHOT_DIMENSION)?;
                self.raster_snapshot(grid, store, width, height)
            }
        }
    }

    fn raster_snapshot(
        &self,
        grid: &TileGrid,
        store: &TileStore<TileImage>,
        width: u32,
        height: u32,
    ) -> Result<PendingSnapshot, ExportError> {
        let mut pixmap = Pixmap::new(width, height).ok_or(ExportError::InvalidSize {
            width,
            height,
            max: MAX_RASTER_SNAPSHOT_DIMENSION,
        })?;
        if let Some(paper) = srgb_to_skia_color(self.settings().paper_color) {
            pixmap.fill(paper);
        }
        self.draw(grid, store, DrawTarget::Pixmap(pixmap.as_mut()))?;
        Ok(PendingSnapshot {
            inner: SnapshotState::Ready(pixmap),
        })
    }

    fn begin_gpu_snapshot(
        &self,
        gpu: &Arc<GpuContext>,
        grid: &TileGrid,
        store: &TileStore<TileImage>,
        width: u32,
        height: u32,
        background: wgpu::Color,
    ) -> Result<PendingSnapshot, ExportError> {
        let device = gpu.device();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("renderer.snapshot.target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SNAPSHOT_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("renderer.snapshot.encoder"),
        });
        {
            let _clear_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("renderer.snapshot.clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(background),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.draw(
            grid,
            store,
            DrawTarget::Texture {
                texture: &texture,
                view: &view,
                encoder: &mut encoder,
            },
        )?;

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.snapshot.readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue().submit(Some(encoder.finish()));
        Ok(PendingSnapshot {
            inner: SnapshotState::Readback {
                gpu: Arc::clone(gpu),
                buffer,
                width,
                height,
                padded_bytes_per_row,
            },
        })
    }
}

fn check_size(width: u32, height: u32, max: u32) -> Result<(), ExportError> {
    if width == 0 || height == 0 || width > max || height > max {
        return Err(ExportError::InvalidSize { width, height, max });
    }
    Ok(())
}

/// Un-premultiplies a pixmap into a straight-alpha image.
pub fn pixmap_to_rgba_image(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = image::Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}
