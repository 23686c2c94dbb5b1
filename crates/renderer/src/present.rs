//! Tile store to render target.
//!
//! GPU tiles go through the present shader, which composites each tile over
//! the linear paper color and replaces the target pixels under the tile.
//! Software tiles are blitted verbatim with nearest sampling.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tiny_skia::{FilterQuality, Pixmap, PixmapMut, PixmapPaint, Transform};
use tiles::{TileGrid, TileKey};
use wgpu::util::DeviceExt;

use crate::color::srgb_to_linear_rgba;
use crate::gpu::GpuContext;
use crate::shaders::ShaderProgram;
use crate::PresentError;

/// Where [`crate::Compositor::draw`] writes.
pub enum DrawTarget<'a> {
    /// GPU target; draws are recorded into `encoder` and submitted by the caller.
    Texture {
        texture: &'a wgpu::Texture,
        view: &'a wgpu::TextureView,
        encoder: &'a mut wgpu::CommandEncoder,
    },
    Pixmap(PixmapMut<'a>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentStats {
    pub tiles_drawn: usize,
    pub tiles_culled: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PresentParamsGpu {
    origin: [f32; 2],
    target_size: [f32; 2],
    background: [f32; 4],
    tile_size: f32,
    _padding: [f32; 3],
}

const PRESENT_PARAMS_SIZE: u64 = std::mem::size_of::<PresentParamsGpu>() as u64;

/// Clipped placement of one tile inside a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TilePlacement {
    pub src_x: u32,
    pub src_y: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Returns `None` when the tile lies completely outside a `width x height` target.
pub(crate) fn place_tile(
    grid: &TileGrid,
    key: TileKey,
    width: u32,
    height: u32,
) -> Option<TilePlacement> {
    let size = i64::from(grid.tile_size());
    let (origin_x, origin_y) = grid.tile_origin_pixels(key);
    let x0 = origin_x.max(0);
    let y0 = origin_y.max(0);
    let x1 = (origin_x + size).min(i64::from(width));
    let y1 = (origin_y + size).min(i64::from(height));
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some(TilePlacement {
        src_x: (x0 - origin_x) as u32,
        src_y: (y0 - origin_y) as u32,
        dst_x: x0 as u32,
        dst_y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

pub(crate) struct ShaderPresenter {
    gpu: Arc<GpuContext>,
    tile_size: u32,
    background: [f32; 4],
    params_stride: u64,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>>,
}

impl ShaderPresenter {
    pub(crate) fn new(
        gpu: Arc<GpuContext>,
        program: &ShaderProgram,
        tile_size: u32,
        paper_color: [f32; 4],
    ) -> Self {
        let device = gpu.device();
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let params_stride = PRESENT_PARAMS_SIZE.div_ceil(alignment) * alignment;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("renderer.present.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(PRESENT_PARAMS_SIZE),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("renderer.present.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let shader = program.create_module(device);
        Self {
            tile_size,
            background: srgb_to_linear_rgba(paper_color),
            params_stride,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
            gpu,
        }
    }

    /// Paper color in linear light, as fed to the shader.
    pub(crate) fn background(&self) -> [f32; 4] {
        self.background
    }

    pub(crate) fn present(
        &self,
        grid: &TileGrid,
        tiles: &[(TileKey, &wgpu::Texture)],
        texture: &wgpu::Texture,
        view: &wgpu::TextureView,
        encoder: &mut wgpu::CommandEncoder,
    ) -> PresentStats {
        let (width, height) = (texture.width(), texture.height());
        let visible: Vec<(TileKey, &wgpu::Texture)> = tiles
            .iter()
            .copied()
            .filter(|(key, _)| place_tile(grid, *key, width, height).is_some())
            .collect();
        let stats = PresentStats {
            tiles_drawn: visible.len(),
            tiles_culled: tiles.len() - visible.len(),
        };
        if visible.is_empty() {
            return stats;
        }

        let device = self.gpu.device();
        let stride = self.params_stride as usize;
        let mut contents = vec![0u8; stride * visible.len()];
        for (index, (key, _)) in visible.iter().enumerate() {
            let params = PresentParamsGpu {
                origin: grid.tile_origin(*key),
                target_size: [width as f32, height as f32],
                background: self.background,
                tile_size: self.tile_size as f32,
                _padding: [0.0; 3],
            };
            let start = index * stride;
            contents[start..start + PRESENT_PARAMS_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(&params));
        }
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("renderer.present.params"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let tile_views: Vec<wgpu::TextureView> = visible
            .iter()
            .map(|(_, tile)| tile.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();
        let bind_groups: Vec<wgpu::BindGroup> = tile_views
            .iter()
            .map(|tile_view| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("renderer.present.bind_group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(tile_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: &params_buffer,
                                offset: 0,
                                size: wgpu::BufferSize::new(PRESENT_PARAMS_SIZE),
                            }),
                        },
                    ],
                })
            })
            .collect();

        let mut pipelines = self.pipelines.lock();
        let pipeline = pipelines
            .entry(texture.format())
            .or_insert_with(|| self.create_pipeline(texture.format()));
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("renderer.present.pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        render_pass.set_pipeline(pipeline);
        for (index, bind_group) in bind_groups.iter().enumerate() {
            let offset = (index * stride) as u32;
            render_pass.set_bind_group(0, bind_group, &[offset]);
            render_pass.draw(0..6, 0..1);
        }
        stats
    }

    fn create_pipeline(&self, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        tracing::debug!(?format, "creating present pipeline");
        self.gpu
            .device()
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("renderer.present.pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
    }
}

/// Nearest-neighbour blit of raster tiles onto a pixmap.
pub(crate) fn blit_to_pixmap(
    grid: &TileGrid,
    tiles: &[(TileKey, &Pixmap)],
    target: &mut PixmapMut<'_>,
) -> PresentStats {
    let (width, height) = (target.width(), target.height());
    let paint = PixmapPaint {
        quality: FilterQuality::Nearest,
        ..PixmapPaint::default()
    };
    let mut stats = PresentStats::default();
    for (key, tile) in tiles {
        if place_tile(grid, *key, width, height).is_none() {
            stats.tiles_culled += 1;
            continue;
        }
        let (x, y) = grid.tile_origin_pixels(*key);
        // Offsets of visible tiles fit i32 because the target size does.
        target.draw_pixmap(
            x as i32,
            y as i32,
            tile.as_ref(),
            &paint,
            Transform::identity(),
            None,
        );
        stats.tiles_drawn += 1;
    }
    stats
}

/// Uploads the visible rows of raster tiles straight into an RGBA8 texture.
pub(crate) fn blit_to_texture(
    queue: &wgpu::Queue,
    grid: &TileGrid,
    tiles: &[(TileKey, &Pixmap)],
    texture: &wgpu::Texture,
) -> Result<PresentStats, PresentError> {
    match texture.format() {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {}
        format => return Err(PresentError::UnsupportedTargetFormat(format)),
    }
    if !texture.usage().contains(wgpu::TextureUsages::COPY_DST) {
        return Err(PresentError::MissingTargetUsage(
            wgpu::TextureUsages::COPY_DST,
        ));
    }
    let (width, height) = (texture.width(), texture.height());
    let tile_size = grid.tile_size();
    let mut stats = PresentStats::default();
    for (key, tile) in tiles {
        let Some(placement) = place_tile(grid, *key, width, height) else {
            stats.tiles_culled += 1;
            continue;
        };
        let offset = (u64::from(placement.src_y) * u64::from(tile_size)
            + u64::from(placement.src_x))
            * 4;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: placement.dst_x,
                    y: placement.dst_y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            tile.data(),
            wgpu::TexelCopyBufferLayout {
                offset,
                bytes_per_row: Some(tile_size * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: placement.width,
                height: placement.height,
                depth_or_array_layers: 1,
            },
        );
        stats.tiles_drawn += 1;
    }
    Ok(stats)
}
