//! Uniform-array blend backend.
//!
//! A color run of up to `MAX_DABS_PER_PASS` dabs is packed into one uniform
//! array and blended by a single full-tile fragment pass. Longer runs and
//! further runs chain passes, each reading the previous pass output.

use std::sync::Arc;

use tiles::{LocalDab, TileKey};
use wgpu::util::DeviceExt;

use crate::coverage::color_runs;
use crate::gpu::GpuContext;
use crate::shaders::ShaderProgram;
use crate::{BlendError, TILE_TEXTURE_FORMAT};

/// Must match `MAX_DABS` in `dab_blend_uniform.wgsl`.
pub(crate) const MAX_DABS_PER_PASS: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct UniformBlendParamsGpu {
    color: [f32; 4],
    hardness: f32,
    dab_count: u32,
    _padding: [u32; 2],
}

pub(crate) struct UniformArrayBackend {
    gpu: Arc<GpuContext>,
    tile_size: u32,
    hardness: f32,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
    empty_tile: wgpu::Texture,
}

impl UniformArrayBackend {
    pub(crate) fn new(
        gpu: Arc<GpuContext>,
        program: &ShaderProgram,
        tile_size: u32,
        hardness: f32,
    ) -> Self {
        let device = gpu.device();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("renderer.uniform_blend.layout"),
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
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("renderer.uniform_blend.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let shader = program.create_module(device);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("renderer.uniform_blend.pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TILE_TEXTURE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        // wgpu zero-initializes textures, so this reads as fully transparent.
        let empty_tile = gpu.create_tile_texture(tile_size, "renderer.uniform_blend.empty_tile");
        Self {
            gpu,
            tile_size,
            hardness,
            bind_group_layout,
            pipeline,
            empty_tile,
        }
    }

    /// Records the passes for one tile and returns them with the output texture.
    pub(crate) fn encode_tile(
        &self,
        key: TileKey,
        existing: Option<&wgpu::Texture>,
        dabs: &[LocalDab],
    ) -> Result<(wgpu::CommandBuffer, wgpu::Texture), BlendError> {
        let device = self.gpu.device();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("renderer.uniform_blend.encoder"),
        });
        let mut source_view = existing
            .unwrap_or(&self.empty_tile)
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut output = None;

        for run in color_runs(dabs) {
            let run_color = dabs[run.start].color;
            for chunk in dabs[run].chunks(MAX_DABS_PER_PASS) {
                let target = self
                    .gpu
                    .create_tile_texture(self.tile_size, "renderer.uniform_blend.tile");
                let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
                let bind_group = self.create_pass_bind_group(&source_view, run_color, chunk);
                {
                    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("renderer.uniform_blend.pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &target_view,
                            resolve_target: None,
                            depth_slice: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                        multiview_mask: None,
                    });
                    render_pass.set_pipeline(&self.pipeline);
                    render_pass.set_bind_group(0, &bind_group, &[]);
                    render_pass.draw(0..3, 0..1);
                }
                source_view = target_view;
                output = Some(target);
            }
        }

        let output = output.ok_or(BlendError::EmptyBatch(key))?;
        Ok((encoder.finish(), output))
    }

    fn create_pass_bind_group(
        &self,
        source_view: &wgpu::TextureView,
        color: [f32; 4],
        chunk: &[LocalDab],
    ) -> wgpu::BindGroup {
        let device = self.gpu.device();
        let params = UniformBlendParamsGpu {
            color,
            hardness: self.hardness,
            dab_count: chunk.len() as u32,
            _padding: [0; 2],
        };
        let mut packed = vec![[0.0f32; 4]; MAX_DABS_PER_PASS];
        for (slot, dab) in packed.iter_mut().zip(chunk) {
            *slot = [dab.center[0], dab.center[1], dab.radius, dab.color[3]];
        }
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("renderer.uniform_blend.params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let dab_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("renderer.uniform_blend.dabs"),
            contents: bytemuck::cast_slice(&packed),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("renderer.uniform_blend.bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dab_buffer.as_entire_binding(),
                },
            ],
        })
    }
}
