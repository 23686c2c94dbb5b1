//! Instanced blend backend: one draw per dab.
//!
//! All dab parameters for a tile live in one uniform buffer at aligned
//! strides; each draw selects its slot with a dynamic offset. The pipeline
//! blends premultiplied source-over, so draw order is composite order.

use std::sync::Arc;

use tiles::{LocalDab, TileKey};
use wgpu::util::DeviceExt;

use crate::gpu::GpuContext;
use crate::shaders::ShaderProgram;
use crate::{BlendError, TILE_TEXTURE_FORMAT};

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct InstancedDabParamsGpu {
    color: [f32; 4],
    center: [f32; 2],
    radius: f32,
    hardness: f32,
    tile_size: f32,
    _padding: [f32; 3],
}

const DAB_PARAMS_SIZE: u64 = std::mem::size_of::<InstancedDabParamsGpu>() as u64;

pub(crate) struct InstancedBackend {
    gpu: Arc<GpuContext>,
    tile_size: u32,
    hardness: f32,
    params_stride: u64,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl InstancedBackend {
    pub(crate) fn new(
        gpu: Arc<GpuContext>,
        program: &ShaderProgram,
        tile_size: u32,
        hardness: f32,
    ) -> Self {
        let device = gpu.device();
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let params_stride = DAB_PARAMS_SIZE.div_ceil(alignment) * alignment;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("renderer.instanced_blend.layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(DAB_PARAMS_SIZE),
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("renderer.instanced_blend.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let shader = program.create_module(device);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("renderer.instanced_blend.pipeline"),
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
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        Self {
            gpu,
            tile_size,
            hardness,
            params_stride,
            bind_group_layout,
            pipeline,
        }
    }

    pub(crate) fn encode_tile(
        &self,
        key: TileKey,
        existing: Option<&wgpu::Texture>,
        dabs: &[LocalDab],
    ) -> Result<(wgpu::CommandBuffer, wgpu::Texture), BlendError> {
        if dabs.is_empty() {
            return Err(BlendError::EmptyBatch(key));
        }
        let device = self.gpu.device();
        let output = self
            .gpu
            .create_tile_texture(self.tile_size, "renderer.instanced_blend.tile");
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("renderer.instanced_blend.encoder"),
        });

        let load = match existing {
            Some(existing) => {
                encoder.copy_texture_to_texture(
                    existing.as_image_copy(),
                    output.as_image_copy(),
                    wgpu::Extent3d {
                        width: self.tile_size,
                        height: self.tile_size,
                        depth_or_array_layers: 1,
                    },
                );
                wgpu::LoadOp::Load
            }
            None => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        };

        let params_buffer = self.create_params_buffer(dabs);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("renderer.instanced_blend.bind_group"),
            layout: &self.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &params_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(DAB_PARAMS_SIZE),
                }),
            }],
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("renderer.instanced_blend.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            render_pass.set_pipeline(&self.pipeline);
            for index in 0..dabs.len() {
                let offset = index as u64 * self.params_stride;
                render_pass.set_bind_group(0, &bind_group, &[offset as u32]);
                render_pass.draw(0..6, 0..1);
            }
        }

        Ok((encoder.finish(), output))
    }

    fn create_params_buffer(&self, dabs: &[LocalDab]) -> wgpu::Buffer {
        let stride = self.params_stride as usize;
        let mut contents = vec![0u8; stride * dabs.len()];
        for (index, dab) in dabs.iter().enumerate() {
            let params = InstancedDabParamsGpu {
                color: dab.color,
                center: dab.center,
                radius: dab.radius,
                hardness: self.hardness,
                tile_size: self.tile_size as f32,
                _padding: [0.0; 3],
            };
            let start = index * stride;
            contents[start..start + DAB_PARAMS_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(&params));
        }
        self.gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("renderer.instanced_blend.params"),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }
}
