use std::sync::Arc;

use futures::channel::oneshot;
use thiserror::Error;

use crate::TILE_TEXTURE_FORMAT;

#[derive(Debug, Clone, Error)]
pub enum GpuError {
    #[error("no suitable wgpu adapter: {0}")]
    Adapter(String),
    #[error("wgpu device request failed: {0}")]
    Device(String),
    #[error("submitted gpu work was abandoned before completion")]
    WorkAbandoned,
    #[error("readback buffer mapping failed: {0}")]
    Map(String),
}

/// Device and queue shared by every GPU stage of a surface.
#[derive(Debug)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Requests an adapter without a presentation surface.
    pub async fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|error| GpuError::Adapter(error.to_string()))?;
        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "gpu adapter acquired");
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("renderer.headless_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|error| GpuError::Device(error.to_string()))?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    pub(crate) fn create_tile_texture(&self, tile_size: u32, label: &str) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: tile_size,
                height: tile_size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TILE_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    /// Resolves once everything submitted so far has finished on the GPU.
    ///
    /// The blocking device poll runs on the rayon pool so the awaiting task
    /// never blocks its executor.
    pub(crate) async fn submitted_work_done(self: &Arc<Self>) -> Result<(), GpuError> {
        let (sender, receiver) = oneshot::channel();
        self.queue.on_submitted_work_done(move || {
            let _ = sender.send(());
        });
        self.poll_in_background();
        receiver.await.map_err(|_| GpuError::WorkAbandoned)
    }

    /// Copies an RGBA8 texture into tightly packed rows.
    pub(crate) async fn read_texture_rgba8(
        self: &Arc<Self>,
        buffer: wgpu::Buffer,
        width: u32,
        height: u32,
        padded_bytes_per_row: u32,
    ) -> Result<Vec<u8>, GpuError> {
        let (sender, receiver) = oneshot::channel();
        buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        self.poll_in_background();
        receiver
            .await
            .map_err(|_| GpuError::WorkAbandoned)?
            .map_err(|error| GpuError::Map(error.to_string()))?;

        let unpadded_bytes_per_row = width as usize * 4;
        let mut pixels = Vec::with_capacity(unpadded_bytes_per_row * height as usize);
        {
            let mapped = buffer.slice(..).get_mapped_range();
            for row in mapped.chunks(padded_bytes_per_row as usize).take(height as usize) {
                pixels.extend_from_slice(&row[..unpadded_bytes_per_row]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }

    fn poll_in_background(self: &Arc<Self>) {
        let context = Arc::clone(self);
        rayon::spawn(move || {
            if let Err(error) = context.device.poll(wgpu::PollType::wait_indefinitely()) {
                tracing::error!(?error, "device poll failed");
            }
        });
    }
}

/// Row pitch wgpu requires for texture-to-buffer copies.
pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let alignment = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(alignment) * alignment
}
