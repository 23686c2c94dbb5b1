use std::path::{Path, PathBuf};

use thiserror::Error;

pub const BLEND_UNIFORM_PROGRAM: &str = "dab_blend_uniform.wgsl";
pub const BLEND_INSTANCED_PROGRAM: &str = "dab_blend_instanced.wgsl";
pub const PRESENT_PROGRAM: &str = "tile_present.wgsl";

#[derive(Debug, Clone, Error)]
pub enum ShaderLoadError {
    #[error("read shader program {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("parse shader program {name}:\n{message}")]
    Parse { name: &'static str, message: String },
    #[error("validate shader program {name}:\n{message}")]
    Validation { name: &'static str, message: String },
}

/// WGSL source that parsed and validated.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    name: &'static str,
    source: String,
}

impl ShaderProgram {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn create_module(&self, device: &wgpu::Device) -> wgpu::ShaderModule {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.name),
            source: wgpu::ShaderSource::Wgsl(self.source.as_str().into()),
        })
    }
}

/// Reads `name` from `dir` and checks it with naga before any pipeline sees it,
/// so a broken program surfaces as an error instead of a device fault.
pub fn load_program(dir: &Path, name: &'static str) -> Result<ShaderProgram, ShaderLoadError> {
    let path = dir.join(name);
    let source = std::fs::read_to_string(&path).map_err(|error| ShaderLoadError::Io {
        path: path.clone(),
        message: error.to_string(),
    })?;
    let module =
        naga::front::wgsl::parse_str(&source).map_err(|error| ShaderLoadError::Parse {
            name,
            message: error.emit_to_string(&source),
        })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|error| ShaderLoadError::Validation {
        name,
        message: error.emit_to_string(&source),
    })?;
    Ok(ShaderProgram { name, source })
}
