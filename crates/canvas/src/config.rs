use std::fmt;
use std::path::{Path, PathBuf};

use renderer::{BlendBackendKind, BlendSettings, default_shader_dir, srgb_u8_to_srgb_f32};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiles::{DEFAULT_TILE_SIZE, TileGrid, TileGridError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read surface config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse surface config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid tile size: {0}")]
    TileSize(#[from] TileGridError),
    #[error("hardness {0} is outside [0, 1]")]
    Hardness(f32),
}

/// Opaque paper color, written as `#RRGGBB` in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PaperColor {
    pub const DEFAULT: PaperColor = PaperColor {
        r: 0xF4,
        g: 0xF3,
        b: 0xEF,
    };

    pub fn srgb(self) -> [f32; 4] {
        srgb_u8_to_srgb_f32(self.r, self.g, self.b, 1.0)
    }
}

impl Default for PaperColor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<String> for PaperColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value.strip_prefix('#').unwrap_or(&value);
        if hex.len() != 6 || !hex.chars().all(|digit| digit.is_ascii_hexdigit()) {
            return Err(format!("paper color {value:?} is not #RRGGBB"));
        }
        let channel = |index: usize| {
            u8::from_str_radix(&hex[index..index + 2], 16)
                .map_err(|error| format!("paper color {value:?}: {error}"))
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl From<PaperColor> for String {
    fn from(color: PaperColor) -> Self {
        color.to_string()
    }
}

impl fmt::Display for PaperColor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Construction-time settings of a [`crate::TileSurface`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfig {
    pub tile_size: u32,
    pub backend: BlendBackendKind,
    pub hardness: f32,
    pub paper_color: PaperColor,
    pub shader_dir: PathBuf,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            backend: BlendBackendKind::default(),
            hardness: 1.0,
            paper_color: PaperColor::DEFAULT,
            shader_dir: default_shader_dir(),
        }
    }
}

impl SurfaceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SurfaceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        TileGrid::new(self.tile_size)?;
        if !(0.0..=1.0).contains(&self.hardness) {
            return Err(ConfigError::Hardness(self.hardness));
        }
        Ok(())
    }

    pub fn blend_settings(&self) -> BlendSettings {
        BlendSettings {
            tile_size: self.tile_size,
            hardness: self.hardness,
            paper_color: self.paper_color.srgb(),
        }
    }
}
