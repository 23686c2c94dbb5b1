use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DabError {
    #[error("dab center ({x}, {y}) is not finite")]
    NonFiniteCenter { x: f32, y: f32 },
    #[error("dab radius {0} must be finite and greater than zero")]
    InvalidRadius(f32),
    #[error("dab color channel {channel} = {value} is outside [0, 1]")]
    ColorOutOfRange { channel: usize, value: f32 },
    #[error("dab at ({x}, {y}) with radius {radius} reaches past the addressable surface (±{limit})")]
    OutOfAddressableRange {
        x: f32,
        y: f32,
        radius: f32,
        limit: f32,
    },
    #[error("dab covers {tiles} tiles, more than the {limit} allowed per dab")]
    TooManyTiles { tiles: usize, limit: usize },
}

/// One circular ink deposit in surface space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dab {
    pub center: [f32; 2],
    pub radius: f32,
    /// Straight-alpha RGBA, every channel in `[0, 1]`.
    pub color: [f32; 4],
}

impl Dab {
    pub fn new(center: [f32; 2], radius: f32, color: [f32; 4]) -> Self {
        Self {
            center,
            radius,
            color,
        }
    }

    /// Rejects dabs the compositor cannot rasterize. Values are never clamped.
    /// Grid-dependent limits are checked by [`crate::TileGrid::route_dab`].
    pub fn validate(&self) -> Result<(), DabError> {
        let [x, y] = self.center;
        if !x.is_finite() || !y.is_finite() {
            return Err(DabError::NonFiniteCenter { x, y });
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(DabError::InvalidRadius(self.radius));
        }
        for (channel, value) in self.color.iter().copied().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(DabError::ColorOutOfRange { channel, value });
            }
        }
        Ok(())
    }
}

/// Replica of a dab queued against one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingDab {
    pub dab: Dab,
    pub tile_origin: [f32; 2],
}

impl PendingDab {
    pub fn local(&self) -> LocalDab {
        LocalDab {
            center: [
                self.dab.center[0] - self.tile_origin[0],
                self.dab.center[1] - self.tile_origin[1],
            ],
            radius: self.dab.radius,
            color: self.dab.color,
        }
    }
}

/// Dab expressed in the pixel space of the tile it targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalDab {
    pub center: [f32; 2],
    pub radius: f32,
    pub color: [f32; 4],
}
