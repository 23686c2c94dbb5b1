//! sRGB <-> linear conversions.
//!
//! Paper and brush colors arrive sRGB encoded; GPU tiles and blending work in
//! linear light; snapshot targets re-encode on write.

/// Standard piecewise sRGB decode for one channel.
#[inline]
pub fn srgb_to_linear(srgb: f32) -> f32 {
    if srgb <= 0.04045 {
        srgb / 12.92
    } else {
        ((srgb + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse of [`srgb_to_linear`].
#[inline]
pub fn linear_to_srgb(linear: f32) -> f32 {
    if linear <= 0.0031308 {
        linear * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

/// Converts RGB, alpha is already linear.
#[inline]
pub fn srgb_to_linear_rgba(srgb: [f32; 4]) -> [f32; 4] {
    [
        srgb_to_linear(srgb[0]),
        srgb_to_linear(srgb[1]),
        srgb_to_linear(srgb[2]),
        srgb[3],
    ]
}

#[inline]
pub fn srgb_u8_to_srgb_f32(r: u8, g: u8, b: u8, a: f32) -> [f32; 4] {
    [
        f32::from(r) / 255.0,
        f32::from(g) / 255.0,
        f32::from(b) / 255.0,
        a,
    ]
}

#[inline]
pub fn srgb_u8_to_linear(r: u8, g: u8, b: u8, a: f32) -> [f32; 4] {
    srgb_to_linear_rgba(srgb_u8_to_srgb_f32(r, g, b, a))
}

pub(crate) fn linear_to_skia_color(linear: [f32; 4]) -> Option<tiny_skia::Color> {
    tiny_skia::Color::from_rgba(
        linear_to_srgb(linear[0]).clamp(0.0, 1.0),
        linear_to_srgb(linear[1]).clamp(0.0, 1.0),
        linear_to_srgb(linear[2]).clamp(0.0, 1.0),
        linear[3],
    )
}

pub(crate) fn srgb_to_skia_color(srgb: [f32; 4]) -> Option<tiny_skia::Color> {
    tiny_skia::Color::from_rgba(srgb[0], srgb[1], srgb[2], srgb[3])
}

pub(crate) fn linear_to_wgpu_color(linear: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(linear[0]),
        g: f64::from(linear[1]),
        b: f64::from(linear[2]),
        a: f64::from(linear[3]),
    }
}
