//! Color primitives shared by every stage.
//!
//! Working colors are `glam::Vec3` in the 0..=255 range per channel so that
//! intermediate results may overshoot without wrapping. [`Rgb8`] is the
//! quantized form sent to the device.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Rec. 709 luma coefficients.
pub const LUMA_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

pub const CHANNEL_MAX: f32 = 255.0;

/// An 8-bit RGB triple, laid out exactly as on the wire.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const BLACK: Rgb8 = Rgb8::new(0, 0, 0);
    pub const WHITE: Rgb8 = Rgb8::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Creates a color from a `0xRRGGBB` value.
    pub const fn from_u32(color: u32) -> Self {
        Self {
            r: ((color >> 16) & 0xFF) as u8,
            g: ((color >> 8) & 0xFF) as u8,
            b: (color & 0xFF) as u8,
        }
    }

    /// Parses `RRGGBB` or `#RRGGBB`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(Self::from_u32)
    }

    /// Rounds and clamps each channel into the byte range. NaN maps to 0.
    pub fn from_vec3(color: Vec3) -> Self {
        Self {
            r: channel_to_u8(color.x),
            g: channel_to_u8(color.y),
            b: channel_to_u8(color.z),
        }
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.r as f32, self.g as f32, self.b as f32)
    }
}

#[inline]
pub fn channel_to_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, CHANNEL_MAX) as u8
}

/// Luma in the same 0..=255 scale as the input.
#[inline]
pub fn luma(color: Vec3) -> f32 {
    color.dot(LUMA_WEIGHTS)
}

/// HSV saturation in `[0, 1]`.
#[inline]
pub fn saturation(color: Vec3) -> f32 {
    let max = color.max_element();
    if max <= f32::EPSILON {
        return 0.0;
    }
    ((max - color.min_element()) / max).clamp(0.0, 1.0)
}

/// Hue in degrees `[0, 360)`; 0 for achromatic colors.
pub fn hue(color: Vec3) -> f32 {
    let max = color.max_element();
    let min = color.min_element();
    let delta = max - min;
    if delta <= f32::EPSILON {
        return 0.0;
    }

    let h = if max == color.x {
        ((color.y - color.z) / delta).rem_euclid(6.0)
    } else if max == color.y {
        (color.z - color.x) / delta + 2.0
    } else {
        (color.x - color.y) / delta + 4.0
    };
    (h * 60.0).rem_euclid(360.0)
}

/// Converts hue (degrees), saturation and value (`[0, 1]`) to a 0..=255 color.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Vec3 {
    let h = hue.rem_euclid(360.0) / 60.0;
    let s = saturation.clamp(0.0, 1.0);
    let v = value.clamp(0.0, 1.0);

    let c = v * s;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (Vec3::new(r, g, b) + m) * CHANNEL_MAX
}

/// Scales chroma around luma. Negative channels are clipped to zero.
#[inline]
pub fn scale_chroma(color: Vec3, factor: f32) -> Vec3 {
    let l = luma(color);
    (Vec3::splat(l) + (color - l) * factor).max(Vec3::ZERO)
}

/// Euclidean distance in RGB space.
#[inline]
pub fn distance(a: Vec3, b: Vec3) -> f32 {
    a.distance(b)
}

/// Hermite smoothstep; returns 0 below `edge0` and 1 above `edge1`.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
