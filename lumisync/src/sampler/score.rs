use glam::Vec3;

use crate::color::{hue, luma, saturation, smoothstep, CHANNEL_MAX};

const SATURATION_MIDPOINT: f32 = 0.35;
const SATURATION_STEEPNESS: f32 = 10.0;
const BRIGHTNESS_GATE: (f32, f32) = (0.06, 0.35);
const WARM_BIAS: f32 = 0.1;

/// Base weight every sample gets, so gray and dark regions still average
/// to their own color instead of to nothing.
pub const SALIENCY_FLOOR: f32 = 0.05;

/// Perceptual importance of a pixel, roughly in `[0, 1.1]`.
///
/// Rises with saturation along a sigmoid and is gated by brightness so
/// near-black pixels do not count as vivid. Warm hues get a small bonus.
#[inline]
pub fn saliency(color: Vec3) -> f32 {
    let sat = saturation(color);
    let value = color.max_element() / CHANNEL_MAX;
    let brightness = 0.5 * luma(color) / CHANNEL_MAX + 0.5 * value;

    let sat_response = 1.0 / (1.0 + (-SATURATION_STEEPNESS * (sat - SATURATION_MIDPOINT)).exp());
    let gate = smoothstep(BRIGHTNESS_GATE.0, BRIGHTNESS_GATE.1, brightness);

    let h = hue(color);
    let warm = if h < 60.0 || h >= 300.0 {
        1.0 + WARM_BIAS * sat
    } else {
        1.0
    };

    sat_response * gate * warm
}

/// Accumulation weight of a sample at normalized radial distance `radial`.
#[inline]
pub fn sample_weight(saliency: f32, radial: f32, radial_weight: f32) -> f32 {
    (SALIENCY_FLOOR + saliency) * (1.0 + radial_weight * radial)
}
