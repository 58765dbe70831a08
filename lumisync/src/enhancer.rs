//! Turns filtered zone colors into display-ready LED colors.
//!
//! The stage order is fixed: contrast, adaptive saturation, calibration,
//! soft clip, gamma, brightness. Channels are never hard-clamped before
//! gamma; the soft knee keeps hue intact for overdriven colors.

use glam::Vec3;

use crate::color::{lerp, luma, saturation, scale_chroma, smoothstep, CHANNEL_MAX};

const SOFT_CLIP_KNEE: f32 = 0.8 * CHANNEL_MAX;
const SATURATION_BOOST: f32 = 0.5;
const FEEDBACK_ALPHA: f32 = 0.05;
const FEEDBACK_MAX_REDUCTION: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancerSettings {
    /// Per-channel white balance gains.
    pub calibration: Vec3,
    pub gamma: f32,
    pub saturation: f32,
    pub brightness: f32,
    /// Strength of the luma S-curve, 0 disables it.
    pub contrast: f32,
    pub adaptive_brightness: bool,
}

impl Default for EnhancerSettings {
    fn default() -> Self {
        Self {
            calibration: Vec3::ONE,
            gamma: 2.2,
            saturation: 1.0,
            brightness: 1.0,
            contrast: 0.25,
            adaptive_brightness: false,
        }
    }
}

/// Slow average of scene luma used to dim very bright scenes a little.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LumaFeedback {
    average: Option<f32>,
}

impl LumaFeedback {
    /// Folds in the mean normalized luma of this frame.
    pub fn update(&mut self, mean_luma: f32) {
        let mean_luma = mean_luma.clamp(0.0, 1.0);
        self.average = Some(match self.average {
            Some(avg) => lerp(avg, mean_luma, FEEDBACK_ALPHA),
            None => mean_luma,
        });
    }

    pub fn average(&self) -> f32 {
        self.average.unwrap_or(0.0)
    }

    /// Brightness multiplier in `[0.85, 1]`.
    pub fn factor(&self) -> f32 {
        1.0 - FEEDBACK_MAX_REDUCTION * smoothstep(0.6, 0.95, self.average())
    }
}

#[derive(Debug, Clone)]
pub struct ColorEnhancer {
    settings: EnhancerSettings,
    feedback: LumaFeedback,
}

impl ColorEnhancer {
    pub fn new(settings: EnhancerSettings) -> Self {
        Self {
            settings,
            feedback: LumaFeedback::default(),
        }
    }

    pub fn settings(&self) -> &EnhancerSettings {
        &self.settings
    }

    pub fn feedback(&self) -> &LumaFeedback {
        &self.feedback
    }

    /// Enhances every zone of a frame, updating the luma feedback first.
    pub fn run(&mut self, estimates: &[Vec3], out: &mut [Vec3]) {
        if self.settings.adaptive_brightness && !estimates.is_empty() {
            let mean = estimates.iter().map(|&c| luma(c)).sum::<f32>()
                / (estimates.len() as f32 * CHANNEL_MAX);
            self.feedback.update(mean);
        }

        let brightness = self.brightness();
        for (estimate, out) in estimates.iter().zip(out.iter_mut()) {
            *out = self.enhance(*estimate, brightness);
        }
    }

    /// Effective brightness including scene feedback.
    pub fn brightness(&self) -> f32 {
        if self.settings.adaptive_brightness {
            self.settings.brightness * self.feedback.factor()
        } else {
            self.settings.brightness
        }
    }

    pub fn enhance(&self, color: Vec3, brightness: f32) -> Vec3 {
        let s = &self.settings;
        let color = sanitize(color);
        let color = contrast(color, s.contrast);
        let color = adaptive_saturation(color, s.saturation);
        let color = color * s.calibration;
        let color = soft_clip(color);
        let color = gamma(color, s.gamma);
        scale_brightness(color, brightness)
    }
}

fn sanitize(color: Vec3) -> Vec3 {
    if color.is_finite() {
        color.max(Vec3::ZERO)
    } else {
        Vec3::ZERO
    }
}

/// S-curve on luma around mid-gray, applied as a uniform channel scale.
fn contrast(color: Vec3, strength: f32) -> Vec3 {
    let l = luma(color) / CHANNEL_MAX;
    if l <= 1e-4 || strength <= 0.0 {
        return color;
    }
    let x = l.min(1.0);
    let curved = x * x * (3.0 - 2.0 * x);
    let target = lerp(x, curved, strength);
    color * (target / x)
}

/// Low-saturation colors are pushed harder than already vivid ones.
fn adaptive_saturation(color: Vec3, setting: f32) -> Vec3 {
    let factor = setting * (1.0 + SATURATION_BOOST * (1.0 - saturation(color)));
    scale_chroma(color, factor.max(0.0))
}

/// Exponential knee above 80 % that approaches but never reaches full scale.
fn soft_clip(color: Vec3) -> Vec3 {
    let headroom = CHANNEL_MAX - SOFT_CLIP_KNEE;
    let clip = |c: f32| {
        if c <= SOFT_CLIP_KNEE {
            c.max(0.0)
        } else {
            SOFT_CLIP_KNEE + headroom * (1.0 - (-(c - SOFT_CLIP_KNEE) / headroom).exp())
        }
    };
    Vec3::new(clip(color.x), clip(color.y), clip(color.z))
}

fn gamma(color: Vec3, gamma: f32) -> Vec3 {
    let normalized = (color / CHANNEL_MAX).clamp(Vec3::ZERO, Vec3::ONE);
    normalized.powf(gamma) * CHANNEL_MAX
}

/// Same factor on all channels, capped so the brightest channel lands at 255.
pub fn scale_brightness(color: Vec3, brightness: f32) -> Vec3 {
    let max = color.max_element();
    if max <= 0.0 {
        return Vec3::ZERO;
    }
    let factor = brightness.max(0.0).min(CHANNEL_MAX / max);
    color * factor
}
