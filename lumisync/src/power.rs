//! Global current limiting.

use serde::{Deserialize, Serialize};

use crate::color::{channel_to_u8, Rgb8, CHANNEL_MAX};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum_macros::Display,
)]
pub enum PowerMode {
    #[default]
    Off,
    /// Scale the whole frame when the average load is above the threshold.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerLimit {
    pub mode: PowerMode,
    /// Allowed load as a fraction of every channel at full scale.
    pub threshold: f32,
}

impl Default for PowerLimit {
    fn default() -> Self {
        Self {
            mode: PowerMode::Off,
            threshold: 0.8,
        }
    }
}

impl PowerLimit {
    /// Estimated load of a frame in `[0, 1]`.
    pub fn load(colors: &[Rgb8]) -> f32 {
        if colors.is_empty() {
            return 0.0;
        }
        let sum: u64 = colors
            .iter()
            .map(|c| c.r as u64 + c.g as u64 + c.b as u64)
            .sum();
        sum as f32 / (colors.len() as f32 * 3.0 * CHANNEL_MAX)
    }

    /// Scales `colors` in place when over the limit; returns the factor used.
    pub fn apply(&self, colors: &mut [Rgb8]) -> f32 {
        if self.mode == PowerMode::Off {
            return 1.0;
        }
        let load = Self::load(colors);
        let threshold = self.threshold.clamp(0.0, 1.0);
        if load <= threshold || load <= 0.0 {
            return 1.0;
        }

        let scale = threshold / load;
        for c in colors.iter_mut() {
            c.r = channel_to_u8(c.r as f32 * scale);
            c.g = channel_to_u8(c.g as f32 * scale);
            c.b = channel_to_u8(c.b as f32 * scale);
        }
        scale
    }
}
