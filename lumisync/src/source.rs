//! Procedural per-zone color sources.
//!
//! A source renders one color per zone for a point in time. Its output takes
//! the same smoothing, orientation and transmission path as captured frames,
//! so sources stay stateless: the same time always renders the same colors.

use std::f32::consts::TAU;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::{hsv_to_rgb, Rgb8};

const DEFAULT_CYCLE_MS: u64 = 12_000;
const DEFAULT_BREATH_MS: u64 = 4_000;
/// Breathing never fades fully to black.
const BREATH_FLOOR: f32 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, strum_macros::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColorSource {
    /// All LEDs off.
    #[default]
    Off,
    /// One static color on every zone.
    Solid { color: Rgb8 },
    /// Hue wheel spread around the ring, rotating once per `cycle_ms`.
    Rainbow {
        cycle_ms: u64,
        /// Fraction of the hue wheel visible at once.
        spread: f32,
    },
    /// A single color pulsing on a cosine curve.
    Breathing { color: Rgb8, period_ms: u64 },
}

impl ColorSource {
    pub fn rainbow() -> Self {
        ColorSource::Rainbow {
            cycle_ms: DEFAULT_CYCLE_MS,
            spread: 1.0,
        }
    }

    pub fn breathing(color: Rgb8) -> Self {
        ColorSource::Breathing {
            color,
            period_ms: DEFAULT_BREATH_MS,
        }
    }

    /// Renders `zones` colors in zone order for `time` since start.
    pub fn render(&self, zones: usize, time: Duration) -> Vec<Rgb8> {
        match *self {
            ColorSource::Off => vec![Rgb8::BLACK; zones],
            ColorSource::Solid { color } => vec![color; zones],
            ColorSource::Rainbow { cycle_ms, spread } => {
                let base = cycle_progress(time, cycle_ms) * 360.0;
                let spread = if spread.is_finite() { spread } else { 1.0 };
                (0..zones)
                    .map(|i| {
                        let offset = spread * 360.0 * i as f32 / zones as f32;
                        Rgb8::from_vec3(hsv_to_rgb(base + offset, 1.0, 1.0))
                    })
                    .collect()
            }
            ColorSource::Breathing { color, period_ms } => {
                let phase = cycle_progress(time, period_ms);
                let level = 0.5 - 0.5 * (phase * TAU).cos();
                let level = BREATH_FLOOR + (1.0 - BREATH_FLOOR) * level;
                vec![Rgb8::from_vec3(color.to_vec3() * level); zones]
            }
        }
    }
}

/// Position within a cycle in `[0, 1)`.
fn cycle_progress(time: Duration, cycle_ms: u64) -> f32 {
    let cycle = cycle_ms.max(1) as u128;
    (time.as_millis() % cycle) as f32 / cycle as f32
}
