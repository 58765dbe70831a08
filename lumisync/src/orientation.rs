//! Physical LED order, spike suppression and LED count fitting.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::color::Rgb8;
use crate::geometry::ZoneConfig;

const OUTLIER_DISTANCE: f32 = 80.0;
const NEIGHBOUR_AGREEMENT: f32 = 30.0;

/// Winding direction of the strip relative to zone order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum_macros::Display,
)]
pub enum Orientation {
    /// Strip runs in zone order: left (up), top, right (down), bottom.
    #[default]
    Standard,
    /// Strip starts at the bottom of the right edge and runs the other way.
    Reverse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrientationMapper {
    orientation: Orientation,
    zones: ZoneConfig,
    led_count: usize,
}

impl OrientationMapper {
    pub fn new(orientation: Orientation, zones: ZoneConfig, led_count: usize) -> Self {
        Self {
            orientation,
            zones,
            led_count,
        }
    }

    pub fn led_count(&self) -> usize {
        self.led_count
    }

    /// Zone colors to exactly `led_count` colors in strip order.
    pub fn map(&self, colors: &[Rgb8]) -> Vec<Rgb8> {
        let mut leds = colors.to_vec();
        reorder(&mut leds, self.orientation, &self.zones);
        suppress_outliers(&mut leds);
        leds.resize(self.led_count, Rgb8::BLACK);
        leds
    }
}

pub fn reorder(colors: &mut [Rgb8], orientation: Orientation, zones: &ZoneConfig) {
    match orientation {
        Orientation::Standard => {}
        Orientation::Reverse => {
            colors.reverse();
            // reversal leaves the bottom run at the front
            let bottom = zones.bottom.min(colors.len());
            colors.rotate_left(bottom);
        }
    }
}

/// Blends isolated spikes halfway toward their neighbours.
///
/// A color is a spike when it is far from both neighbours while the
/// neighbours agree with each other. Decisions use the unmodified input.
pub fn suppress_outliers(colors: &mut [Rgb8]) {
    if colors.len() < 3 {
        return;
    }
    let snapshot: Vec<Vec3> = colors.iter().map(|c| c.to_vec3()).collect();

    for i in 1..snapshot.len() - 1 {
        let prev = snapshot[i - 1];
        let current = snapshot[i];
        let next = snapshot[i + 1];

        if current.distance(prev) > OUTLIER_DISTANCE
            && current.distance(next) > OUTLIER_DISTANCE
            && prev.distance(next) < NEIGHBOUR_AGREEMENT
        {
            let neighbours = (prev + next) * 0.5;
            colors[i] = Rgb8::from_vec3(current.lerp(neighbours, 0.5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(n: usize) -> Vec<Rgb8> {
        (0..n).map(|i| Rgb8::new(i as u8, 0, 0)).collect()
    }

    #[test]
    fn standard_keeps_zone_order() {
        let mut colors = indexed(6);
        reorder(&mut colors, Orientation::Standard, &ZoneConfig::new(1, 2, 1, 2));
        assert_eq!(colors, indexed(6));
    }

    #[test]
    fn reverse_moves_bottom_run_to_the_back() {
        // left 0, top 1..3, right 3, bottom 4..6
        let mut colors = indexed(6);
        reorder(&mut colors, Orientation::Reverse, &ZoneConfig::new(1, 2, 1, 2));
        let order: Vec<u8> = colors.iter().map(|c| c.r).collect();
        assert_eq!(order, vec![3, 2, 1, 0, 5, 4]);
    }

    #[test]
    fn reverse_without_bottom_is_a_plain_reversal() {
        let zones = ZoneConfig::new(2, 3, 2, 0);
        let mut colors = indexed(7);
        reorder(&mut colors, Orientation::Reverse, &zones);
        let order: Vec<u8> = colors.iter().map(|c| c.r).collect();
        assert_eq!(order, vec![6, 5, 4, 3, 2, 1, 0]);

        // bottom count larger than the data must not panic
        let mut short = indexed(2);
        reorder(&mut short, Orientation::Reverse, &ZoneConfig::new(0, 0, 0, 5));
        let mut empty: Vec<Rgb8> = Vec::new();
        reorder(&mut empty, Orientation::Reverse, &zones);
    }

    #[test]
    fn isolated_spike_is_halved() {
        let gray = Rgb8::new(100, 100, 100);
        let mut colors = vec![gray, gray, Rgb8::new(255, 255, 255), gray, gray];
        suppress_outliers(&mut colors);
        assert_eq!(colors[2], Rgb8::new(178, 178, 178));
        assert_eq!(colors[1], gray);
    }

    #[test]
    fn hard_seam_is_left_alone() {
        let red = Rgb8::new(255, 0, 0);
        let blue = Rgb8::new(0, 0, 255);
        let mut colors = vec![red, red, red, blue, blue, blue];
        let before = colors.clone();
        suppress_outliers(&mut colors);
        assert_eq!(colors, before);
    }

    #[test]
    fn ends_are_never_touched() {
        let gray = Rgb8::new(50, 50, 50);
        let mut colors = vec![Rgb8::WHITE, gray, gray, Rgb8::WHITE];
        suppress_outliers(&mut colors);
        assert_eq!(colors[0], Rgb8::WHITE);
        assert_eq!(colors[3], Rgb8::WHITE);
    }

    #[test]
    fn mapper_pads_and_truncates() {
        let zones = ZoneConfig::new(1, 1, 1, 0);
        let colors = vec![Rgb8::new(10, 0, 0); 3];

        let padded = OrientationMapper::new(Orientation::Standard, zones, 5).map(&colors);
        assert_eq!(padded.len(), 5);
        assert_eq!(padded[4], Rgb8::BLACK);

        let truncated = OrientationMapper::new(Orientation::Standard, zones, 2).map(&colors);
        assert_eq!(truncated, vec![Rgb8::new(10, 0, 0); 2]);
    }
}
