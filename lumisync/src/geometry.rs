//! Perimeter zones and their angular sectors around the sampling origin.
//!
//! Boundary points are placed along the capture rectangle walking clockwise
//! (on screen) from the bottom-left corner: up the left edge, along the top,
//! down the right edge and back along the bottom. Every LED owns the sector
//! between its boundary point and the next one.

use std::f32::consts::TAU;
use std::ops::Range;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

const GOLDEN_RATIO: f32 = 1.618_034;
const MANUAL_ORIGIN_MIN: f32 = 0.05;
const MANUAL_ORIGIN_MAX: f32 = 0.95;

/// Screen edges in zone order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Edge {
    Left,
    Top,
    Right,
    Bottom,
}

impl Edge {
    fn index(self) -> usize {
        self as usize
    }
}

/// LED counts per screen edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub left: usize,
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            left: 20,
            top: 60,
            right: 20,
            bottom: 0,
        }
    }
}

impl ZoneConfig {
    pub const fn new(left: usize, top: usize, right: usize, bottom: usize) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn total(&self) -> usize {
        self.left + self.top + self.right + self.bottom
    }

    pub fn count(&self, edge: Edge) -> usize {
        self.counts()[edge.index()]
    }

    /// Counts in zone order: left, top, right, bottom.
    pub fn counts(&self) -> [usize; 4] {
        [self.left, self.top, self.right, self.bottom]
    }

    /// Zone indices belonging to `edge`.
    pub fn edge_range(&self, edge: Edge) -> Range<usize> {
        let counts = self.counts();
        let start: usize = counts[..edge.index()].iter().sum();
        start..start + counts[edge.index()]
    }

    pub fn empty_edges(&self) -> usize {
        Edge::iter().filter(|&edge| self.count(edge) == 0).count()
    }
}

/// Vertical position of the sampling origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum OriginMode {
    /// Golden-ratio point away from a single missing edge, center otherwise.
    #[default]
    Auto,
    /// Normalized position measured from the top.
    Manual(f32),
}

impl OriginMode {
    /// Normalized origin y for the given layout.
    pub fn resolve(&self, zones: &ZoneConfig) -> f32 {
        match *self {
            OriginMode::Manual(y) if y.is_finite() => y.clamp(MANUAL_ORIGIN_MIN, MANUAL_ORIGIN_MAX),
            OriginMode::Manual(_) => 0.5,
            OriginMode::Auto => {
                if zones.empty_edges() != 1 {
                    return 0.5;
                }
                if zones.bottom == 0 {
                    1.0 / (GOLDEN_RATIO * GOLDEN_RATIO)
                } else if zones.top == 0 {
                    1.0 / GOLDEN_RATIO
                } else {
                    0.5
                }
            }
        }
    }
}

/// Sector layout for one zone configuration and capture size.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneGeometry {
    zones: ZoneConfig,
    width: u32,
    height: u32,
    origin: Vec2,
    origin_y: f32,
    points: Vec<Vec2>,
    // boundary angles, strictly non-decreasing, one more than the zone count
    angles: Vec<f32>,
    max_radius: f32,
}

impl ZoneGeometry {
    pub fn new(zones: ZoneConfig, origin_y: f32, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        let origin = Vec2::new(w * 0.5, origin_y * h);

        let points = boundary_points(&zones, w, h);
        let mut angles = Vec::with_capacity(points.len() + 1);
        for point in &points {
            let d = *point - origin;
            let mut angle = d.y.atan2(d.x);
            if let Some(&prev) = angles.last() {
                while angle < prev {
                    angle += TAU;
                }
            }
            angles.push(angle);
        }
        if let Some(&first) = angles.first() {
            angles.push(first + TAU);
        }

        let max_radius = [
            Vec2::ZERO,
            Vec2::new(w, 0.0),
            Vec2::new(0.0, h),
            Vec2::new(w, h),
        ]
        .iter()
        .map(|corner| corner.distance(origin))
        .fold(0.0f32, f32::max);

        Self {
            zones,
            width,
            height,
            origin,
            origin_y,
            points,
            angles,
            max_radius,
        }
    }

    /// Whether this geometry was built for the given inputs.
    pub fn matches(&self, zones: &ZoneConfig, origin_y: f32, width: u32, height: u32) -> bool {
        self.zones == *zones
            && self.origin_y.to_bits() == origin_y.to_bits()
            && self.width == width
            && self.height == height
    }

    pub fn zones(&self) -> &ZoneConfig {
        &self.zones
    }

    pub fn total_zones(&self) -> usize {
        self.points.len()
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn boundary_points(&self) -> &[Vec2] {
        &self.points
    }

    /// Sector boundaries; sector `i` spans `[angles[i], angles[i + 1])`.
    pub fn boundary_angles(&self) -> &[f32] {
        &self.angles
    }

    /// Sector containing `angle` (radians, any winding).
    pub fn zone_for_angle(&self, angle: f32) -> Option<usize> {
        let count = self.total_zones();
        if count == 0 || !angle.is_finite() {
            return None;
        }

        let first = self.angles[0];
        let t = first + (angle - first).rem_euclid(TAU);
        let idx = self.angles.partition_point(|&a| a <= t);
        Some(idx.saturating_sub(1).min(count - 1))
    }

    /// Sector containing the point `(x, y)` in capture coordinates.
    #[inline]
    pub fn zone_at_point(&self, x: f32, y: f32) -> Option<usize> {
        let d = Vec2::new(x, y) - self.origin;
        self.zone_for_angle(d.y.atan2(d.x))
    }

    /// Sector containing the center of pixel `(x, y)`.
    #[inline]
    pub fn zone_at(&self, x: u32, y: u32) -> Option<usize> {
        self.zone_at_point(x as f32 + 0.5, y as f32 + 0.5)
    }

    /// Distance from the origin relative to the farthest corner, in `[0, 1]`.
    #[inline]
    pub fn radial_factor(&self, x: f32, y: f32) -> f32 {
        if self.max_radius <= f32::EPSILON {
            return 0.0;
        }
        (Vec2::new(x, y).distance(self.origin) / self.max_radius).min(1.0)
    }
}

// Perimeter parameter of each edge's start, walking clockwise from bottom-left.
fn edge_spans(w: f32, h: f32) -> [(f32, f32); 4] {
    [(0.0, h), (h, w), (h + w, h), (2.0 * h + w, w)]
}

fn perimeter_point(s: f32, w: f32, h: f32) -> Vec2 {
    let perimeter = 2.0 * (w + h);
    let s = s.rem_euclid(perimeter);
    if s < h {
        Vec2::new(0.0, h - s)
    } else if s < h + w {
        Vec2::new(s - h, 0.0)
    } else if s < 2.0 * h + w {
        Vec2::new(w, s - h - w)
    } else {
        Vec2::new(w - (s - 2.0 * h - w), h)
    }
}

fn boundary_points(zones: &ZoneConfig, w: f32, h: f32) -> Vec<Vec2> {
    let counts = zones.counts();
    let spans = edge_spans(w, h);
    let mut points = Vec::with_capacity(zones.total());

    for (i, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }

        let (start, len) = spans[i];

        // empty edges before and after this one collapse into a junction
        // at the middle of their combined span
        let mut gap_before = 0.0;
        let mut j = (i + 3) % 4;
        while counts[j] == 0 && j != i {
            gap_before += spans[j].1;
            j = (j + 3) % 4;
        }
        let mut gap_after = 0.0;
        let mut k = (i + 1) % 4;
        while counts[k] == 0 && k != i {
            gap_after += spans[k].1;
            k = (k + 1) % 4;
        }

        let from = start - gap_before * 0.5;
        let to = start + len + gap_after * 0.5;
        for n in 0..count {
            let s = from + (to - from) * n as f32 / count as f32;
            points.push(perimeter_point(s, w, h));
        }
    }

    points
}
