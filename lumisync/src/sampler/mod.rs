//! Per-zone saliency sampling.
//!
//! A [`SaliencySampler`] reduces a frame to one [`Accumulator`] per zone.
//! Two interchangeable backends exist: [`PixelSampler`] scans pixels
//! directly, [`GridSampler`] first reduces the frame to a coarse
//! [`CellGrid`] (the same aggregate an accelerated capture path delivers)
//! and bins cells into zones. Downstream stages only ever see accumulators.

mod cpu;
mod grid;
mod score;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::frame::FrameView;
use crate::geometry::ZoneGeometry;

pub use cpu::PixelSampler;
pub use grid::{CellAggregate, CellGrid, GridSampler};
pub use score::{sample_weight, saliency, SALIENCY_FLOOR};

/// Raw statistics of one zone for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    pub color_sum: Vec3,
    pub total_weight: f32,
    pub peak_color: Vec3,
    /// Saliency of the peak sample.
    pub peak_weight: f32,
    pub saliency_sum: f32,
    pub saliency_sq_sum: f32,
    pub sample_count: u32,
}

impl Accumulator {
    #[inline]
    pub fn add_sample(&mut self, color: Vec3, weight: f32, saliency: f32) {
        self.color_sum += color * weight;
        self.total_weight += weight;
        self.saliency_sum += saliency;
        self.saliency_sq_sum += saliency * saliency;
        self.sample_count += 1;
        if saliency > self.peak_weight {
            self.peak_weight = saliency;
            self.peak_color = color;
        }
    }

    /// Folds `other` into `self`. On equal peaks the existing one is kept.
    pub fn merge(&mut self, other: &Accumulator) {
        self.color_sum += other.color_sum;
        self.total_weight += other.total_weight;
        self.saliency_sum += other.saliency_sum;
        self.saliency_sq_sum += other.saliency_sq_sum;
        self.sample_count += other.sample_count;
        if other.peak_weight > self.peak_weight {
            self.peak_weight = other.peak_weight;
            self.peak_color = other.peak_color;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0 || self.total_weight <= 0.0
    }

    /// Weighted average color, `None` when nothing was sampled.
    pub fn average(&self) -> Option<Vec3> {
        if self.total_weight > 0.0 && self.total_weight.is_finite() {
            Some(self.color_sum / self.total_weight)
        } else {
            None
        }
    }

    pub fn saliency_mean(&self) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.saliency_sum / self.sample_count as f32
    }

    pub fn saliency_variance(&self) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        let mean = self.saliency_mean();
        (self.saliency_sq_sum / self.sample_count as f32 - mean * mean).max(0.0)
    }
}

/// Reduces a frame to per-zone accumulators.
pub trait SaliencySampler: Send {
    fn name(&self) -> &'static str;

    /// Accumulates into `out`, which holds one entry per zone and is
    /// expected to be reset by the caller.
    fn sample(&mut self, frame: &FrameView<'_>, geometry: &ZoneGeometry, out: &mut [Accumulator]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display)]
pub enum SamplerBackend {
    #[default]
    Pixel,
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub backend: SamplerBackend,
    /// Pixel stride between samples in both directions.
    pub step: u32,
    /// Cell edge length in pixels for the grid backend.
    pub cell_size: u32,
    /// Extra weight given to pixels far from the origin.
    pub radial_weight: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            backend: SamplerBackend::Pixel,
            step: 2,
            cell_size: 16,
            radial_weight: 0.35,
        }
    }
}

impl SamplerConfig {
    pub fn build(&self) -> Box<dyn SaliencySampler> {
        match self.backend {
            SamplerBackend::Pixel => Box::new(PixelSampler::new(self.step, self.radial_weight)),
            SamplerBackend::Grid => Box::new(GridSampler::new(
                self.cell_size,
                self.step,
                self.radial_weight,
            )),
        }
    }
}
