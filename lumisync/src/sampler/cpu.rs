use rayon::prelude::*;

use crate::frame::FrameView;
use crate::geometry::ZoneGeometry;
use crate::sampler::score::{sample_weight, saliency};
use crate::sampler::{Accumulator, SaliencySampler};

// Sampled rows per parallel band. Fixed so the merge order, and therefore
// the floating point result, does not depend on the thread count.
const BAND_ROWS: usize = 16;

/// Scans every `step`-th pixel of every `step`-th row.
#[derive(Debug, Clone)]
pub struct PixelSampler {
    step: u32,
    radial_weight: f32,
}

impl PixelSampler {
    pub fn new(step: u32, radial_weight: f32) -> Self {
        Self {
            step: step.max(1),
            radial_weight: radial_weight.max(0.0),
        }
    }
}

impl Default for PixelSampler {
    fn default() -> Self {
        Self::new(2, 0.35)
    }
}

impl SaliencySampler for PixelSampler {
    fn name(&self) -> &'static str {
        "pixel"
    }

    fn sample(&mut self, frame: &FrameView<'_>, geometry: &ZoneGeometry, out: &mut [Accumulator]) {
        let zones = geometry.total_zones().min(out.len());
        if zones == 0 {
            return;
        }

        let step = self.step as usize;
        let radial_weight = self.radial_weight;
        let width = frame.width();
        let rows: Vec<u32> = (0..frame.height()).step_by(step).collect();

        let bands: Vec<Vec<Accumulator>> = rows
            .par_chunks(BAND_ROWS)
            .map(|band| {
                let mut acc = vec![Accumulator::default(); zones];
                for &y in band {
                    for x in (0..width).step_by(step) {
                        let Some(zone) = geometry.zone_at(x, y) else {
                            continue;
                        };
                        if zone >= zones {
                            continue;
                        }
                        let color = frame.pixel(x, y);
                        let s = saliency(color);
                        let r = geometry.radial_factor(x as f32 + 0.5, y as f32 + 0.5);
                        acc[zone].add_sample(color, sample_weight(s, r, radial_weight), s);
                    }
                }
                acc
            })
            .collect();

        for band in &bands {
            for (dst, src) in out.iter_mut().zip(band) {
                dst.merge(src);
            }
        }
    }
}
