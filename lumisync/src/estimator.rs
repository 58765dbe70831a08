//! Temporal accumulation and adaptive Kalman filtering per zone.
//!
//! Each frame the zone's raw average is compared with the filter's
//! prediction. The size of that residual drives three knobs at once: the
//! temporal blend factor, the process noise and the measurement noise. Large
//! jumps are followed within a frame or two, small jitter is smoothed away.

use glam::Vec3;

use crate::color::{distance, lerp, scale_chroma, smoothstep, CHANNEL_MAX};
use crate::sampler::Accumulator;
use crate::state::{TemporalStats, ZoneState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneEstimator {
    /// Residual range over which the filter parameters are interpolated.
    pub residual_low: f32,
    pub residual_high: f32,
    pub alpha: (f32, f32),
    pub process_noise: (f32, f32),
    /// Falls as the residual grows.
    pub measurement_noise: (f32, f32),
    /// Upper bound of the peak share in the measurement.
    pub peak_mix_cap: f32,
    pub peak_saturation_boost: f32,
}

impl Default for ZoneEstimator {
    fn default() -> Self {
        Self {
            residual_low: 6.0,
            residual_high: 60.0,
            alpha: (0.2, 0.85),
            process_noise: (0.5, 80.0),
            measurement_noise: (40.0, 2.0),
            peak_mix_cap: 0.85,
            peak_saturation_boost: 1.2,
        }
    }
}

impl ZoneEstimator {
    /// Runs every zone in order, writing filtered colors into `out`.
    pub fn run(&self, states: &mut [ZoneState], accumulators: &[Accumulator], out: &mut [Vec3]) {
        for ((state, acc), out) in states.iter_mut().zip(accumulators).zip(out.iter_mut()) {
            *out = self.update(state, acc);
        }
    }

    /// Folds one frame's statistics into `state` and returns the new estimate.
    pub fn update(&self, state: &mut ZoneState, acc: &Accumulator) -> Vec3 {
        let prediction = state.kalman.predict();
        let raw = acc
            .average()
            .unwrap_or(if state.temporal.primed { state.temporal.color } else { Vec3::ZERO });

        let residual = if state.kalman.is_initialized() {
            distance(raw, prediction)
        } else {
            self.residual_high
        };
        let t = ((residual - self.residual_low) / (self.residual_high - self.residual_low))
            .clamp(0.0, 1.0);

        let alpha = lerp(self.alpha.0, self.alpha.1, t);
        let q = lerp(self.process_noise.0, self.process_noise.1, t);
        let r = lerp(self.measurement_noise.0, self.measurement_noise.1, t);

        blend_temporal(&mut state.temporal, acc, alpha);
        let measurement = self.measurement(&state.temporal);
        let estimate = state.kalman.update(measurement, q, r);

        state.change = distance(estimate, state.last_output);
        state.last_output = estimate;
        estimate
    }

    /// Average color, shifted toward the peak in scenes with uneven saliency.
    fn measurement(&self, temporal: &TemporalStats) -> Vec3 {
        if !temporal.primed {
            return Vec3::ZERO;
        }

        let mix = smoothstep(0.25, 1.25, temporal.saliency_cv())
            * self.peak_mix_cap
            * smoothstep(0.1, 0.5, temporal.peak_weight);
        if mix <= 0.0 {
            return temporal.color;
        }

        let peak = scale_chroma(temporal.peak_color, self.peak_saturation_boost)
            .min(Vec3::splat(CHANNEL_MAX));
        temporal.color.lerp(peak, mix)
    }
}

fn blend_temporal(temporal: &mut TemporalStats, acc: &Accumulator, alpha: f32) {
    let Some(color) = acc.average() else {
        return;
    };
    let saliency_mean = acc.saliency_mean();
    let saliency_sq_mean = acc.saliency_sq_sum / acc.sample_count.max(1) as f32;

    if !temporal.primed {
        *temporal = TemporalStats {
            color,
            weight: acc.total_weight,
            peak_color: acc.peak_color,
            peak_weight: acc.peak_weight,
            saliency_mean,
            saliency_sq_mean,
            primed: true,
        };
        return;
    }

    temporal.color = temporal.color.lerp(color, alpha);
    temporal.weight = lerp(temporal.weight, acc.total_weight, alpha);
    temporal.peak_color = temporal.peak_color.lerp(acc.peak_color, alpha);
    temporal.peak_weight = lerp(temporal.peak_weight, acc.peak_weight, alpha);
    temporal.saliency_mean = lerp(temporal.saliency_mean, saliency_mean, alpha);
    temporal.saliency_sq_mean = lerp(temporal.saliency_sq_mean, saliency_sq_mean, alpha);
}
