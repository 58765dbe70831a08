//! Per-zone state carried from one frame to the next.

use glam::Vec3;

/// Covariance a zone filter starts from on its first observation.
pub const INITIAL_COVARIANCE: f32 = 40.0;

/// Three independent scalar Kalman filters (one per channel) with an
/// identity motion model. Noise levels are supplied on every update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdaptiveKalman {
    estimate: Vec3,
    covariance: Vec3,
    process_noise: f32,
    measurement_noise: f32,
    initialized: bool,
}

impl AdaptiveKalman {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn estimate(&self) -> Vec3 {
        self.estimate
    }

    pub fn covariance(&self) -> Vec3 {
        self.covariance
    }

    pub fn process_noise(&self) -> f32 {
        self.process_noise
    }

    pub fn measurement_noise(&self) -> f32 {
        self.measurement_noise
    }

    /// Predicted state before the next measurement.
    pub fn predict(&self) -> Vec3 {
        self.estimate
    }

    pub fn update(&mut self, measurement: Vec3, process_noise: f32, measurement_noise: f32) -> Vec3 {
        self.process_noise = process_noise;
        self.measurement_noise = measurement_noise;

        if !self.initialized {
            self.estimate = measurement;
            self.covariance = Vec3::splat(INITIAL_COVARIANCE);
            self.initialized = true;
            return self.estimate;
        }

        let predicted = self.covariance + Vec3::splat(process_noise);
        let gain = predicted / (predicted + Vec3::splat(measurement_noise));
        self.estimate += gain * (measurement - self.estimate);
        self.covariance = (Vec3::ONE - gain) * predicted;
        self.estimate
    }
}

/// Exponentially blended sampler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemporalStats {
    pub color: Vec3,
    pub weight: f32,
    pub peak_color: Vec3,
    pub peak_weight: f32,
    pub saliency_mean: f32,
    pub saliency_sq_mean: f32,
    pub primed: bool,
}

impl TemporalStats {
    /// Coefficient of variation of saliency.
    pub fn saliency_cv(&self) -> f32 {
        if self.saliency_mean <= 1e-3 {
            return 0.0;
        }
        let variance = (self.saliency_sq_mean - self.saliency_mean * self.saliency_mean).max(0.0);
        variance.sqrt() / self.saliency_mean
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZoneState {
    pub temporal: TemporalStats,
    pub kalman: AdaptiveKalman,
    /// Estimate emitted on the previous frame.
    pub last_output: Vec3,
    /// Distance between the last two estimates.
    pub change: f32,
    /// Smoothed recent change, drives spring stiffness.
    pub intensity: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub physics_primed: bool,
}

/// Resizes `states` to `count` zones, zeroing everything when the count
/// changes.
pub fn ensure_zone_count(states: &mut Vec<ZoneState>, count: usize) -> bool {
    if states.len() == count {
        return false;
    }
    states.clear();
    states.resize(count, ZoneState::default());
    true
}
