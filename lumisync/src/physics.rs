//! Spring-fluid smoothing around the ring of zones.
//!
//! Every zone is a mass on a spring pulled toward its enhanced target. Zones
//! are also coupled to their ring neighbours: an advection term toward the
//! upstream neighbour and a weaker drag toward the downstream one. Coupling
//! fades with color distance so hard edges in the picture stay hard.
//!
//! All zones read their neighbours from the previous step's snapshot, so the
//! result does not depend on the order zones are visited in.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::color::{smoothstep, CHANNEL_MAX};
use crate::state::ZoneState;

/// Frame time the spring constants are tuned for.
pub const REFERENCE_DT: f32 = 1.0 / 60.0;
pub const MIN_TIME_SCALE: f32 = 0.06;
pub const MAX_TIME_SCALE: f32 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpringParams {
    pub tension: f32,
    pub damping: f32,
}

impl SpringParams {
    pub fn lerp(self, other: SpringParams, t: f32) -> SpringParams {
        SpringParams {
            tension: self.tension + (other.tension - self.tension) * t,
            damping: self.damping + (other.damping - self.damping) * t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Parameters for calm zones.
    pub soft: SpringParams,
    /// Parameters for zones with recent activity.
    pub stiff: SpringParams,
    /// Parameters for scene cuts.
    pub snap: SpringParams,
    /// Position to target distance at which snapping is complete.
    pub snap_distance: f32,
    pub advection: f32,
    pub drag: f32,
    /// Color distance at which neighbour coupling falls to ~60 %.
    pub edge_sigma: f32,
    pub intensity_rise: f32,
    pub intensity_decay: f32,
    /// Intensity range mapped onto soft..stiff.
    pub intensity_low: f32,
    pub intensity_high: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            soft: SpringParams {
                tension: 0.06,
                damping: 0.30,
            },
            stiff: SpringParams {
                tension: 0.30,
                damping: 0.45,
            },
            snap: SpringParams {
                tension: 0.45,
                damping: 0.60,
            },
            snap_distance: 140.0,
            advection: 0.08,
            drag: 0.03,
            edge_sigma: 40.0,
            intensity_rise: 0.5,
            intensity_decay: 0.05,
            intensity_low: 2.0,
            intensity_high: 30.0,
        }
    }
}

/// Converts a frame delta in seconds into a step size relative to 60 Hz.
pub fn time_scale(dt: f32) -> f32 {
    if !dt.is_finite() {
        return 1.0;
    }
    (dt / REFERENCE_DT).clamp(MIN_TIME_SCALE, MAX_TIME_SCALE)
}

#[derive(Debug, Clone, Default)]
pub struct SpatialPhysicsSmoother {
    config: SmoothingConfig,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
}

impl SpatialPhysicsSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            positions: Vec::new(),
            velocities: Vec::new(),
        }
    }

    pub fn config(&self) -> &SmoothingConfig {
        &self.config
    }

    /// Spring parameters for a zone with the given intensity and target gap.
    pub fn params_for(&self, intensity: f32, gap: f32) -> SpringParams {
        let c = &self.config;
        let activity = smoothstep(c.intensity_low, c.intensity_high, intensity);
        let params = c.soft.lerp(c.stiff, activity);
        let snap = smoothstep(c.snap_distance * 0.5, c.snap_distance, gap);
        params.lerp(c.snap, snap)
    }

    /// Advances every zone one step toward `targets` and writes positions
    /// (clamped to the byte range) into `out`.
    pub fn step(&mut self, states: &mut [ZoneState], targets: &[Vec3], ts: f32, out: &mut [Vec3]) {
        let n = states.len().min(targets.len()).min(out.len());
        if n == 0 {
            return;
        }
        let ts = ts.clamp(MIN_TIME_SCALE, MAX_TIME_SCALE);
        let c = self.config;

        for (state, target) in states.iter_mut().zip(targets) {
            let target = sanitize(*target);
            if !state.physics_primed {
                state.position = target;
                state.velocity = Vec3::ZERO;
                state.physics_primed = true;
            }
            let rate = if state.change > state.intensity {
                c.intensity_rise
            } else {
                c.intensity_decay
            };
            state.intensity += (state.change - state.intensity) * rate;
        }

        self.positions.clear();
        self.positions.extend(states[..n].iter().map(|s| s.position));
        self.velocities.clear();
        self.velocities.extend(states[..n].iter().map(|s| s.velocity));

        let two_sigma_sq = 2.0 * c.edge_sigma * c.edge_sigma;
        let coupling = |a: Vec3, b: Vec3| {
            if two_sigma_sq <= 0.0 {
                return 0.0;
            }
            (-a.distance_squared(b) / two_sigma_sq).exp()
        };

        for i in 0..n {
            let up = (i + n - 1) % n;
            let down = (i + 1) % n;
            let p = self.positions[i];
            let v = self.velocities[i];
            let target = sanitize(targets[i]);

            let params = self.params_for(states[i].intensity, p.distance(target));
            let spring = (target - p) * params.tension;
            let advection = ((self.positions[up] - p) + (self.velocities[up] - v))
                * (c.advection * coupling(self.positions[up], p));
            let drag = (self.positions[down] - p) * (c.drag * coupling(self.positions[down], p));

            let mut velocity = v + (spring + advection + drag) * ts;
            velocity *= (1.0 - params.damping).clamp(0.0, 1.0).powf(ts);
            let mut position = p + velocity * ts;

            for axis in 0..3 {
                if position[axis] < 0.0 || position[axis] > CHANNEL_MAX {
                    position[axis] = position[axis].clamp(0.0, CHANNEL_MAX);
                    velocity[axis] = 0.0;
                }
            }
            if !position.is_finite() || !velocity.is_finite() {
                position = target;
                velocity = Vec3::ZERO;
            }

            states[i].position = position;
            states[i].velocity = velocity;
            out[i] = position;
        }
    }
}

fn sanitize(color: Vec3) -> Vec3 {
    if color.is_finite() {
        color.clamp(Vec3::ZERO, Vec3::splat(CHANNEL_MAX))
    } else {
        Vec3::ZERO
    }
}
