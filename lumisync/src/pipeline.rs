//! One full pass from a captured frame to strip-ordered LED colors.

use std::time::Duration;

use glam::Vec3;
use tracing::debug;

use crate::color::{distance, Rgb8};
use crate::config::Config;
use crate::enhancer::{scale_brightness, ColorEnhancer};
use crate::error::Result;
use crate::estimator::ZoneEstimator;
use crate::frame::{CapturedFrame, FrameContent, FrameView};
use crate::geometry::{ZoneConfig, ZoneGeometry};
use crate::orientation::OrientationMapper;
use crate::physics::{time_scale, SpatialPhysicsSmoother, REFERENCE_DT};
use crate::power::PowerLimit;
use crate::sampler::{Accumulator, CellGrid, GridSampler, SaliencySampler, SamplerConfig};
use crate::state::{ensure_zone_count, ZoneState};

/// Bounds on the frame delta fed to the smoother.
const MIN_FRAME_DELTA: Duration = Duration::from_millis(1);
const MAX_FRAME_DELTA: Duration = Duration::from_millis(100);

/// Per-zone state and scratch buffers of a stream, threaded through every
/// stage by mutable reference.
#[derive(Debug, Default)]
pub struct FrameContext {
    states: Vec<ZoneState>,
    accumulators: Vec<Accumulator>,
    estimates: Vec<Vec3>,
    targets: Vec<Vec3>,
    smoothed: Vec<Vec3>,
    colors: Vec<Rgb8>,
    geometry: Option<ZoneGeometry>,
    last_timestamp: Option<Duration>,
}

impl FrameContext {
    pub fn states(&self) -> &[ZoneState] {
        &self.states
    }

    pub fn geometry(&self) -> Option<&ZoneGeometry> {
        self.geometry.as_ref()
    }

    /// Sizes every buffer for `zones`. Zone state is zeroed when the count
    /// changes.
    fn prepare(&mut self, zones: usize) {
        if ensure_zone_count(&mut self.states, zones) {
            debug!("Zone state reallocated for {} zones", zones);
        }
        self.accumulators.clear();
        self.accumulators.resize(zones, Accumulator::default());
        self.estimates.resize(zones, Vec3::ZERO);
        self.targets.resize(zones, Vec3::ZERO);
        self.smoothed.resize(zones, Vec3::ZERO);
    }

    /// Rebuilds the cached geometry when the layout or capture size changed.
    fn refresh_geometry(&mut self, zones: ZoneConfig, origin_y: f32, width: u32, height: u32) {
        let fresh = self
            .geometry
            .as_ref()
            .is_some_and(|g| g.matches(&zones, origin_y, width, height));
        if !fresh {
            debug!("Building zone geometry for {}x{}", width, height);
            self.geometry = Some(ZoneGeometry::new(zones, origin_y, width, height));
        }
    }

    /// Step size for a frame captured at `timestamp`.
    fn time_scale(&mut self, timestamp: Duration) -> f32 {
        let dt = match self.last_timestamp {
            Some(previous) => timestamp
                .saturating_sub(previous)
                .clamp(MIN_FRAME_DELTA, MAX_FRAME_DELTA)
                .as_secs_f32(),
            None => REFERENCE_DT,
        };
        self.last_timestamp = Some(timestamp);
        time_scale(dt)
    }
}

pub struct Pipeline {
    zones: ZoneConfig,
    origin_y: f32,
    sampler_config: SamplerConfig,
    sampler: Box<dyn SaliencySampler>,
    estimator: ZoneEstimator,
    enhancer: ColorEnhancer,
    smoother: SpatialPhysicsSmoother,
    mapper: OrientationMapper,
    power_limit: PowerLimit,
    context: FrameContext,
}

impl Pipeline {
    /// Builds the stages for `config`. The origin is resolved once here and
    /// stays fixed until the pipeline is rebuilt.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let origin_y = config.origin.resolve(&config.zones);
        let sampler = config.sampler.build();
        debug!(
            "Pipeline: {} zones, {} LEDs, origin {:.3}, {} sampler",
            config.zones.total(),
            config.led_count(),
            origin_y,
            sampler.name()
        );

        Ok(Self {
            zones: config.zones,
            origin_y,
            sampler_config: config.sampler,
            sampler,
            estimator: ZoneEstimator::default(),
            enhancer: ColorEnhancer::new(config.enhancer_settings()),
            smoother: SpatialPhysicsSmoother::new(config.smoothing),
            mapper: OrientationMapper::new(config.orientation, config.zones, config.led_count()),
            power_limit: config.power_limit,
            context: FrameContext::default(),
        })
    }

    pub fn zones(&self) -> &ZoneConfig {
        &self.zones
    }

    pub fn origin_y(&self) -> f32 {
        self.origin_y
    }

    pub fn led_count(&self) -> usize {
        self.mapper.led_count()
    }

    pub fn context(&self) -> &FrameContext {
        &self.context
    }

    /// Drops all zone state; the next frame starts from scratch.
    pub fn reset(&mut self) {
        self.context = FrameContext::default();
        self.enhancer = ColorEnhancer::new(*self.enhancer.settings());
    }

    /// Processes one captured frame. An empty result means there are no
    /// zones to drive.
    pub fn process(&mut self, frame: &CapturedFrame) -> Vec<Rgb8> {
        match &frame.content {
            FrameContent::Pixels(pixels) => self.process_view(&pixels.view(), frame.timestamp),
            FrameContent::Cells(grid) => self.process_cells(grid, frame.timestamp),
            FrameContent::Colors(colors) => self.process_colors(colors, frame.timestamp),
        }
    }

    pub fn process_view(&mut self, view: &FrameView<'_>, timestamp: Duration) -> Vec<Rgb8> {
        let zones = self.zones.total();
        if zones == 0 {
            return Vec::new();
        }
        let ts = self.context.time_scale(timestamp);
        self.context.prepare(zones);

        let ctx = &mut self.context;
        ctx.refresh_geometry(self.zones, self.origin_y, view.width(), view.height());
        if let Some(geometry) = &ctx.geometry {
            self.sampler.sample(view, geometry, &mut ctx.accumulators);
        }

        self.finish_sampled(ts)
    }

    /// Processes a pre-reduced cell grid in place of raw pixels.
    pub fn process_cells(&mut self, grid: &CellGrid, timestamp: Duration) -> Vec<Rgb8> {
        let zones = self.zones.total();
        if zones == 0 {
            return Vec::new();
        }
        let ts = self.context.time_scale(timestamp);
        self.context.prepare(zones);

        let ctx = &mut self.context;
        ctx.refresh_geometry(self.zones, self.origin_y, grid.width(), grid.height());
        if let Some(geometry) = &ctx.geometry {
            GridSampler::accumulate_cells(
                grid,
                geometry,
                self.sampler_config.radial_weight,
                &mut ctx.accumulators,
            );
        }

        self.finish_sampled(ts)
    }

    /// Smooths externally generated zone colors, skipping sampling,
    /// estimation and enhancement. Colors are stretched or squeezed to the
    /// zone count by nearest index.
    pub fn process_colors(&mut self, colors: &[Rgb8], timestamp: Duration) -> Vec<Rgb8> {
        let zones = self.zones.total();
        if zones == 0 {
            return Vec::new();
        }
        let ts = self.context.time_scale(timestamp);
        self.context.prepare(zones);

        let brightness = self.enhancer.brightness();
        let ctx = &mut self.context;
        for (i, (target, state)) in ctx.targets.iter_mut().zip(ctx.states.iter_mut()).enumerate() {
            let color = if colors.is_empty() {
                Rgb8::BLACK
            } else {
                colors[i * colors.len() / zones]
            };
            *target = scale_brightness(color.to_vec3(), brightness);
            state.change = distance(*target, state.last_output);
            state.last_output = *target;
        }

        self.finish_smoothing(ts)
    }

    fn finish_sampled(&mut self, ts: f32) -> Vec<Rgb8> {
        let ctx = &mut self.context;
        self.estimator
            .run(&mut ctx.states, &ctx.accumulators, &mut ctx.estimates);
        self.enhancer.run(&ctx.estimates, &mut ctx.targets);
        self.finish_smoothing(ts)
    }

    fn finish_smoothing(&mut self, ts: f32) -> Vec<Rgb8> {
        let ctx = &mut self.context;
        self.smoother
            .step(&mut ctx.states, &ctx.targets, ts, &mut ctx.smoothed);

        ctx.colors.clear();
        ctx.colors
            .extend(ctx.smoothed.iter().map(|&c| Rgb8::from_vec3(c)));

        let mut leds = self.mapper.map(&ctx.colors);
        self.power_limit.apply(&mut leds);
        leds
    }
}
