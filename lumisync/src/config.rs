//! Streaming settings, persisted as YAML or JSON.

use std::path::Path;
use std::time::Duration;

use common::FileFormat;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::enhancer::EnhancerSettings;
use crate::error::{Error, Result};
use crate::geometry::{OriginMode, ZoneConfig};
use crate::link::LinkConfig;
use crate::orientation::Orientation;
use crate::physics::SmoothingConfig;
use crate::power::PowerLimit;
use crate::protocol::{DeviceLayout, MAX_LEDS};
use crate::sampler::SamplerConfig;
use crate::source::ColorSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub zones: ZoneConfig,
    /// Physical LED count; the zone sum when unset.
    pub led_count: Option<usize>,
    pub origin: OriginMode,
    pub target_fps: u32,
    /// Per-channel white balance gains.
    pub calibration: [f32; 3],
    pub gamma: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub adaptive_brightness: bool,
    pub power_limit: PowerLimit,
    pub orientation: Orientation,
    pub sampler: SamplerConfig,
    pub smoothing: SmoothingConfig,
    pub link: LinkConfig,
    /// Colors streamed when no capture source is attached.
    pub source: ColorSource,
}

impl Default for Config {
    fn default() -> Self {
        let enhancer = EnhancerSettings::default();
        Self {
            zones: ZoneConfig::default(),
            led_count: None,
            origin: OriginMode::Auto,
            target_fps: 60,
            calibration: enhancer.calibration.to_array(),
            gamma: enhancer.gamma,
            saturation: enhancer.saturation,
            brightness: enhancer.brightness,
            contrast: enhancer.contrast,
            adaptive_brightness: enhancer.adaptive_brightness,
            power_limit: PowerLimit::default(),
            orientation: Orientation::Standard,
            sampler: SamplerConfig::default(),
            smoothing: SmoothingConfig::default(),
            link: LinkConfig::default(),
            source: ColorSource::Off,
        }
    }
}

impl Config {
    pub fn led_count(&self) -> usize {
        self.led_count.unwrap_or_else(|| self.zones.total())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    pub fn enhancer_settings(&self) -> EnhancerSettings {
        EnhancerSettings {
            calibration: Vec3::from_array(self.calibration),
            gamma: self.gamma,
            saturation: self.saturation,
            brightness: self.brightness,
            contrast: self.contrast,
            adaptive_brightness: self.adaptive_brightness,
        }
    }

    /// Adopts the zone counts, LED count and winding of a known device model.
    pub fn apply_layout(&mut self, layout: DeviceLayout) {
        self.zones = layout.zone_config();
        self.led_count = Some(layout.led_count());
        self.orientation = layout.orientation();
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidConfig(reason));

        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return invalid(format!("gamma must be positive, got {}", self.gamma));
        }
        if self.calibration.iter().any(|g| !g.is_finite() || *g < 0.0) {
            return invalid(format!(
                "calibration gains must be finite and non-negative, got {:?}",
                self.calibration
            ));
        }
        for (name, value) in [
            ("saturation", self.saturation),
            ("brightness", self.brightness),
            ("contrast", self.contrast),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                ));
            }
        }
        if self.target_fps == 0 {
            return invalid("target_fps must be at least 1".to_string());
        }
        if let OriginMode::Manual(y) = self.origin {
            if !(0.0..=1.0).contains(&y) {
                return invalid(format!("manual origin must be within [0, 1], got {}", y));
            }
        }
        if self.zones.total() == 0 && self.led_count.is_none() {
            return invalid("no zones configured".to_string());
        }
        if self.led_count() > MAX_LEDS || self.zones.total() > MAX_LEDS {
            return invalid(format!("at most {} LEDs are supported", MAX_LEDS));
        }
        if !self.power_limit.threshold.is_finite() {
            return invalid("power limit threshold must be finite".to_string());
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let settings_error = |reason: String| Error::Settings {
            path: path.display().to_string(),
            reason,
        };

        let format = FileFormat::from_path(path).map_err(|err| settings_error(err.to_string()))?;
        let bytes = std::fs::read(path).map_err(|err| settings_error(err.to_string()))?;
        let config: Config = common::serde::deserialize(&bytes, format)
            .map_err(|err| settings_error(format!("{:#}", err)))?;
        config.validate()?;

        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let settings_error = |reason: String| Error::Settings {
            path: path.display().to_string(),
            reason,
        };

        let format = FileFormat::from_path(path).map_err(|err| settings_error(err.to_string()))?;
        let text = common::serde::serialize(self, format)
            .map_err(|err| settings_error(format!("{:#}", err)))?;
        std::fs::write(path, text).map_err(|err| settings_error(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::PowerMode;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("lumisync-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.zones, ZoneConfig::new(20, 60, 20, 0));
        assert_eq!(config.led_count(), 100);
        assert_eq!(config.link.heartbeat(), Duration::from_millis(1000));
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn rejects_bad_values() {
        let cases = [
            Config {
                gamma: 0.0,
                ..Config::default()
            },
            Config {
                calibration: [1.0, f32::NAN, 1.0],
                ..Config::default()
            },
            Config {
                target_fps: 0,
                ..Config::default()
            },
            Config {
                origin: OriginMode::Manual(1.5),
                ..Config::default()
            },
            Config {
                zones: ZoneConfig::new(0, 0, 0, 0),
                ..Config::default()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))), "{:?}", config);
        }

        let leds_only = Config {
            zones: ZoneConfig::new(0, 0, 0, 0),
            led_count: Some(30),
            ..Config::default()
        };
        leds_only.validate().unwrap();
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "zones:\n  left: 10\n  top: 30\n  right: 10\n  bottom: 30\nbrightness: 0.5\npower_limit:\n  mode: Global\n";
        let config: Config =
            common::serde::deserialize(yaml.as_bytes(), FileFormat::Yaml).unwrap();
        assert_eq!(config.zones.total(), 80);
        assert_eq!(config.brightness, 0.5);
        assert_eq!(config.power_limit.mode, PowerMode::Global);
        assert_eq!(config.power_limit.threshold, 0.8);
        assert_eq!(config.gamma, 2.2);
    }

    #[test]
    fn save_and_load() {
        for name in ["settings.yaml", "settings.json"] {
            let path = temp_path(name);
            let config = Config {
                led_count: Some(120),
                orientation: Orientation::Reverse,
                origin: OriginMode::Manual(0.4),
                source: ColorSource::rainbow(),
                ..Config::default()
            };
            config.save(&path).unwrap();
            assert_eq!(Config::load(&path).unwrap(), config);
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn load_errors_name_the_file() {
        let path = temp_path("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        match Config::load(&path) {
            Err(Error::Settings { path: p, .. }) => assert!(p.ends_with("broken.json")),
            other => panic!("unexpected result: {:?}", other),
        }
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            Config::load(Path::new("settings.ini")),
            Err(Error::Settings { .. })
        ));
        let missing = temp_path("missing.yaml");
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());
    }

    #[test]
    fn layout_sets_zones_and_winding() {
        let mut config = Config::default();
        config.apply_layout(DeviceLayout::Perimeter4 {
            right: 15,
            top: 30,
            left: 15,
            bottom: 30,
        });
        assert_eq!(config.zones, ZoneConfig::new(15, 30, 15, 30));
        assert_eq!(config.led_count(), 90);
        assert_eq!(config.orientation, Orientation::Reverse);
    }
}
