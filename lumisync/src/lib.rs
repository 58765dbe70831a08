//! Screen-synchronised ambient lighting for serial LED strips.
//!
//! A captured frame flows through the stages in order:
//!
//! - [`geometry`] / [`sampler`] - perimeter zones and per-zone saliency statistics
//! - [`estimator`] - temporal accumulation and adaptive Kalman filtering
//! - [`enhancer`] - contrast, saturation, calibration, soft clip, gamma, brightness
//! - [`physics`] - spring-fluid smoothing around the ring of zones
//! - [`orientation`] - physical LED order, outlier suppression, LED count fitting
//! - [`scheduler`] / [`link`] - latest-wins transmission over the serial link
//!
//! [`pipeline::Pipeline`] runs the stages for one frame; [`session::Session`]
//! wires capture, pipeline and transmission contexts together.

pub mod color;
pub mod config;
pub mod enhancer;
pub mod error;
pub mod estimator;
pub mod frame;
pub mod geometry;
pub mod link;
pub mod orientation;
pub mod physics;
pub mod pipeline;
pub mod power;
pub mod protocol;
pub mod sampler;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod state;
pub mod testing;


pub use color::Rgb8;
pub use config::Config;
pub use error::{Error, Result};
pub use frame::{CapturedFrame, Frame, FrameContent, FrameView, PixelFormat};
pub use geometry::{OriginMode, ZoneConfig, ZoneGeometry};
pub use link::{LinkError, LinkManager, LinkStats, LinkStatus};
pub use orientation::Orientation;
pub use pipeline::Pipeline;
pub use scheduler::{Delivery, TransmissionScheduler};
pub use session::{Session, SessionStatus};
pub use source::ColorSource;
