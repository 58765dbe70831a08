//! Device wire format and handshake.
//!
//! A frame is a fixed 6-byte header followed by the raw colors:
//!
//! ```text
//! 0x41 0x64 0x61 0x00 count_hi count_lo  R0 G0 B0  R1 G1 B1 ...
//! ```
//!
//! The device never acknowledges frames. The handshake is the only
//! exchange that reads from the port.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::Rgb8;
use crate::geometry::ZoneConfig;
use crate::orientation::Orientation;

pub const FRAME_MAGIC: [u8; 4] = [0x41, 0x64, 0x61, 0x00];
pub const HEADER_LEN: usize = 6;
pub const MAX_LEDS: usize = u16::MAX as usize;
pub const HANDSHAKE_COMMAND: &[u8] = b"Moni-A";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{0} LEDs do not fit in one frame (max 65535)")]
    TooManyLeds(usize),

    #[error("Frame does not start with the magic bytes")]
    BadMagic,

    #[error("Frame length {actual} does not match header (expected {expected})")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Encodes `colors` into a new buffer.
pub fn encode_frame(colors: &[Rgb8]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(HEADER_LEN + colors.len() * 3);
    encode_frame_into(colors, &mut buf)?;
    Ok(buf)
}

/// Encodes `colors` into `buf`, replacing its contents.
pub fn encode_frame_into(colors: &[Rgb8], buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if colors.len() > MAX_LEDS {
        return Err(ProtocolError::TooManyLeds(colors.len()));
    }
    let count = colors.len() as u16;

    buf.clear();
    buf.reserve(HEADER_LEN + colors.len() * 3);
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(bytemuck::cast_slice(colors));
    Ok(())
}

pub fn decode_frame(bytes: &[u8]) -> Result<Vec<Rgb8>, ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::LengthMismatch {
            expected: HEADER_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[..4] != FRAME_MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let count = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    let expected = HEADER_LEN + count * 3;
    if bytes.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    Ok(bytemuck::cast_slice::<u8, Rgb8>(&bytes[HEADER_LEN..]).to_vec())
}

/// What a device reported during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub model: String,
    /// Remaining comma separated fields, trimmed.
    pub fields: Vec<String>,
}

/// Parses a `model,field,field...` reply. Returns `None` for noise.
pub fn parse_handshake_response(bytes: &[u8]) -> Option<DeviceIdentity> {
    let text = std::str::from_utf8(bytes).ok()?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let mut parts = text.split(',').map(str::trim);

    let model = parts.next()?;
    let valid = !model.is_empty()
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return None;
    }

    Some(DeviceIdentity {
        model: model.to_string(),
        fields: parts.map(str::to_string).collect(),
    })
}

/// Fixed LED arrangement of a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceLayout {
    Strip { count: usize },
    Split { left: usize, right: usize },
    /// Wired right, top, left.
    Perimeter3 { right: usize, top: usize, left: usize },
    /// Wired right, top, left, bottom.
    Perimeter4 {
        right: usize,
        top: usize,
        left: usize,
        bottom: usize,
    },
}

impl DeviceLayout {
    pub fn zone_config(&self) -> ZoneConfig {
        match *self {
            DeviceLayout::Strip { count } => ZoneConfig::new(0, count, 0, 0),
            DeviceLayout::Split { left, right } => ZoneConfig::new(left, 0, right, 0),
            DeviceLayout::Perimeter3 { right, top, left } => ZoneConfig::new(left, top, right, 0),
            DeviceLayout::Perimeter4 {
                right,
                top,
                left,
                bottom,
            } => ZoneConfig::new(left, top, right, bottom),
        }
    }

    pub fn led_count(&self) -> usize {
        self.zone_config().total()
    }

    /// Winding that puts zones in the device's wiring order.
    pub fn orientation(&self) -> Orientation {
        match self {
            DeviceLayout::Perimeter3 { .. } | DeviceLayout::Perimeter4 { .. } => {
                Orientation::Reverse
            }
            DeviceLayout::Strip { .. } | DeviceLayout::Split { .. } => Orientation::Standard,
        }
    }
}

/// A user supplied model entry, consulted before the built-in table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOverride {
    pub model: String,
    pub layout: DeviceLayout,
}

pub const MODEL_TABLE: &[(&str, DeviceLayout)] = &[
    ("LS-STRIP-60", DeviceLayout::Strip { count: 60 }),
    ("LS-STRIP-90", DeviceLayout::Strip { count: 90 }),
    ("LS-SPLIT-30", DeviceLayout::Split { left: 30, right: 30 }),
    (
        "LS-P3-24",
        DeviceLayout::Perimeter3 {
            right: 20,
            top: 38,
            left: 20,
        },
    ),
    (
        "LS-P3-27",
        DeviceLayout::Perimeter3 {
            right: 22,
            top: 44,
            left: 22,
        },
    ),
    (
        "LS-P4-27",
        DeviceLayout::Perimeter4 {
            right: 22,
            top: 44,
            left: 22,
            bottom: 44,
        },
    ),
    (
        "LS-P4-32",
        DeviceLayout::Perimeter4 {
            right: 26,
            top: 50,
            left: 26,
            bottom: 50,
        },
    ),
];

/// Finds the layout of `model`, overrides first. Matching ignores case.
pub fn lookup_model(model: &str, overrides: &[ModelOverride]) -> Option<DeviceLayout> {
    overrides
        .iter()
        .find(|o| o.model.eq_ignore_ascii_case(model))
        .map(|o| o.layout)
        .or_else(|| {
            MODEL_TABLE
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(model))
                .map(|(_, layout)| *layout)
        })
}
