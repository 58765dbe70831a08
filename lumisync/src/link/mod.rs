//! Serial device discovery, handshake, health and reconnection.
//!
//! [`LinkManager`] is generic over a [`PortProvider`] so the transmission
//! worker can run against [`SystemPorts`] in production and in-memory fakes
//! in tests.

mod manager;
mod serial;
#[cfg(test)]
mod tests;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ModelOverride;

pub use manager::{LinkManager, LinkStatusWatch, ProbeResult};
pub use serial::{SerialLink, SystemPorts};

/// Bit rates tried during discovery.
pub const BAUD_RATES: [u32; 9] = [
    9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 500_000, 921_600,
];
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Consecutive failed writes after which the device is considered gone.
pub const MAX_CONSECUTIVE_WRITE_ERRORS: u32 = 3;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("No LED device found")]
    NoDeviceFound,

    #[error("Permission denied opening '{path}'")]
    PermissionDenied { path: String },

    #[error("Failed to open '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("No handshake reply from '{path}' at {baud} baud")]
    HandshakeTimeout { path: String, baud: u32 },

    #[error("Unrecognized handshake reply from '{path}': {reply:?}")]
    UnrecognizedResponse { path: String, reply: String },

    #[error("Connection attempt throttled, retry in {retry_in:?}")]
    Throttled { retry_in: Duration },

    #[error("Not connected")]
    NotConnected,

    #[error("Device removed")]
    DeviceRemoved,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Errors that only rule out one candidate port or bit rate. Everything
    /// else ends the current session and is reported upward.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Open { .. }
                | LinkError::HandshakeTimeout { .. }
                | LinkError::UnrecognizedResponse { .. }
                | LinkError::Throttled { .. }
                | LinkError::Io(_)
        )
    }
}

/// Whether a write error means the device went away rather than a hiccup.
pub fn is_device_removed(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotFound
    ) {
        return true;
    }

    match err.raw_os_error() {
        // EIO, ENXIO, ENODEV
        #[cfg(unix)]
        Some(5) | Some(6) | Some(19) => true,
        // ERROR_BAD_COMMAND, ERROR_GEN_FAILURE, ERROR_OPERATION_ABORTED, ERROR_DEVICE_NOT_CONNECTED
        #[cfg(windows)]
        Some(22) | Some(31) | Some(995) | Some(1167) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum_macros::Display)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    /// A candidate port is being opened or is settling.
    Opening,
    /// Waiting for the device to answer the handshake.
    Handshaking,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Fixed port path; discovered when unset.
    pub port: Option<String>,
    /// Fixed bit rate; every rate in [`BAUD_RATES`] is tried when unset.
    pub baud_rate: Option<u32>,
    pub heartbeat_ms: u64,
    pub handshake_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub reconnect_interval_ms: u64,
    pub write_timeout_ms: u64,
    /// Output buffer occupancy in bytes above which frames are dropped.
    pub backpressure_threshold: u32,
    pub auto_reconnect: bool,
    pub models: Vec<ModelOverride>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: None,
            heartbeat_ms: 1000,
            handshake_timeout_ms: 200,
            settle_delay_ms: 100,
            reconnect_interval_ms: 2000,
            write_timeout_ms: 100,
            backpressure_threshold: 256,
            auto_reconnect: true,
            models: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Bit rates to try, most likely first.
    pub fn baud_candidates(&self) -> Vec<u32> {
        if let Some(baud) = self.baud_rate {
            return vec![baud];
        }
        let mut rates = vec![DEFAULT_BAUD_RATE];
        rates.extend(BAUD_RATES.iter().rev().filter(|&&b| b != DEFAULT_BAUD_RATE));
        rates
    }
}

/// Byte stream to a device. Reads are only used by the handshake.
pub trait LinkPort: io::Read + io::Write + Send {
    /// Bytes queued in the OS output buffer.
    fn pending_output(&self) -> io::Result<u32>;

    fn discard_input(&mut self) -> io::Result<()>;

    fn set_io_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Enumerates and opens device ports.
pub trait PortProvider: Send {
    type Port: LinkPort;

    fn candidates(&self) -> io::Result<Vec<String>>;

    /// Opens `path` at `baud` with 8N1 framing, no flow control, raw mode
    /// and `timeout` for blocking reads and writes.
    fn open(&self, path: &str, baud: u32, timeout: Duration) -> Result<Self::Port, LinkError>;
}

/// Counters shared by the link and the scheduler. They survive reconnects.
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub bytes_sent: AtomicU64,
    pub packets_sent: AtomicU64,
    pub write_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_deduplicated: AtomicU64,
    pub frames_superseded: AtomicU64,
}

impl LinkCounters {
    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkStats {
        LinkStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_deduplicated: self.frames_deduplicated.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.bytes_sent,
            &self.packets_sent,
            &self.write_errors,
            &self.reconnects,
            &self.frames_dropped,
            &self.frames_deduplicated,
            &self.frames_superseded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub write_errors: u64,
    pub reconnects: u64,
    pub frames_dropped: u64,
    pub frames_deduplicated: u64,
    pub frames_superseded: u64,
}
