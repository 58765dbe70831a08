use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::link::{
    is_device_removed, LinkConfig, LinkCounters, LinkError, LinkPort, LinkStats, LinkStatus,
    PortProvider, MAX_CONSECUTIVE_WRITE_ERRORS,
};
use crate::protocol::{
    lookup_model, parse_handshake_response, DeviceIdentity, DeviceLayout, HANDSHAKE_COMMAND,
};

/// A port and bit rate that answered the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub path: String,
    pub baud: u32,
    pub identity: DeviceIdentity,
}

/// Read-only view of a manager's status, usable from other threads.
#[derive(Debug, Clone)]
pub struct LinkStatusWatch {
    status: Arc<Mutex<LinkStatus>>,
}

impl LinkStatusWatch {
    pub fn get(&self) -> LinkStatus {
        *self.status.lock()
    }
}

struct Connection<T> {
    port: T,
    path: String,
    baud: u32,
    identity: DeviceIdentity,
}

/// Owns the device connection and its lifecycle.
pub struct LinkManager<P: PortProvider> {
    provider: P,
    config: LinkConfig,
    connection: Option<Connection<P::Port>>,
    status: Arc<Mutex<LinkStatus>>,
    counters: Arc<LinkCounters>,
    last_attempt: Option<Instant>,
    consecutive_write_errors: u32,
    has_connected: bool,
}

impl<P: PortProvider> LinkManager<P> {
    pub fn new(provider: P, config: LinkConfig) -> Self {
        Self::with_counters(provider, config, Arc::new(LinkCounters::default()))
    }

    pub fn with_counters(provider: P, config: LinkConfig, counters: Arc<LinkCounters>) -> Self {
        Self {
            provider,
            config,
            connection: None,
            status: Arc::new(Mutex::new(LinkStatus::Disconnected)),
            counters,
            last_attempt: None,
            consecutive_write_errors: 0,
            has_connected: false,
        }
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.lock()
    }

    pub fn status_watch(&self) -> LinkStatusWatch {
        LinkStatusWatch {
            status: Arc::clone(&self.status),
        }
    }

    fn set_status(&self, status: LinkStatus) {
        let mut current = self.status.lock();
        if *current != status {
            trace!("Link status {} -> {}", *current, status);
            *current = status;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether any connection attempt of this manager ever succeeded.
    pub fn has_connected(&self) -> bool {
        self.has_connected
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.connection.as_ref().map(|c| &c.identity)
    }

    pub fn port_path(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.path.as_str())
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.connection.as_ref().map(|c| c.baud)
    }

    /// Layout of the connected model, if the model is known.
    pub fn layout(&self) -> Option<DeviceLayout> {
        self.identity()
            .and_then(|id| lookup_model(&id.model, &self.config.models))
    }

    pub fn counters(&self) -> Arc<LinkCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Tries every candidate port and bit rate until one answers the
    /// handshake. Consecutive attempts are throttled.
    pub fn connect(&mut self) -> Result<DeviceIdentity, LinkError> {
        if let Some(last) = self.last_attempt {
            let elapsed = last.elapsed();
            let interval = self.config.reconnect_interval();
            if elapsed < interval {
                return Err(LinkError::Throttled {
                    retry_in: interval - elapsed,
                });
            }
        }
        self.last_attempt = Some(Instant::now());
        self.close();

        let candidates = match &self.config.port {
            Some(port) => vec![port.clone()],
            None => self.provider.candidates()?,
        };
        if candidates.is_empty() {
            self.set_status(LinkStatus::Error);
            return Err(LinkError::NoDeviceFound);
        }

        let mut permission_denied = None;
        for path in &candidates {
            for baud in self.config.baud_candidates() {
                self.set_status(LinkStatus::Opening);
                let attempt = self.open_port(path, baud).and_then(|port| {
                    self.set_status(LinkStatus::Handshaking);
                    self.identify(port, path, baud)
                });
                match attempt {
                    Ok((port, identity)) => {
                        info!(
                            "Connected to '{}' at {} baud, model {}",
                            path, baud, identity.model
                        );
                        self.connection = Some(Connection {
                            port,
                            path: path.clone(),
                            baud,
                            identity: identity.clone(),
                        });
                        self.set_status(LinkStatus::Connected);
                        self.consecutive_write_errors = 0;
                        self.has_connected = true;
                        return Ok(identity);
                    }
                    Err(err @ LinkError::PermissionDenied { .. }) => {
                        warn!("{}", err);
                        permission_denied = Some(err);
                        break;
                    }
                    Err(err) if err.is_retryable() => {
                        debug!("Candidate '{}' at {} baud rejected: {}", path, baud, err);
                    }
                    Err(err) => {
                        self.set_status(LinkStatus::Error);
                        return Err(err);
                    }
                }
            }
        }

        self.set_status(LinkStatus::Error);
        Err(permission_denied.unwrap_or(LinkError::NoDeviceFound))
    }

    /// Drops the current connection and connects again. Subject to the
    /// same throttle as [`connect`](Self::connect).
    pub fn reconnect(&mut self) -> Result<DeviceIdentity, LinkError> {
        info!("Reconnecting to LED device");
        let identity = self.connect()?;
        LinkCounters::add(&self.counters.reconnects, 1);
        Ok(identity)
    }

    /// Handshakes `path` at `baud` on a separate handle. The current
    /// connection is never touched; probing its own port reports the
    /// known identity instead of reopening it.
    pub fn probe(&self, path: &str, baud: u32) -> Result<DeviceIdentity, LinkError> {
        if let Some(conn) = &self.connection {
            if conn.path == path {
                return if conn.baud == baud {
                    Ok(conn.identity.clone())
                } else {
                    Err(LinkError::Open {
                        path: path.to_string(),
                        reason: "port is in use by the active connection".to_string(),
                    })
                };
            }
        }

        self.open_and_handshake(path, baud).map(|(_, identity)| identity)
    }

    /// Probes every candidate port, stopping at the first bit rate that
    /// answers on each.
    pub fn scan(&self) -> Result<Vec<ProbeResult>, LinkError> {
        let mut found = Vec::new();
        for path in self.provider.candidates()? {
            for baud in self.config.baud_candidates() {
                match self.probe(&path, baud) {
                    Ok(identity) => {
                        found.push(ProbeResult {
                            path: path.clone(),
                            baud,
                            identity,
                        });
                        break;
                    }
                    Err(LinkError::PermissionDenied { .. }) => break,
                    Err(err) => debug!("Probe of '{}' at {} baud failed: {}", path, baud, err),
                }
            }
        }
        Ok(found)
    }

    /// Cheap validity check of the open handle, e.g. after system sleep.
    pub fn check_health(&mut self) -> bool {
        let Some(conn) = &self.connection else {
            return false;
        };
        match conn.port.pending_output() {
            Ok(_) => true,
            Err(err) => {
                warn!("Health check of '{}' failed: {}", conn.path, err);
                self.close();
                false
            }
        }
    }

    /// Bytes waiting in the OS output buffer, `None` when unknown.
    pub fn pending_output(&self) -> Option<u32> {
        self.connection
            .as_ref()
            .and_then(|c| c.port.pending_output().ok())
    }

    pub fn write_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let Some(conn) = &mut self.connection else {
            return Err(LinkError::NotConnected);
        };

        match conn.port.write_all(bytes).and_then(|_| conn.port.flush()) {
            Ok(()) => {
                self.consecutive_write_errors = 0;
                LinkCounters::add(&self.counters.bytes_sent, bytes.len() as u64);
                LinkCounters::add(&self.counters.packets_sent, 1);
                Ok(())
            }
            Err(err) => {
                LinkCounters::add(&self.counters.write_errors, 1);
                self.consecutive_write_errors += 1;

                if is_device_removed(&err)
                    || self.consecutive_write_errors >= MAX_CONSECUTIVE_WRITE_ERRORS
                {
                    warn!("LED device '{}' removed: {}", conn.path, err);
                    self.close();
                    return Err(LinkError::DeviceRemoved);
                }
                debug!("Write to '{}' failed: {}", conn.path, err);
                Err(LinkError::Io(err))
            }
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = &self.connection {
            info!("Disconnecting from '{}'", conn.path);
        }
        self.close();
    }

    fn close(&mut self) {
        self.connection = None;
        self.set_status(LinkStatus::Disconnected);
    }

    fn open_and_handshake(
        &self,
        path: &str,
        baud: u32,
    ) -> Result<(P::Port, DeviceIdentity), LinkError> {
        let port = self.open_port(path, baud)?;
        self.identify(port, path, baud)
    }

    /// Opens `path` and waits out the settle delay.
    fn open_port(&self, path: &str, baud: u32) -> Result<P::Port, LinkError> {
        let port = self
            .provider
            .open(path, baud, self.config.handshake_timeout())?;

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(port)
    }

    fn identify(
        &self,
        mut port: P::Port,
        path: &str,
        baud: u32,
    ) -> Result<(P::Port, DeviceIdentity), LinkError> {
        let identity = handshake(&mut port, path, baud, self.config.handshake_timeout())?;
        port.set_io_timeout(self.config.write_timeout())?;
        Ok((port, identity))
    }
}

fn handshake<T: LinkPort>(
    port: &mut T,
    path: &str,
    baud: u32,
    timeout: Duration,
) -> Result<DeviceIdentity, LinkError> {
    port.discard_input()?;
    port.write_all(HANDSHAKE_COMMAND)?;
    port.flush()?;

    let deadline = Instant::now() + timeout;
    let mut reply = Vec::new();
    let mut chunk = [0u8; 64];
    while Instant::now() < deadline {
        match port.read(&mut chunk) {
            Ok(0) => {
                if !reply.is_empty() {
                    break;
                }
            }
            Ok(n) => {
                reply.extend_from_slice(&chunk[..n]);
                if reply.contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                if !reply.is_empty() {
                    break;
                }
            }
            Err(err) => return Err(LinkError::Io(err)),
        }
    }

    if reply.is_empty() {
        return Err(LinkError::HandshakeTimeout {
            path: path.to_string(),
            baud,
        });
    }

    parse_handshake_response(&reply).ok_or_else(|| LinkError::UnrecognizedResponse {
        path: path.to_string(),
        reply: String::from_utf8_lossy(&reply).into_owned(),
    })
}
