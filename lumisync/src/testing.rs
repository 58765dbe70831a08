//! Test doubles for the serial and transmission seams.
//!
//! Nothing here touches real hardware: [`FakeProvider`] serves
//! [`FakeDevice`]s that answer the handshake, and [`RecordingTransport`]
//! stands in for a whole connected link.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::link::{LinkError, LinkPort, PortProvider};
use crate::protocol::HANDSHAKE_COMMAND;
use crate::scheduler::{Completion, Delivery, Transport};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[derive(Debug, Default)]
struct DeviceState {
    reply: Option<Vec<u8>>,
    bauds: Vec<u32>,
    permission_denied: bool,
    pending_output: u32,
    write_error: Option<io::ErrorKind>,
    health_error: bool,
    inbox: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
    opens: Vec<u32>,
}

/// An emulated LED controller. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    /// A device answering the handshake with `reply` at every bit rate.
    pub fn new(reply: &str) -> Self {
        let device = Self::default();
        device.state.lock().reply = Some(reply.as_bytes().to_vec());
        device
    }

    /// A port with nothing behind it.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn denied() -> Self {
        let device = Self::default();
        device.state.lock().permission_denied = true;
        device
    }

    /// Only answers at the given bit rates, emits line noise at others.
    pub fn with_bauds(self, bauds: &[u32]) -> Self {
        self.state.lock().bauds = bauds.to_vec();
        self
    }

    pub fn set_pending_output(&self, bytes: u32) {
        self.state.lock().pending_output = bytes;
    }

    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.state.lock().write_error = kind;
    }

    pub fn fail_health(&self, fail: bool) {
        self.state.lock().health_error = fail;
    }

    /// Everything written other than handshake commands.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    /// Bit rates of every open, in order.
    pub fn opens(&self) -> Vec<u32> {
        self.state.lock().opens.clone()
    }
}

#[derive(Debug)]
pub struct FakePort {
    device: FakeDevice,
    baud: u32,
}

impl io::Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state.lock();
        if state.inbox.is_empty() {
            drop(state);
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(state.inbox.len());
        for (dst, src) in buf.iter_mut().zip(state.inbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl io::Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state.lock();
        if buf == HANDSHAKE_COMMAND {
            if let Some(reply) = state.reply.clone() {
                if state.bauds.is_empty() || state.bauds.contains(&self.baud) {
                    state.inbox.extend(reply);
                } else {
                    state.inbox.extend([0xF0, 0x0F, 0xFE]);
                }
            }
            return Ok(buf.len());
        }
        if let Some(kind) = state.write_error {
            return Err(io::Error::from(kind));
        }
        state.frames.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinkPort for FakePort {
    fn pending_output(&self) -> io::Result<u32> {
        let state = self.device.state.lock();
        if state.health_error {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        Ok(state.pending_output)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.device.state.lock().inbox.clear();
        Ok(())
    }

    fn set_io_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

/// Serves a fixed set of named fake devices.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    ports: Vec<(String, FakeDevice)>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, path: &str, device: FakeDevice) -> Self {
        self.ports.push((path.to_string(), device));
        self
    }
}

impl PortProvider for FakeProvider {
    type Port = FakePort;

    fn candidates(&self) -> io::Result<Vec<String>> {
        Ok(self.ports.iter().map(|(path, _)| path.clone()).collect())
    }

    fn open(&self, path: &str, baud: u32, _timeout: Duration) -> Result<FakePort, LinkError> {
        let Some((_, device)) = self.ports.iter().find(|(p, _)| p == path) else {
            return Err(LinkError::Open {
                path: path.to_string(),
                reason: "no such port".to_string(),
            });
        };

        let mut state = device.state.lock();
        if state.permission_denied {
            return Err(LinkError::PermissionDenied {
                path: path.to_string(),
            });
        }
        state.opens.push(baud);
        state.inbox.clear();
        drop(state);

        Ok(FakePort {
            device: device.clone(),
            baud,
        })
    }
}

/// A gate a writer can be parked on.
#[derive(Debug, Default)]
pub struct Gate {
    closed: Mutex<bool>,
    opened: Condvar,
    arrivals: AtomicUsize,
}

impl Gate {
    pub fn hold(&self) {
        *self.closed.lock() = true;
    }

    pub fn release(&self) {
        *self.closed.lock() = false;
        self.opened.notify_all();
    }

    /// Number of writers that reached the gate so far.
    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        let mut closed = self.closed.lock();
        while *closed {
            self.opened.wait(&mut closed);
        }
    }
}

#[derive(Debug)]
struct TransportState {
    writes: Mutex<Vec<Vec<u8>>>,
    connected: AtomicBool,
    connect_ok: AtomicBool,
    connects: AtomicU32,
    disconnects: AtomicU32,
    pending_output: AtomicU32,
    remove_on_write: AtomicBool,
    healthy: AtomicBool,
    gate: Gate,
}

/// A [`Transport`] that records every written frame.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    inner: Arc<TransportState>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Starts out connected.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportState {
                writes: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                connect_ok: AtomicBool::new(true),
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                pending_output: AtomicU32::new(0),
                remove_on_write: AtomicBool::new(false),
                healthy: AtomicBool::new(true),
                gate: Gate::default(),
            }),
        }
    }

    /// Starts out disconnected; `connect` succeeds when `connect_ok`.
    pub fn disconnected(connect_ok: bool) -> Self {
        let transport = Self::new();
        transport.inner.connected.store(false, Ordering::SeqCst);
        transport.inner.connect_ok.store(connect_ok, Ordering::SeqCst);
        transport
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.writes.lock().clone()
    }

    pub fn gate(&self) -> &Gate {
        &self.inner.gate
    }

    pub fn set_pending_output(&self, bytes: u32) {
        self.inner.pending_output.store(bytes, Ordering::SeqCst);
    }

    pub fn set_connect_ok(&self, ok: bool) {
        self.inner.connect_ok.store(ok, Ordering::SeqCst);
    }

    /// Makes the next write fail as if the device was unplugged.
    pub fn remove_on_next_write(&self) {
        self.inner.remove_on_write.store(true, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_link_up(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.connect_ok.load(Ordering::SeqCst) {
            self.inner.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(LinkError::NoDeviceFound)
        }
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.inner.gate.pass();
        if self.inner.remove_on_write.swap(false, Ordering::SeqCst) {
            self.inner.connected.store(false, Ordering::SeqCst);
            return Err(LinkError::DeviceRemoved);
        }
        self.inner.writes.lock().push(bytes.to_vec());
        Ok(())
    }

    fn pending_output(&self) -> Option<u32> {
        Some(self.inner.pending_output.load(Ordering::SeqCst))
    }

    fn check_health(&mut self) -> bool {
        let healthy = self.inner.healthy.load(Ordering::SeqCst);
        if !healthy {
            self.inner.connected.store(false, Ordering::SeqCst);
        }
        healthy
    }

    fn disconnect(&mut self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collects completion outcomes by label.
#[derive(Debug, Clone, Default)]
pub struct DeliveryLog {
    entries: Arc<Mutex<Vec<(String, Delivery)>>>,
}

impl DeliveryLog {
    pub fn completion(&self, label: &str) -> Completion {
        let entries = Arc::clone(&self.entries);
        let label = label.to_string();
        Box::new(move |delivery| entries.lock().push((label, delivery)))
    }

    pub fn entries(&self) -> Vec<(String, Delivery)> {
        self.entries.lock().clone()
    }

    pub fn get(&self, label: &str) -> Option<Delivery> {
        self.entries
            .lock()
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, d)| *d)
    }
}
