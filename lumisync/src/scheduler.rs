//! Latest-wins transmission of encoded frames.
//!
//! Producers hand frames to [`SchedulerHandle::submit`]. At most one frame
//! waits for the worker; a newer submission replaces it and acknowledges the
//! replaced one immediately. The pending slot, the in-flight flag and the
//! last transmitted bytes share one mutex, held only to swap pointers. The
//! write itself and the backpressure query run outside the lock on a
//! dedicated worker thread that owns the [`Transport`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::link::{LinkCounters, LinkError, LinkManager, LinkStats, PortProvider};

/// How a submitted frame left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Delivery {
    Sent,
    /// Replaced by a newer frame before it was picked up.
    Superseded,
    /// Identical to the last transmitted frame within the heartbeat interval.
    Deduplicated,
    /// Discarded because the output buffer was backed up. This is an
    /// acknowledgment, not an error: the link is healthy and the next frame
    /// goes out once the buffer drains.
    Dropped,
    /// The link was down or the write failed.
    Failed,
    /// The scheduler was shutting down.
    Closed,
}

impl Delivery {
    /// Only `Failed` signals a link problem. Every other outcome means the
    /// frame was accounted for and the caller may keep submitting.
    pub fn is_error(self) -> bool {
        matches!(self, Delivery::Failed)
    }
}

pub type Completion = Box<dyn FnOnce(Delivery) + Send>;

/// Notifications about the link, emitted from the worker thread.
#[derive(Debug)]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: String },
    ConnectFailed { error: LinkError },
}

pub type EventCallback = Box<dyn Fn(LinkEvent) + Send + Sync>;

/// Device side of the scheduler.
pub trait Transport: Send {
    fn is_connected(&self) -> bool;

    /// Establishes the connection, or re-establishes a lost one.
    fn connect(&mut self) -> std::result::Result<(), LinkError>;

    fn write_frame(&mut self, bytes: &[u8]) -> std::result::Result<(), LinkError>;

    /// Bytes still queued in the OS output buffer, if known.
    fn pending_output(&self) -> Option<u32>;

    fn check_health(&mut self) -> bool;

    fn disconnect(&mut self);
}

impl<P: PortProvider> Transport for LinkManager<P> {
    fn is_connected(&self) -> bool {
        LinkManager::is_connected(self)
    }

    fn connect(&mut self) -> std::result::Result<(), LinkError> {
        if LinkManager::is_connected(self) {
            return Ok(());
        }
        if self.has_connected() {
            self.reconnect().map(|_| ())
        } else {
            LinkManager::connect(self).map(|_| ())
        }
    }

    fn write_frame(&mut self, bytes: &[u8]) -> std::result::Result<(), LinkError> {
        LinkManager::write_frame(self, bytes)
    }

    fn pending_output(&self) -> Option<u32> {
        LinkManager::pending_output(self)
    }

    fn check_health(&mut self) -> bool {
        LinkManager::check_health(self)
    }

    fn disconnect(&mut self) {
        LinkManager::disconnect(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub heartbeat: Duration,
    /// Output buffer occupancy in bytes above which frames are dropped.
    pub backpressure_threshold: u32,
    /// Pause after a dropped frame before the next attempt.
    pub backpressure_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(1000),
            backpressure_threshold: 256,
            backpressure_delay: Duration::from_millis(4),
        }
    }
}

pub(crate) struct Pending {
    bytes: Arc<[u8]>,
    completion: Option<Completion>,
}

impl Pending {
    fn complete(mut self, delivery: Delivery) {
        if let Some(completion) = self.completion.take() {
            completion(delivery);
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Action {
    Idle,
    Write,
    Skip,
    Heartbeat(Arc<[u8]>),
    CheckHealth,
    Connect,
    Exit,
}

/// State shared between producers and the worker. Pure bookkeeping, no I/O.
#[derive(Default)]
pub(crate) struct SchedulerState {
    pending: Option<Pending>,
    sending: bool,
    last_sent: Option<Arc<[u8]>>,
    last_sent_at: Option<Instant>,
    heartbeat_requested: bool,
    health_check_requested: bool,
    connect_requested: bool,
    terminal: Option<Arc<[u8]>>,
    closed: bool,
}

impl SchedulerState {
    /// Stores `pending`, returning the frame it replaced.
    fn submit(&mut self, pending: Pending) -> Option<Pending> {
        self.pending.replace(pending)
    }

    fn is_idle(&self) -> bool {
        self.pending.is_none() && !self.sending
    }

    /// Decides the worker's next step. `Write` and `Skip` leave the frame
    /// in `pending` for the worker to take and mark the worker busy until
    /// [`finish`](Self::finish).
    fn next_action(&mut self, now: Instant, heartbeat: Duration) -> Action {
        if self.closed {
            return Action::Exit;
        }
        if self.connect_requested {
            self.connect_requested = false;
            return Action::Connect;
        }
        if self.health_check_requested {
            self.health_check_requested = false;
            return Action::CheckHealth;
        }

        if let Some(pending) = &self.pending {
            let duplicate = self.last_sent.as_deref() == Some(&pending.bytes[..])
                && self
                    .last_sent_at
                    .is_some_and(|at| now.saturating_duration_since(at) < heartbeat);
            self.sending = true;
            return if duplicate { Action::Skip } else { Action::Write };
        }

        if self.heartbeat_requested {
            self.heartbeat_requested = false;
            if let (Some(last), Some(at)) = (&self.last_sent, self.last_sent_at) {
                if now.saturating_duration_since(at) >= heartbeat {
                    self.sending = true;
                    return Action::Heartbeat(Arc::clone(last));
                }
            }
        }

        Action::Idle
    }

    fn finish(&mut self, bytes: Option<Arc<[u8]>>, now: Instant) {
        self.sending = false;
        if let Some(bytes) = bytes {
            self.last_sent = Some(bytes);
            self.last_sent_at = Some(now);
        }
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
    idle: Condvar,
    counters: Arc<LinkCounters>,
    config: SchedulerConfig,
}

/// Cloneable producer/control side of a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Queues `bytes` for transmission, replacing any frame still waiting.
    pub fn submit(&self, bytes: Vec<u8>, completion: Option<Completion>) {
        let pending = Pending {
            bytes: bytes.into(),
            completion,
        };

        let replaced = {
            let mut state = self.shared.state.lock();
            if state.closed {
                drop(state);
                pending.complete(Delivery::Closed);
                return;
            }
            let replaced = state.submit(pending);
            self.shared.wake.notify_one();
            replaced
        };

        if let Some(replaced) = replaced {
            LinkCounters::add(&self.shared.counters.frames_superseded, 1);
            replaced.complete(Delivery::Superseded);
        }
    }

    /// Periodic control hook: resends the last frame if the heartbeat is due.
    pub fn tick(&self) {
        let mut state = self.shared.state.lock();
        state.heartbeat_requested = true;
        self.shared.wake.notify_one();
    }

    pub fn request_health_check(&self) {
        let mut state = self.shared.state.lock();
        state.health_check_requested = true;
        self.shared.wake.notify_one();
    }

    pub fn request_connect(&self) {
        let mut state = self.shared.state.lock();
        state.connect_requested = true;
        self.shared.wake.notify_one();
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.shared.counters.reset();
    }

    /// Blocks until nothing is pending or in flight. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() && !state.closed {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

/// Owns the transmission worker thread.
pub struct TransmissionScheduler {
    handle: SchedulerHandle,
    worker: Option<JoinHandle<()>>,
}

impl TransmissionScheduler {
    /// Starts the worker. It connects the transport first unless it is
    /// already connected.
    pub fn spawn<T>(
        transport: T,
        config: SchedulerConfig,
        counters: Arc<LinkCounters>,
        on_event: EventCallback,
    ) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                connect_requested: true,
                ..SchedulerState::default()
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
            counters,
            config,
        });

        let worker = thread::Builder::new()
            .name("lumisync-tx".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker_loop(shared, transport, on_event)
            })
            .map_err(|source| Error::Spawn {
                name: "transmission",
                source,
            })?;

        Ok(Self {
            handle: SchedulerHandle { shared },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stops accepting frames, sends `terminal` best-effort, disconnects and
    /// joins the worker.
    pub fn shutdown(&mut self, terminal: Option<Vec<u8>>) {
        let abandoned = {
            let mut state = self.handle.shared.state.lock();
            state.closed = true;
            state.terminal = terminal.map(Into::into);
            self.handle.shared.wake.notify_all();
            self.handle.shared.idle.notify_all();
            state.pending.take()
        };
        if let Some(pending) = abandoned {
            pending.complete(Delivery::Closed);
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Transmission worker panicked");
            }
        }
    }
}

impl Drop for TransmissionScheduler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("TransmissionScheduler dropped while running; shutting down");
            self.shutdown(None);
        }
    }
}

fn worker_loop<T: Transport>(shared: Arc<Shared>, mut transport: T, on_event: EventCallback) {
    let heartbeat = shared.config.heartbeat;

    loop {
        let (action, pending) = {
            let mut state = shared.state.lock();
            loop {
                match state.next_action(Instant::now(), heartbeat) {
                    Action::Idle => shared.wake.wait(&mut state),
                    action @ (Action::Write | Action::Skip) => {
                        let pending = state.pending.take();
                        break (action, pending);
                    }
                    action => break (action, None),
                }
            }
        };

        match action {
            Action::Idle => {}
            Action::Skip => {
                if let Some(pending) = pending {
                    LinkCounters::add(&shared.counters.frames_deduplicated, 1);
                    trace!("Skipped duplicate frame");
                    pending.complete(Delivery::Deduplicated);
                }
                finish(&shared, None);
            }
            Action::Write => {
                let mut sent = None;
                if let Some(pending) = pending {
                    let bytes = Arc::clone(&pending.bytes);
                    let delivery = transmit(&shared, &mut transport, &on_event, &bytes);
                    if delivery == Delivery::Sent {
                        sent = Some(bytes);
                    }
                    pending.complete(delivery);
                }
                finish(&shared, sent);
            }
            Action::Heartbeat(bytes) => {
                trace!("Heartbeat");
                let delivery = transmit(&shared, &mut transport, &on_event, &bytes);
                finish(&shared, (delivery == Delivery::Sent).then_some(bytes));
            }
            Action::CheckHealth => {
                if transport.is_connected() && !transport.check_health() {
                    on_event(LinkEvent::Disconnected {
                        reason: "health check failed".to_string(),
                    });
                }
            }
            Action::Connect => connect(&mut transport, &on_event),
            Action::Exit => break,
        }
    }

    let terminal = shared.state.lock().terminal.take();
    if let Some(bytes) = terminal {
        if transport.is_connected() {
            if let Err(err) = transport.write_frame(&bytes) {
                debug!("Terminal frame not delivered: {}", err);
            }
        }
    }
    transport.disconnect();
    info!("Transmission worker stopped");
}

fn connect<T: Transport>(transport: &mut T, on_event: &EventCallback) {
    if transport.is_connected() {
        return;
    }
    match transport.connect() {
        Ok(()) => on_event(LinkEvent::Connected),
        Err(err) => {
            warn!("Connection failed: {}", err);
            on_event(LinkEvent::ConnectFailed { error: err });
        }
    }
}

/// Clears the in-flight flag once the outcome has been reported.
fn finish(shared: &Shared, sent: Option<Arc<[u8]>>) {
    shared.state.lock().finish(sent, Instant::now());
    shared.idle.notify_all();
}

fn transmit<T: Transport>(
    shared: &Shared,
    transport: &mut T,
    on_event: &EventCallback,
    bytes: &[u8],
) -> Delivery {
    if !transport.is_connected() {
        return Delivery::Failed;
    }

    if let Some(queued) = transport.pending_output() {
        if queued > shared.config.backpressure_threshold {
            LinkCounters::add(&shared.counters.frames_dropped, 1);
            trace!("Dropped frame, {} bytes still queued", queued);
            thread::sleep(shared.config.backpressure_delay);
            return Delivery::Dropped;
        }
    }

    match transport.write_frame(bytes) {
        Ok(()) => Delivery::Sent,
        Err(LinkError::DeviceRemoved) => {
            on_event(LinkEvent::Disconnected {
                reason: LinkError::DeviceRemoved.to_string(),
            });
            Delivery::Failed
        }
        Err(err) => {
            debug!("Frame write failed: {}", err);
            Delivery::Failed
        }
    }
}

#[cfg(test)]
mod tests;
