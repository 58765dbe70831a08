//! Wires the capture, pipeline and transmission contexts together.
//!
//! Captured frames go through a single-value [`Slot`]: a frame that arrives
//! while the pipeline is still busy replaces the waiting one. The pipeline
//! thread owns all zone state and hands encoded frames to the
//! [`TransmissionScheduler`], whose worker owns the device link. Timers live
//! with the caller, which drives them through [`Session::tick`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use common::{Recv, Sent, Slot};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::color::Rgb8;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::frame::CapturedFrame;
use crate::link::{LinkCounters, LinkError, LinkManager, LinkStats, SystemPorts};
use crate::pipeline::Pipeline;
use crate::protocol::encode_frame;
use crate::scheduler::{
    EventCallback, LinkEvent, SchedulerConfig, SchedulerHandle, TransmissionScheduler, Transport,
};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const PIPELINE_POLL: Duration = Duration::from_millis(250);

/// Connection state as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default, strum_macros::Display)]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    PermissionDenied,
    NoDeviceFound,
    StreamError(String),
}

impl SessionStatus {
    fn from_event(event: &LinkEvent) -> Option<Self> {
        match event {
            LinkEvent::Connected => Some(SessionStatus::Connected),
            LinkEvent::Disconnected { reason } => Some(SessionStatus::StreamError(reason.clone())),
            LinkEvent::ConnectFailed { error } => match error {
                LinkError::Throttled { .. } => None,
                LinkError::PermissionDenied { .. } => Some(SessionStatus::PermissionDenied),
                LinkError::NoDeviceFound => Some(SessionStatus::NoDeviceFound),
                other => Some(SessionStatus::StreamError(other.to_string())),
            },
        }
    }
}

#[derive(Debug, Default)]
struct FrameCounts {
    accepted: AtomicU64,
    finished: AtomicU64,
}

impl FrameCounts {
    fn settled(&self) -> bool {
        self.finished.load(Ordering::SeqCst) >= self.accepted.load(Ordering::SeqCst)
    }
}

struct Timers {
    last_health_check: Instant,
    last_reconnect: Instant,
}

pub struct Session {
    config: Config,
    frames: Arc<Slot<CapturedFrame>>,
    counts: Arc<FrameCounts>,
    status: Arc<Mutex<SessionStatus>>,
    timers: Mutex<Timers>,
    handle: SchedulerHandle,
    scheduler: Option<TransmissionScheduler>,
    pipeline: Option<JoinHandle<()>>,
}

impl Session {
    /// Starts streaming to the first LED device found on the system's
    /// serial ports.
    pub fn open(config: Config) -> Result<Self> {
        let counters = Arc::new(LinkCounters::default());
        let link =
            LinkManager::with_counters(SystemPorts, config.link.clone(), Arc::clone(&counters));
        Self::start(config, link, counters)
    }

    /// Starts the pipeline and transmission threads on `transport`.
    /// Connecting happens on the transmission thread; watch
    /// [`status`](Self::status) for the outcome.
    pub fn start<T>(config: Config, transport: T, counters: Arc<LinkCounters>) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let pipeline = Pipeline::new(&config)?;

        let status = Arc::new(Mutex::new(SessionStatus::Connecting));
        let on_event: EventCallback = Box::new({
            let status = Arc::clone(&status);
            move |event| {
                debug!("Link event: {:?}", event);
                if let Some(next) = SessionStatus::from_event(&event) {
                    *status.lock() = next;
                }
            }
        });

        let scheduler_config = SchedulerConfig {
            heartbeat: config.link.heartbeat(),
            backpressure_threshold: config.link.backpressure_threshold,
            ..SchedulerConfig::default()
        };
        let scheduler =
            TransmissionScheduler::spawn(transport, scheduler_config, counters, on_event)?;
        let handle = scheduler.handle();

        let now = Instant::now();
        let mut session = Self {
            config,
            frames: Arc::new(Slot::new()),
            counts: Arc::new(FrameCounts::default()),
            status,
            timers: Mutex::new(Timers {
                last_health_check: now,
                last_reconnect: now,
            }),
            handle,
            scheduler: Some(scheduler),
            pipeline: None,
        };
        session.spawn_pipeline(pipeline)?;

        info!(
            "Session started: {} zones, {} LEDs",
            session.config.zones.total(),
            session.config.led_count()
        );
        Ok(session)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    pub fn stats(&self) -> LinkStats {
        self.handle.stats()
    }

    pub fn reset_stats(&self) {
        self.handle.reset_stats();
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Hands a captured frame to the pipeline, replacing one still waiting.
    /// Returns `false` once the session is stopped.
    pub fn push_frame(&self, frame: CapturedFrame) -> bool {
        self.counts.accepted.fetch_add(1, Ordering::SeqCst);
        match self.frames.send(frame) {
            Sent::Stored => true,
            Sent::Replaced(_) => {
                trace!("Capture frame replaced before processing");
                self.counts.finished.fetch_add(1, Ordering::SeqCst);
                true
            }
            Sent::Closed(_) => {
                self.counts.finished.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Streams zone colors from a color source instead of a captured frame.
    pub fn push_colors(&self, colors: Vec<Rgb8>, timestamp: Duration) -> bool {
        self.push_frame(CapturedFrame::colors(colors, timestamp))
    }

    /// Periodic control hook: heartbeat, health check and reconnection.
    pub fn tick(&self) {
        if !self.is_running() {
            return;
        }
        self.handle.tick();

        let now = Instant::now();
        let mut timers = self.timers.lock();
        if now.saturating_duration_since(timers.last_health_check) >= HEALTH_CHECK_INTERVAL {
            timers.last_health_check = now;
            self.handle.request_health_check();
        }

        if !self.config.link.auto_reconnect {
            return;
        }
        let mut status = self.status.lock();
        let disconnected = !matches!(*status, SessionStatus::Connected | SessionStatus::Idle);
        let due = now.saturating_duration_since(timers.last_reconnect)
            >= self.config.link.reconnect_interval();
        if disconnected && due {
            timers.last_reconnect = now;
            info!("Requesting reconnect, status was {:?}", *status);
            *status = SessionStatus::Connecting;
            self.handle.request_connect();
        }
    }

    /// Blocks until every pushed frame went through the pipeline and the
    /// transmission worker is idle. Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.counts.settled() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.handle
            .wait_idle(deadline.saturating_duration_since(Instant::now()))
    }

    /// Applies a new configuration. Zone state starts from scratch; the
    /// device link is kept.
    pub fn restart(&mut self, config: Config) -> Result<()> {
        let pipeline = Pipeline::new(&config)?;
        self.stop_pipeline();
        if config.link != self.config.link {
            warn!("Link settings changed; they apply from the next session");
        }
        self.config = config;
        self.frames.reopen();
        self.spawn_pipeline(pipeline)?;
        info!("Session restarted: {} zones", self.config.zones.total());
        Ok(())
    }

    /// Stops accepting frames, blanks the strip and releases the device.
    pub fn stop(&mut self) {
        if !self.is_running() && self.scheduler.is_none() {
            return;
        }
        self.stop_pipeline();

        let terminal = encode_frame(&vec![Rgb8::BLACK; self.config.led_count()])
            .map_err(|err| warn!("No terminal frame: {}", err))
            .ok();
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown(terminal);
        }
        *self.status.lock() = SessionStatus::Idle;
        info!("Session stopped");
    }

    fn spawn_pipeline(&mut self, mut pipeline: Pipeline) -> Result<()> {
        let frames = Arc::clone(&self.frames);
        let counts = Arc::clone(&self.counts);
        let handle = self.handle.clone();

        let worker = thread::Builder::new()
            .name("lumisync-pipeline".to_string())
            .spawn(move || loop {
                match frames.recv_timeout(PIPELINE_POLL) {
                    Recv::Value(frame) => {
                        let leds = pipeline.process(&frame);
                        if !leds.is_empty() {
                            match encode_frame(&leds) {
                                Ok(bytes) => handle.submit(bytes, None),
                                Err(err) => error!("Frame encoding failed: {}", err),
                            }
                        }
                        counts.finished.fetch_add(1, Ordering::SeqCst);
                    }
                    Recv::Timeout => {}
                    Recv::Closed => break,
                }
            })
            .map_err(|source| Error::Spawn {
                name: "pipeline",
                source,
            })?;

        self.pipeline = Some(worker);
        Ok(())
    }

    fn stop_pipeline(&mut self) {
        self.frames.close();
        if let Some(worker) = self.pipeline.take() {
            if worker.join().is_err() {
                error!("Pipeline thread panicked");
            }
        }
        // frames still waiting were never processed
        if self.frames.take().is_some() {
            self.counts.finished.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Session dropped while running; stopping");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ZoneConfig;
    use crate::protocol::decode_frame;
    use crate::testing::{init_tracing, wait_until, RecordingTransport};

    const WAIT: Duration = Duration::from_secs(5);

    fn small_config() -> Config {
        Config {
            zones: ZoneConfig::new(2, 4, 2, 0),
            ..Config::default()
        }
    }

    #[test]
    fn status_follows_link_events() {
        assert_eq!(
            SessionStatus::from_event(&LinkEvent::Connected),
            Some(SessionStatus::Connected)
        );
        assert_eq!(
            SessionStatus::from_event(&LinkEvent::ConnectFailed {
                error: LinkError::NoDeviceFound
            }),
            Some(SessionStatus::NoDeviceFound)
        );
        assert_eq!(
            SessionStatus::from_event(&LinkEvent::ConnectFailed {
                error: LinkError::PermissionDenied {
                    path: "/dev/ttyUSB0".into()
                }
            }),
            Some(SessionStatus::PermissionDenied)
        );
        assert_eq!(
            SessionStatus::from_event(&LinkEvent::ConnectFailed {
                error: LinkError::Throttled {
                    retry_in: Duration::from_secs(1)
                }
            }),
            None
        );
        assert!(matches!(
            SessionStatus::from_event(&LinkEvent::Disconnected {
                reason: "unplugged".into()
            }),
            Some(SessionStatus::StreamError(_))
        ));
    }

    #[test]
    fn colors_reach_the_transport() {
        init_tracing();
        let transport = RecordingTransport::disconnected(true);
        let mut session =
            Session::start(small_config(), transport.clone(), Arc::default()).unwrap();
        assert!(wait_until(WAIT, || session.status() == SessionStatus::Connected));

        let green = Rgb8::new(0, 255, 0);
        assert!(session.push_colors(vec![green; 8], Duration::ZERO));
        assert!(session.flush(WAIT));

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(decode_frame(&writes[0]).unwrap(), vec![green; 8]);

        session.stop();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(
            decode_frame(transport.writes().last().unwrap()).unwrap(),
            vec![Rgb8::BLACK; 8]
        );
        assert!(!session.push_colors(vec![green; 8], Duration::ZERO));
    }

    #[test]
    fn failed_connection_is_reported_and_retried() {
        let transport = RecordingTransport::disconnected(false);
        let mut config = small_config();
        config.link.reconnect_interval_ms = 0;
        let session = Session::start(config, transport.clone(), Arc::default()).unwrap();
        assert!(wait_until(WAIT, || session.status() == SessionStatus::NoDeviceFound));

        transport.set_connect_ok(true);
        session.tick();
        assert!(wait_until(WAIT, || session.status() == SessionStatus::Connected));
        assert_eq!(transport.connects(), 2);
    }

    #[test]
    fn restart_resizes_output() {
        let transport = RecordingTransport::new();
        let mut session =
            Session::start(small_config(), transport.clone(), Arc::default()).unwrap();

        session.push_colors(vec![Rgb8::WHITE; 8], Duration::ZERO);
        assert!(session.flush(WAIT));

        let config = Config {
            zones: ZoneConfig::new(0, 5, 0, 0),
            led_count: Some(6),
            ..Config::default()
        };
        session.restart(config).unwrap();
        session.push_colors(vec![Rgb8::WHITE; 5], Duration::ZERO);
        assert!(session.flush(WAIT));

        let writes = transport.writes();
        assert_eq!(decode_frame(&writes[0]).unwrap().len(), 8);
        let resized = decode_frame(writes.last().unwrap()).unwrap();
        assert_eq!(resized.len(), 6);
        assert_eq!(resized[5], Rgb8::BLACK);

        session.stop();
        assert_eq!(decode_frame(transport.writes().last().unwrap()).unwrap().len(), 6);
    }

    #[test]
    fn invalid_restart_keeps_running() {
        let transport = RecordingTransport::new();
        let mut session =
            Session::start(small_config(), transport.clone(), Arc::default()).unwrap();
        let bad = Config {
            gamma: 0.0,
            ..small_config()
        };
        assert!(session.restart(bad).is_err());
        assert!(session.is_running());
        assert!(session.push_colors(vec![Rgb8::WHITE; 8], Duration::ZERO));
        assert!(session.flush(WAIT));
        assert_eq!(transport.writes().len(), 1);
    }
}
