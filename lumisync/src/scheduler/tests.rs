use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::*;
use crate::link::LinkCounters;
use crate::testing::{wait_until, DeliveryLog, RecordingTransport};

const WAIT: Duration = Duration::from_secs(2);

fn pending(bytes: &[u8]) -> Pending {
    Pending {
        bytes: bytes.into(),
        completion: None,
    }
}

fn spawn(transport: &RecordingTransport, config: SchedulerConfig) -> (TransmissionScheduler, Arc<Mutex<Vec<String>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let on_event: EventCallback = Box::new({
        let events = Arc::clone(&events);
        move |event| {
            let name = match event {
                LinkEvent::Connected => "connected".to_string(),
                LinkEvent::Disconnected { reason } => format!("disconnected: {}", reason),
                LinkEvent::ConnectFailed { error } => format!("failed: {}", error),
            };
            events.lock().push(name);
        }
    });
    let scheduler = TransmissionScheduler::spawn(
        transport.clone(),
        config,
        Arc::new(LinkCounters::default()),
        on_event,
    )
    .unwrap();
    (scheduler, events)
}

#[test]
fn state_dedups_within_heartbeat() {
    let heartbeat = Duration::from_millis(100);
    let t0 = Instant::now();
    let mut state = SchedulerState::default();

    state.submit(pending(b"abc"));
    assert_eq!(state.next_action(t0, heartbeat), Action::Write);
    let sent = state.pending.take().unwrap();
    state.finish(Some(sent.bytes), t0);

    state.submit(pending(b"abc"));
    assert_eq!(state.next_action(t0 + Duration::from_millis(50), heartbeat), Action::Skip);
    state.pending.take();

    state.submit(pending(b"abc"));
    assert_eq!(state.next_action(t0 + Duration::from_millis(150), heartbeat), Action::Write);
}

#[test]
fn state_replaces_pending_frame() {
    let mut state = SchedulerState::default();
    assert!(state.submit(pending(b"a")).is_none());
    let replaced = state.submit(pending(b"b")).unwrap();
    assert_eq!(&replaced.bytes[..], b"a");
    assert_eq!(state.pending.as_ref().map(|p| &p.bytes[..]), Some(&b"b"[..]));
}

#[test]
fn state_heartbeat_only_when_due() {
    let heartbeat = Duration::from_millis(100);
    let t0 = Instant::now();
    let mut state = SchedulerState::default();

    state.heartbeat_requested = true;
    assert_eq!(state.next_action(t0, heartbeat), Action::Idle);

    state.finish(Some(Arc::from(&b"x"[..])), t0);
    state.heartbeat_requested = true;
    assert_eq!(state.next_action(t0 + Duration::from_millis(10), heartbeat), Action::Idle);

    state.heartbeat_requested = true;
    assert_eq!(
        state.next_action(t0 + Duration::from_millis(120), heartbeat),
        Action::Heartbeat(Arc::from(&b"x"[..]))
    );
    assert!(state.sending);
}

#[test]
fn closed_state_exits() {
    let mut state = SchedulerState::default();
    state.submit(pending(b"a"));
    state.closed = true;
    assert_eq!(state.next_action(Instant::now(), Duration::ZERO), Action::Exit);
}

#[test]
fn identical_frames_are_written_once_within_heartbeat() {
    let transport = RecordingTransport::new();
    let (mut scheduler, _) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();
    let log = DeliveryLog::default();

    handle.submit(vec![1, 2, 3], Some(log.completion("first")));
    assert!(handle.wait_idle(WAIT));
    handle.submit(vec![1, 2, 3], Some(log.completion("second")));
    assert!(handle.wait_idle(WAIT));

    assert_eq!(transport.writes(), vec![vec![1, 2, 3]]);
    assert_eq!(log.get("first"), Some(Delivery::Sent));
    assert_eq!(log.get("second"), Some(Delivery::Deduplicated));
    assert_eq!(handle.stats().frames_deduplicated, 1);

    scheduler.shutdown(None);
}

#[test]
fn identical_frames_after_heartbeat_are_written_twice() {
    let transport = RecordingTransport::new();
    let config = SchedulerConfig {
        heartbeat: Duration::from_millis(30),
        ..SchedulerConfig::default()
    };
    let (mut scheduler, _) = spawn(&transport, config);
    let handle = scheduler.handle();

    handle.submit(vec![7; 9], None);
    assert!(handle.wait_idle(WAIT));
    std::thread::sleep(Duration::from_millis(60));
    handle.submit(vec![7; 9], None);
    assert!(handle.wait_idle(WAIT));

    assert_eq!(transport.writes().len(), 2);
    scheduler.shutdown(None);
}

#[test]
fn latest_frame_wins_while_a_write_is_in_flight() {
    let transport = RecordingTransport::new();
    let (mut scheduler, _) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();
    let log = DeliveryLog::default();

    transport.gate().hold();
    handle.submit(b"Z".to_vec(), Some(log.completion("z")));
    assert!(wait_until(WAIT, || transport.gate().arrivals() == 1));

    handle.submit(b"A".to_vec(), Some(log.completion("a")));
    handle.submit(b"B".to_vec(), Some(log.completion("b")));
    // the replaced frame is acknowledged right away
    assert_eq!(log.get("a"), Some(Delivery::Superseded));

    transport.gate().release();
    assert!(handle.wait_idle(WAIT));

    assert_eq!(transport.writes(), vec![b"Z".to_vec(), b"B".to_vec()]);
    assert_eq!(log.get("z"), Some(Delivery::Sent));
    assert_eq!(log.get("b"), Some(Delivery::Sent));
    assert_eq!(handle.stats().frames_superseded, 1);
    scheduler.shutdown(None);
}

#[test]
fn backlogged_output_drops_frames() {
    let transport = RecordingTransport::new();
    transport.set_pending_output(4096);
    let (mut scheduler, _) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();
    let log = DeliveryLog::default();

    handle.submit(vec![1; 12], Some(log.completion("dropped")));
    assert!(handle.wait_idle(WAIT));
    assert_eq!(log.get("dropped"), Some(Delivery::Dropped));
    assert!(!Delivery::Dropped.is_error());
    assert!(transport.writes().is_empty());
    assert!(transport.is_link_up());

    transport.set_pending_output(0);
    handle.submit(vec![1; 12], Some(log.completion("sent")));
    assert!(handle.wait_idle(WAIT));
    assert_eq!(log.get("sent"), Some(Delivery::Sent));
    assert_eq!(transport.writes().len(), 1);
    assert_eq!(handle.stats().frames_dropped, 1);
    scheduler.shutdown(None);
}

#[test]
fn only_failed_delivery_is_an_error() {
    let errors: Vec<Delivery> = [
        Delivery::Sent,
        Delivery::Superseded,
        Delivery::Deduplicated,
        Delivery::Dropped,
        Delivery::Failed,
        Delivery::Closed,
    ]
    .into_iter()
    .filter(|delivery| delivery.is_error())
    .collect();
    assert_eq!(errors, vec![Delivery::Failed]);
}

#[test]
fn tick_resends_last_frame_when_due() {
    let transport = RecordingTransport::new();
    let config = SchedulerConfig {
        heartbeat: Duration::from_millis(20),
        ..SchedulerConfig::default()
    };
    let (mut scheduler, _) = spawn(&transport, config);
    let handle = scheduler.handle();

    handle.tick();
    assert!(handle.wait_idle(WAIT));
    assert!(transport.writes().is_empty());

    handle.submit(vec![5; 6], None);
    assert!(handle.wait_idle(WAIT));
    std::thread::sleep(Duration::from_millis(40));
    handle.tick();
    assert!(wait_until(WAIT, || transport.writes().len() == 2));
    assert_eq!(transport.writes()[1], vec![5; 6]);
    scheduler.shutdown(None);
}

#[test]
fn device_removal_is_reported() {
    let transport = RecordingTransport::new();
    let (mut scheduler, events) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();
    let log = DeliveryLog::default();

    transport.remove_on_next_write();
    handle.submit(vec![1], Some(log.completion("lost")));
    assert!(handle.wait_idle(WAIT));

    assert_eq!(log.get("lost"), Some(Delivery::Failed));
    assert!(wait_until(WAIT, || events
        .lock()
        .iter()
        .any(|e| e.starts_with("disconnected"))));
    assert!(!transport.is_link_up());
    scheduler.shutdown(None);
}

#[test]
fn connects_on_start_and_on_request() {
    let transport = RecordingTransport::disconnected(false);
    let (mut scheduler, events) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();

    assert!(wait_until(WAIT, || events.lock().len() == 1));
    assert!(events.lock()[0].starts_with("failed"));

    transport.set_connect_ok(true);
    handle.request_connect();
    assert!(wait_until(WAIT, || events.lock().len() == 2));
    assert_eq!(events.lock()[1], "connected");
    assert_eq!(transport.connects(), 2);
    scheduler.shutdown(None);
}

#[test]
fn failed_health_check_disconnects() {
    let transport = RecordingTransport::new();
    let (mut scheduler, events) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();

    transport.set_healthy(false);
    handle.request_health_check();
    assert!(wait_until(WAIT, || !events.lock().is_empty()));
    assert!(events.lock()[0].contains("health check"));
    scheduler.shutdown(None);
}

#[test]
fn shutdown_sends_terminal_frame_and_rejects_new_ones() {
    let transport = RecordingTransport::new();
    let (mut scheduler, _) = spawn(&transport, SchedulerConfig::default());
    let handle = scheduler.handle();
    let log = DeliveryLog::default();

    handle.submit(vec![9; 3], None);
    assert!(handle.wait_idle(WAIT));
    scheduler.shutdown(Some(vec![0; 3]));

    assert_eq!(transport.writes().last(), Some(&vec![0; 3]));
    assert_eq!(transport.disconnects(), 1);

    handle.submit(vec![1; 3], Some(log.completion("late")));
    assert_eq!(log.get("late"), Some(Delivery::Closed));
    assert!(handle.is_closed());
}
