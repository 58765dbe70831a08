use std::io;
use std::thread;
use std::time::Duration;

use super::*;
use crate::protocol::DeviceLayout;
use crate::testing::{init_tracing, wait_until, FakeDevice, FakeProvider};

const REPLY: &str = "LS-P4-27,fw2.1,rev3\n";

fn fast_config() -> LinkConfig {
    LinkConfig {
        handshake_timeout_ms: 20,
        settle_delay_ms: 0,
        reconnect_interval_ms: 0,
        ..LinkConfig::default()
    }
}

#[test]
fn baud_candidates_start_with_default() {
    let rates = LinkConfig::default().baud_candidates();
    assert_eq!(rates.len(), BAUD_RATES.len());
    assert_eq!(rates[0], DEFAULT_BAUD_RATE);
    assert_eq!(rates[1], 921_600);
    assert_eq!(*rates.last().unwrap(), 9_600);

    let fixed = LinkConfig {
        baud_rate: Some(57_600),
        ..LinkConfig::default()
    };
    assert_eq!(fixed.baud_candidates(), vec![57_600]);
}

#[test]
fn retryable_errors() {
    assert!(LinkError::HandshakeTimeout {
        path: "a".into(),
        baud: 9600
    }
    .is_retryable());
    assert!(LinkError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
    assert!(!LinkError::NoDeviceFound.is_retryable());
    assert!(!LinkError::PermissionDenied { path: "a".into() }.is_retryable());
    assert!(!LinkError::DeviceRemoved.is_retryable());
}

#[test]
fn removal_errors_are_recognized() {
    assert!(is_device_removed(&io::Error::from(io::ErrorKind::BrokenPipe)));
    assert!(is_device_removed(&io::Error::from(io::ErrorKind::NotConnected)));
    assert!(!is_device_removed(&io::Error::from(io::ErrorKind::TimedOut)));
}

#[test]
fn connects_to_answering_device() {
    init_tracing();
    let device = FakeDevice::new(REPLY);
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", device.clone());
    let mut link = LinkManager::new(provider, fast_config());

    let identity = link.connect().unwrap();
    assert_eq!(identity.model, "LS-P4-27");
    assert_eq!(identity.fields, vec!["fw2.1".to_string(), "rev3".to_string()]);
    assert_eq!(link.status(), LinkStatus::Connected);
    assert_eq!(link.port_path(), Some("/dev/ttyUSB0"));
    assert_eq!(link.baud_rate(), Some(DEFAULT_BAUD_RATE));
    assert_eq!(device.opens(), vec![DEFAULT_BAUD_RATE]);
    assert!(matches!(link.layout(), Some(DeviceLayout::Perimeter4 { .. })));
}

#[test]
fn finds_baud_rate_after_line_noise() {
    let device = FakeDevice::new(REPLY).with_bauds(&[38_400]);
    let provider = FakeProvider::new().with_port("COM3", device.clone());
    let mut link = LinkManager::new(provider, fast_config());

    link.connect().unwrap();
    assert_eq!(link.baud_rate(), Some(38_400));
    let opens = device.opens();
    assert_eq!(opens.first(), Some(&DEFAULT_BAUD_RATE));
    assert_eq!(opens.last(), Some(&38_400));
}

#[test]
fn skips_silent_port() {
    let provider = FakeProvider::new()
        .with_port("/dev/ttyUSB0", FakeDevice::silent())
        .with_port("/dev/ttyUSB1", FakeDevice::new(REPLY));
    let config = LinkConfig {
        baud_rate: Some(DEFAULT_BAUD_RATE),
        ..fast_config()
    };
    let mut link = LinkManager::new(provider, config);

    link.connect().unwrap();
    assert_eq!(link.port_path(), Some("/dev/ttyUSB1"));
}

#[test]
fn reports_missing_device() {
    let mut link = LinkManager::new(FakeProvider::new(), fast_config());
    assert!(matches!(link.connect(), Err(LinkError::NoDeviceFound)));
    assert_eq!(link.status(), LinkStatus::Error);

    let provider = FakeProvider::new().with_port("/dev/ttyS0", FakeDevice::silent());
    let config = LinkConfig {
        baud_rate: Some(DEFAULT_BAUD_RATE),
        ..fast_config()
    };
    let mut link = LinkManager::new(provider, config);
    assert!(matches!(link.connect(), Err(LinkError::NoDeviceFound)));
}

#[test]
fn reports_permission_denied() {
    let provider = FakeProvider::new().with_port("/dev/ttyACM0", FakeDevice::denied());
    let mut link = LinkManager::new(provider, fast_config());

    match link.connect() {
        Err(LinkError::PermissionDenied { path }) => assert_eq!(path, "/dev/ttyACM0"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn throttles_connection_attempts() {
    let config = LinkConfig {
        reconnect_interval_ms: 60_000,
        ..fast_config()
    };
    let mut link = LinkManager::new(FakeProvider::new(), config);

    assert!(matches!(link.connect(), Err(LinkError::NoDeviceFound)));
    match link.connect() {
        Err(LinkError::Throttled { retry_in }) => assert!(retry_in > Duration::from_secs(50)),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn reconnect_counts() {
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", FakeDevice::new(REPLY));
    let mut link = LinkManager::new(provider, fast_config());

    link.connect().unwrap();
    assert!(link.has_connected());
    link.reconnect().unwrap();
    assert!(link.is_connected());
    assert_eq!(link.stats().reconnects, 1);
}

#[test]
fn probe_leaves_connection_alone() {
    let active = FakeDevice::new(REPLY);
    let other = FakeDevice::new("LS-STRIP-60\n");
    let provider = FakeProvider::new()
        .with_port("/dev/ttyUSB0", active.clone())
        .with_port("/dev/ttyUSB1", other.clone());
    let config = LinkConfig {
        port: Some("/dev/ttyUSB0".into()),
        ..fast_config()
    };
    let mut link = LinkManager::new(provider, config);
    link.connect().unwrap();

    let own = link.probe("/dev/ttyUSB0", DEFAULT_BAUD_RATE).unwrap();
    assert_eq!(own.model, "LS-P4-27");
    assert_eq!(active.opens().len(), 1);
    assert!(matches!(
        link.probe("/dev/ttyUSB0", 9_600),
        Err(LinkError::Open { .. })
    ));

    let remote = link.probe("/dev/ttyUSB1", DEFAULT_BAUD_RATE).unwrap();
    assert_eq!(remote.model, "LS-STRIP-60");
    assert!(link.is_connected());
    assert_eq!(link.port_path(), Some("/dev/ttyUSB0"));
}

#[test]
fn scan_lists_answering_ports() {
    let provider = FakeProvider::new()
        .with_port("/dev/ttyUSB0", FakeDevice::new(REPLY))
        .with_port("/dev/ttyUSB1", FakeDevice::denied())
        .with_port("/dev/ttyUSB2", FakeDevice::new("LS-SPLIT-30\n").with_bauds(&[921_600]));
    let link = LinkManager::new(provider, fast_config());

    let found = link.scan().unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].path, "/dev/ttyUSB0");
    assert_eq!(found[0].baud, DEFAULT_BAUD_RATE);
    assert_eq!(found[1].path, "/dev/ttyUSB2");
    assert_eq!(found[1].baud, 921_600);
    assert_eq!(found[1].identity.model, "LS-SPLIT-30");
}

#[test]
fn failed_health_check_closes_link() {
    let device = FakeDevice::new(REPLY);
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", device.clone());
    let mut link = LinkManager::new(provider, fast_config());
    link.connect().unwrap();

    assert!(link.check_health());
    device.set_pending_output(12);
    assert_eq!(link.pending_output(), Some(12));

    device.fail_health(true);
    assert!(!link.check_health());
    assert!(!link.is_connected());
    assert_eq!(link.status(), LinkStatus::Disconnected);
    assert_eq!(link.pending_output(), None);
}

#[test]
fn writes_frames_and_counts() {
    let device = FakeDevice::new(REPLY);
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", device.clone());
    let mut link = LinkManager::new(provider, fast_config());

    assert!(matches!(link.write_frame(&[1, 2]), Err(LinkError::NotConnected)));
    link.connect().unwrap();

    link.write_frame(&[1, 2, 3]).unwrap();
    link.write_frame(&[4, 5]).unwrap();
    assert_eq!(device.frames(), vec![vec![1, 2, 3], vec![4, 5]]);

    let stats = link.stats();
    assert_eq!(stats.packets_sent, 2);
    assert_eq!(stats.bytes_sent, 5);

    link.counters().reset();
    assert_eq!(link.stats(), LinkStats::default());
}

#[test]
fn unplugged_device_is_removed() {
    let device = FakeDevice::new(REPLY);
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", device.clone());
    let mut link = LinkManager::new(provider, fast_config());
    link.connect().unwrap();

    device.fail_writes(Some(io::ErrorKind::BrokenPipe));
    assert!(matches!(link.write_frame(&[0]), Err(LinkError::DeviceRemoved)));
    assert!(!link.is_connected());
    assert_eq!(link.stats().write_errors, 1);
}

#[test]
fn repeated_write_errors_remove_device() {
    let device = FakeDevice::new(REPLY);
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", device.clone());
    let mut link = LinkManager::new(provider, fast_config());
    link.connect().unwrap();

    device.fail_writes(Some(io::ErrorKind::TimedOut));
    for _ in 1..MAX_CONSECUTIVE_WRITE_ERRORS {
        assert!(matches!(link.write_frame(&[0]), Err(LinkError::Io(_))));
        assert!(link.is_connected());
    }
    assert!(matches!(link.write_frame(&[0]), Err(LinkError::DeviceRemoved)));
    assert!(!link.is_connected());
}

#[test]
fn connect_passes_through_opening_and_handshaking() {
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", FakeDevice::silent());
    let config = LinkConfig {
        port: Some("/dev/ttyUSB0".to_string()),
        baud_rate: Some(115_200),
        handshake_timeout_ms: 300,
        settle_delay_ms: 300,
        ..fast_config()
    };
    let mut link = LinkManager::new(provider, config);
    let watch = link.status_watch();
    assert_eq!(watch.get(), LinkStatus::Disconnected);

    let attempt = thread::spawn(move || {
        let result = link.connect();
        (link, result)
    });
    assert!(wait_until(Duration::from_secs(2), || watch.get() == LinkStatus::Opening));
    assert!(wait_until(Duration::from_secs(2), || {
        watch.get() == LinkStatus::Handshaking
    }));

    let (link, result) = attempt.join().unwrap();
    assert!(matches!(result, Err(LinkError::NoDeviceFound)));
    assert_eq!(link.status(), LinkStatus::Error);
    assert_eq!(watch.get(), LinkStatus::Error);
}

#[test]
fn probe_does_not_change_status() {
    let provider = FakeProvider::new().with_port("/dev/ttyUSB0", FakeDevice::new(REPLY));
    let link = LinkManager::new(provider, fast_config());
    assert!(link.probe("/dev/ttyUSB0", DEFAULT_BAUD_RATE).is_ok());
    assert_eq!(link.status(), LinkStatus::Disconnected);
}
