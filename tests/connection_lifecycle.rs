//! Connection lifecycle against an in-memory device

mod common;

use common::{next_event, MockDevice};
use portpilot_core::{
    Connection, ConnectionEvent, ConnectionOptions, ConnectionRegistry, ConnectionState, Direction, TransportConfig,
    TransportError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

const PORT: &str = "/dev/ttyMOCK0";

fn options() -> ConnectionOptions {
    ConnectionOptions {
        poll_interval: Duration::from_millis(1),
        close_grace: Duration::from_millis(500),
        ..ConnectionOptions::default()
    }
}

fn config() -> TransportConfig {
    TransportConfig::new(PORT, 115_200)
}

#[tokio::test]
async fn open_read_send_close() {
    let device = MockDevice::new();
    let connection = Connection::new(PORT, device.opener(), options());
    let mut rx = connection.subscribe();
    assert_eq!(connection.state(), ConnectionState::Idle);

    assert_ok!(connection.open(config()));
    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::State(ConnectionState::Open)));
    assert!(connection.session().is_some_and(|s| s.end_time.is_none() && s.baud == 115_200));

    device.inject(&[0x01, 0x03, 0x02]);
    match next_event(&mut rx).await {
        ConnectionEvent::Data(event) => {
            assert_eq!(event.direction, Direction::Rx);
            assert_eq!(&event.bytes[..], &[0x01, 0x03, 0x02]);
        }
        other => panic!("expected RX data, got {other:?}"),
    }

    assert_ok!(connection.send(b"PING"));
    match next_event(&mut rx).await {
        ConnectionEvent::Data(event) => {
            assert_eq!(event.direction, Direction::Tx);
            assert_eq!(&event.bytes[..], b"PING");
        }
        other => panic!("expected TX data, got {other:?}"),
    }
    assert_eq!(device.written(), b"PING");

    let stats = connection.stats();
    assert_eq!(stats.bytes_sent, 4);
    assert_eq!(stats.bytes_received, 3);
    assert_eq!(stats.chunks_sent, 1);

    connection.close();
    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::State(ConnectionState::Closing)));
    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::State(ConnectionState::Closed)));
    assert!(connection.session().is_some_and(|s| s.end_time.is_some()));
    assert!(matches!(connection.send(b"x"), Err(TransportError::NotConnected)));
}

#[tokio::test]
async fn second_open_is_rejected_and_reopen_works() {
    let device = MockDevice::new();
    let connection = Connection::new(PORT, device.opener(), options());

    assert_ok!(connection.open(config()));
    assert!(matches!(connection.open(config()), Err(TransportError::AlreadyOpen(_))));
    let first = connection.session().map(|s| s.session_id);

    connection.close();
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);

    assert_ok!(connection.open(config()));
    assert!(connection.is_open());
    assert_eq!(device.open_count(), 2);
    assert_ne!(connection.session().map(|s| s.session_id), first);
    connection.close();
}

#[tokio::test]
async fn config_for_other_port_is_rejected() {
    let device = MockDevice::new();
    let connection = Connection::new(PORT, device.opener(), options());

    let err = assert_err!(connection.open(TransportConfig::new("COM1", 9600)));
    assert!(matches!(err, TransportError::InvalidConfiguration(_)));
    assert_eq!(connection.state(), ConnectionState::Idle);
    assert_eq!(device.open_count(), 0);
}

#[tokio::test]
async fn read_failure_moves_to_failed() {
    let device = MockDevice::new();
    let connection = Connection::new(PORT, device.opener(), options());
    let mut rx = connection.subscribe();
    assert_ok!(connection.open(config()));
    let _ = next_event(&mut rx).await;

    device.fail_reads();
    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::Error(reason) if reason.contains("unplugged")));
    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::State(ConnectionState::Failed(_))));
    assert!(matches!(connection.send(b"x"), Err(TransportError::NotConnected)));
    assert_eq!(connection.stats().errors, 1);

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn write_failure_moves_to_failed() {
    let device = MockDevice::new();
    let connection = Connection::new(PORT, device.opener(), options());
    assert_ok!(connection.open(config()));

    device.fail_writes();
    assert!(matches!(connection.send(b"x"), Err(TransportError::IoError(_))));
    assert!(matches!(connection.state(), ConnectionState::Failed(_)));

    assert_eq!(connection.stats().errors, 1);

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn registry_shares_one_instance_per_port() {
    let device = MockDevice::new();
    let registry = ConnectionRegistry::new(device.opener(), options());

    let a = registry.create(&config());
    let b = registry.create(&config());
    assert!(Arc::ptr_eq(&a, &b));

    let opened = assert_ok!(registry.open(config()));
    assert!(Arc::ptr_eq(&a, &opened));
    assert!(a.is_open());
    assert_eq!(registry.ids(), vec![PORT.to_string()]);

    registry.close_all();
    assert_eq!(a.state(), ConnectionState::Closed);

    let removed = registry.remove(PORT);
    assert!(removed.is_some());
    assert!(registry.get(PORT).is_none());
}

#[tokio::test]
async fn stuck_reader_is_reported_and_blocks_reopen_until_it_exits() {
    let device = MockDevice::new();
    let options = ConnectionOptions {
        close_grace: Duration::from_millis(100),
        ..options()
    };
    let connection = Connection::new(PORT, device.opener(), options);
    let mut rx = connection.subscribe();
    assert_ok!(connection.open(config()));
    assert!(matches!(next_event(&mut rx).await, ConnectionEvent::State(ConnectionState::Open)));

    device.stall();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    connection.close();
    let took = started.elapsed();
    assert!(took >= Duration::from_millis(100), "close returned after {took:?}");
    assert!(took < Duration::from_secs(1), "close blocked for {took:?}");
    assert_eq!(connection.state(), ConnectionState::Closed);

    let mut errors = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ConnectionEvent::Error(message) = event {
            errors.push(message);
        }
    }
    assert!(errors.iter().any(|m| m.contains("did not stop") && m.contains("leaked")), "{errors:?}");
    assert!(errors.iter().any(|m| m.contains("held by a stuck reader")), "{errors:?}");

    let err = assert_err!(connection.open(config()));
    assert!(matches!(&err, TransportError::ConnectionFailed(m) if m.contains("still running")), "{err}");
    assert_eq!(device.open_count(), 1);

    device.release();
    let mut reopened = false;
    for _ in 0..200 {
        if connection.open(config()).is_ok() {
            reopened = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reopened);
    assert!(connection.is_open());
    assert_eq!(device.open_count(), 2);
    connection.close();
}
