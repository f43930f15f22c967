//! End-to-end checks of the handshake-then-exchange protocol.
//!
//! The peer is an in-memory `MockPort`; only the missing-device case goes
//! through the OS serial backend.

use rig_serial::exercise::{self, StepperMode};
use rig_serial::serial::{CancelToken, ChannelState, MockPort};
use rig_serial::{ChannelError, PortConfig, Reply, SerialLineChannel};
use std::io::Cursor;
use std::time::{Duration, Instant};

fn open_mock(port: &MockPort, timeout: Duration) -> SerialLineChannel<MockPort> {
    SerialLineChannel::from_port("/dev/ttyACM0", port.clone(), timeout)
}

#[test]
fn ready_then_echo_42() {
    let port = MockPort::echoing();
    port.push_line("ready");
    let mut channel = open_mock(&port, Duration::from_secs(5));

    channel.await_handshake(Duration::from_secs(5)).unwrap();
    channel.send_line("42").unwrap();

    assert_eq!(channel.receive_line().unwrap(), Reply::Line("42".to_string()));
    assert_eq!(port.written(), b"42\n");
}

#[test]
fn echo_round_trip_is_identity() {
    let payloads = ["", "q", "-1200", "hello world", "tab\there", "ünïcødé", "mid\rline"];
    let port = MockPort::echoing();
    port.push_line("ready");
    let mut channel = open_mock(&port, Duration::from_millis(500));
    channel.await_handshake(Duration::from_secs(1)).unwrap();

    for payload in payloads {
        channel.send_line(payload).unwrap();
        assert_eq!(
            channel.receive_line().unwrap(),
            Reply::Line(payload.to_string()),
            "payload {:?}",
            payload
        );
    }
}

#[test]
fn payloads_that_cannot_round_trip_are_rejected() {
    let port = MockPort::echoing();
    port.push_line("ready");
    let mut channel = open_mock(&port, Duration::from_millis(200));
    channel.await_handshake(Duration::from_secs(1)).unwrap();

    for payload in ["abc\r", "\r", "a\nb"] {
        let err = channel.send_line(payload).unwrap_err();
        assert!(
            matches!(err, ChannelError::InvalidPayload(_)),
            "payload {:?}",
            payload
        );
    }
    assert!(port.written().is_empty());
}

#[test]
fn unbounded_timeouts_do_not_overflow() {
    let port = MockPort::echoing();
    port.push_line("ready");
    let mut channel = open_mock(&port, Duration::MAX);

    channel.await_handshake(Duration::MAX).unwrap();
    channel.send_line("42").unwrap();
    assert_eq!(channel.receive_line().unwrap(), Reply::Line("42".to_string()));
}

#[test]
fn cancelled_token_aborts_handshake() {
    let port = MockPort::new();
    let token = CancelToken::new();
    let mut channel = open_mock(&port, Duration::from_secs(5)).with_cancel_token(token.clone());
    token.cancel();

    let err = channel.await_handshake(Duration::from_secs(30)).unwrap_err();
    assert!(matches!(err, ChannelError::Cancelled));
    assert_eq!(channel.state(), ChannelState::Open { handshake: false });
}

#[test]
fn handshake_line_is_not_seen_again() {
    let port = MockPort::new();
    port.push_bytes(b"Arduino ready\r\nstatus ok\r\n");
    let mut channel = open_mock(&port, Duration::from_millis(100));

    channel.await_handshake(Duration::from_secs(1)).unwrap();
    assert_eq!(
        channel.receive_line().unwrap(),
        Reply::Line("status ok".to_string())
    );
}

#[test]
fn silent_peer_times_out_after_read_timeout() {
    let timeout = Duration::from_millis(150);
    let port = MockPort::new();
    let mut channel = open_mock(&port, timeout);

    let start = Instant::now();
    let reply = channel.receive_line().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(reply, Reply::TimedOut);
    assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
    assert!(elapsed < timeout * 10, "blocked for {:?}", elapsed);
}

#[test]
fn silent_peer_fails_handshake() {
    let port = MockPort::new();
    let mut channel = open_mock(&port, Duration::from_secs(5));

    let start = Instant::now();
    let err = channel.await_handshake(Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, ChannelError::HandshakeTimeout { .. }));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(channel.state(), ChannelState::Open { handshake: false });
}

#[test]
fn close_twice_releases_once() {
    let port = MockPort::new();
    let mut channel = open_mock(&port, Duration::from_millis(10));

    channel.close();
    channel.close();
    drop(channel);

    assert!(port.is_released());
}

#[test]
fn missing_device_is_connection_error() {
    let err = SerialLineChannel::open(
        "/dev/rig-serial-missing-device",
        115200,
        Duration::from_secs(5),
    )
    .err()
    .expect("open must fail");

    assert!(matches!(err, ChannelError::Connection { .. }));
    assert!(err.to_string().contains("/dev/rig-serial-missing-device"));
}

#[test]
fn missing_device_with_full_config() {
    let config = PortConfig::new("/dev/rig-serial-missing-device")
        .with_baud_rate(9600)
        .with_clear_input_on_open(true);
    assert!(matches!(
        SerialLineChannel::open_with(&config).err(),
        Some(ChannelError::Connection { .. })
    ));
}

#[test]
fn stepper_console_over_handshaken_channel() {
    let port = MockPort::with_responder(|line| match line {
        "" => vec!["homed".to_string()],
        "q" => vec!["bye".to_string()],
        steps => vec![format!("stepped {}", steps)],
    });
    port.push_line("stepper ready");
    let mut channel = open_mock(&port, Duration::from_millis(200));
    channel.await_handshake(Duration::from_secs(1)).unwrap();

    let mut output = Vec::new();
    let session = exercise::run_stepper_console(
        &mut channel,
        StepperMode::Position,
        Cursor::new("400\n\nq\n"),
        &mut output,
    )
    .unwrap();

    let text = String::from_utf8(output).unwrap();
    assert_eq!(session.sent, 3);
    assert_eq!(session.timeouts, 0);
    assert!(text.contains("stepped 400"));
    assert!(text.contains("homed"));
    assert!(text.contains("bye"));
}
