//! Read path tests
//!
//! These tests verify the peek-buffer state machine:
//! - `available()` accounting with and without a buffered byte
//! - `peek()` / `read()` interplay
//! - engine failures forcing a disconnect
//! - zero-length reads as a health probe
//! - writes on live and dead sessions

mod common;

use common::{Call, ScriptedEngine};
use securestream::engine::EngineError;
use securestream::{ClientConfig, Error, SecureClient};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

fn connected_client(inbound: &[u8]) -> SecureClient<ScriptedEngine> {
    let mut client = SecureClient::new(ScriptedEngine::with_inbound(inbound));
    client.connect("example.com", 443).unwrap();
    client
}

#[test]
fn test_psk_session_read_failure_scenario() {
    common::init_logging();
    let mut client = SecureClient::new(ScriptedEngine::with_inbound(b"pending"));
    client.set_pre_shared_key("id1", "deadbeef");

    client.connect("10.0.0.5", 443).unwrap();
    assert!(client.connected());
    assert!(client.get_ref().handshakes()[0].is_psk());

    client.get_mut().recv_error = Some(EngineError::new(-2, "scripted"));
    let mut buf = [0u8; 10];
    let err = client.read(&mut buf).unwrap_err();
    assert!(matches!(err, Error::Read { code: -2 }));
    assert_eq!(err.code(), -2);

    assert!(!client.connected());
    assert_eq!(client.last_error().unwrap().code, -2);
}

#[test]
fn test_available_counts_peeked_byte() {
    let mut client = connected_client(b"abc");
    assert_eq!(client.available().unwrap(), 3);

    assert_eq!(client.peek().unwrap(), b'a');
    // one byte moved into the peek buffer
    assert_eq!(client.available().unwrap(), 3);
}

#[test]
fn test_peek_then_read_yields_same_byte() {
    let mut client = connected_client(b"xy");

    assert_eq!(client.peek().unwrap(), b'x');
    assert_eq!(client.peek().unwrap(), b'x');

    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'x');

    assert_eq!(client.peek().unwrap(), b'y');
}

#[test]
fn test_read_merges_peeked_byte_with_engine_data() {
    let mut client = connected_client(b"hello");
    assert_eq!(client.peek().unwrap(), b'h');

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf[..n], b"hello");

    // the engine was asked only for what remained after the peeked byte
    assert!(client.get_ref().calls.contains(&Call::Recv(15)));
}

#[test]
fn test_peeked_byte_alone_skips_engine() {
    let mut client = connected_client(b"z");
    assert_eq!(client.peek().unwrap(), b'z');

    let recvs_before = client.get_ref().count(|c| matches!(c, Call::Recv(_)));
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'z');

    let recvs_after = client.get_ref().count(|c| matches!(c, Call::Recv(_)));
    assert_eq!(recvs_before, recvs_after);
}

#[test]
fn test_read_without_data() {
    let mut client = connected_client(b"");
    let mut buf = [0u8; 4];
    let err = client.read(&mut buf).unwrap_err();
    assert!(matches!(err, Error::NoData));
    assert_eq!(err.code(), -1);
    assert!(client.connected());
}

#[test]
fn test_zero_length_read() {
    let mut client = connected_client(b"");
    assert_eq!(client.read(&mut [0u8; 0]).unwrap(), 0);
    assert!(client.connected());

    let mut client = connected_client(b"data");
    assert_eq!(client.read(&mut [0u8; 0]).unwrap(), 0);
    assert_eq!(client.available().unwrap(), 4);
    assert_eq!(client.get_ref().count(|c| matches!(c, Call::Recv(_))), 0);
}

#[test]
fn test_connected_probe_notices_failure() {
    let mut client = connected_client(b"");
    client.get_mut().readable_error = Some(EngineError::new(-0x7880, "peer closed"));

    assert!(!client.connected());
    assert_eq!(client.get_ref().count(|c| *c == Call::CloseTransport), 1);
    assert_eq!(client.last_error().unwrap().code, -0x7880);
}

#[test]
fn test_available_failure_propagates_code() {
    let mut client = connected_client(b"");
    client.get_mut().readable_error = Some(EngineError::new(-0x50, "reset"));

    let err = client.available().unwrap_err();
    assert!(matches!(err, Error::Read { code: -0x50 }));
    assert_eq!(client.available().unwrap(), 0);
}

#[test]
fn test_read_after_failed_readiness_reports_no_data() {
    let mut client = connected_client(b"");
    client.get_mut().readable_error = Some(EngineError::new(-0x50, "reset"));

    let err = client.read(&mut [0u8; 4]).unwrap_err();
    assert!(matches!(err, Error::NoData));
    assert_eq!(err.code(), -1);

    // the engine code is still reported through last_error
    assert!(!client.connected());
    assert_eq!(client.last_error().unwrap().code, -0x50);
    assert_eq!(client.get_ref().count(|c| matches!(c, Call::Recv(_))), 0);
}

#[test]
fn test_peeked_byte_survives_forced_teardown() {
    let mut client = connected_client(b"q");
    assert_eq!(client.peek().unwrap(), b'q');

    client.get_mut().readable_error = Some(EngineError::new(-0x50, "reset"));
    assert_eq!(client.available().unwrap(), 1);
    assert!(!client.connected());

    // the buffered byte can still be drained without touching the engine
    let io_before = client.get_ref().io_calls();
    assert_eq!(client.read_byte().unwrap(), b'q');
    assert_eq!(client.get_ref().io_calls(), io_before);
    assert!(matches!(client.read_byte(), Err(Error::NoData)));
}

#[test]
fn test_recv_failure_after_peeked_byte_reports_the_byte() {
    let mut client = connected_client(b"ab");
    assert_eq!(client.peek().unwrap(), b'a');
    client.get_mut().recv_error = Some(EngineError::new(-0x4C, "recv"));

    let mut buf = [0u8; 4];
    assert_eq!(client.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'a');
    assert!(!client.connected());
}

#[test]
fn test_stop_clears_peek_buffer() {
    let mut client = connected_client(b"abc");
    assert_eq!(client.peek().unwrap(), b'a');

    client.stop();

    assert_eq!(client.available().unwrap(), 0);
    assert!(!client.connected());
    assert!(matches!(client.read_byte(), Err(Error::NoData)));
    assert_eq!(client.read_byte().unwrap_err().code(), -1);
}

#[test]
fn test_disconnected_client_never_queries_engine() {
    let mut client = SecureClient::new(ScriptedEngine::with_inbound(b"unused"));

    assert_eq!(client.available().unwrap(), 0);
    assert!(client.read(&mut [0u8; 4]).is_err());
    assert!(matches!(client.peek(), Err(Error::NotConnected)));
    assert_eq!(client.write(b"data").unwrap(), 0);

    assert_eq!(client.get_ref().io_calls(), 0);
}

#[test]
fn test_peek_times_out() {
    let config = ClientConfig::builder()
        .read_timeout(Duration::from_millis(50))
        .build();
    let mut client = SecureClient::with_config(ScriptedEngine::new(), config);
    client.connect("example.com", 443).unwrap();

    let start = Instant::now();
    assert!(matches!(client.peek(), Err(Error::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(client.connected());
}

#[test]
fn test_peek_waits_once_for_readiness() {
    let config = ClientConfig::builder()
        .read_timeout(Duration::from_millis(200))
        .build();
    let mut client = SecureClient::with_config(ScriptedEngine::new(), config);
    client.connect("example.com", 443).unwrap();

    assert!(matches!(client.peek(), Err(Error::Timeout)));

    let engine = client.get_ref();
    assert_eq!(engine.count(|c| matches!(c, Call::WaitReadable(_))), 1);
    assert_eq!(engine.count(|c| *c == Call::Readable), 0);
    assert!(engine.calls.iter().any(|c| matches!(
        c,
        Call::WaitReadable(t) if *t <= Duration::from_millis(200) && *t > Duration::from_millis(100)
    )));
}

#[test]
fn test_peek_after_readiness_delivers_byte() {
    let mut client = connected_client(b"k");
    assert_eq!(client.peek().unwrap(), b'k');

    let engine = client.get_ref();
    assert_eq!(engine.count(|c| matches!(c, Call::WaitReadable(_))), 1);
    assert_eq!(engine.count(|c| matches!(c, Call::Recv(_))), 1);
}

#[test]
fn test_peek_wait_failure_tears_down() {
    let mut client = connected_client(b"");
    client.get_mut().wait_error = Some(EngineError::new(-0x42, "poll"));

    let err = client.peek().unwrap_err();
    assert!(matches!(err, Error::Read { code: -0x42 }));
    assert!(!client.connected());
    assert_eq!(client.last_error().unwrap().code, -0x42);
    assert!(matches!(client.peek(), Err(Error::NotConnected)));
}

#[test]
fn test_write() {
    let mut client = connected_client(b"");
    assert_eq!(client.write(b"hello").unwrap(), 5);
    assert_eq!(client.write_byte(b'!').unwrap(), 1);
    assert_eq!(client.get_ref().outbound, b"hello!");
}

#[test]
fn test_partial_write_is_reported() {
    let mut client = connected_client(b"");
    client.get_mut().send_limit = Some(3);
    assert_eq!(client.write(b"hello").unwrap(), 3);
}

#[test]
fn test_write_failure_tears_down() {
    let mut client = connected_client(b"");
    client.get_mut().send_error = Some(EngineError::new(-0x4E, "send"));

    let err = client.write(b"hello").unwrap_err();
    assert!(matches!(err, Error::Write { code: -0x4E }));
    assert!(!client.connected());
    assert_eq!(client.last_error().unwrap().code, -0x4E);

    // nothing more reaches the engine
    let sends = client.get_ref().count(|c| matches!(c, Call::Send(_)));
    assert_eq!(client.write(b"again").unwrap(), 0);
    assert_eq!(client.get_ref().count(|c| matches!(c, Call::Send(_))), sends);
}

#[test]
fn test_io_traits() {
    let mut client = connected_client(b"stream data");

    let mut buf = [0u8; 6];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"stream");

    let mut rest = Vec::new();
    let n = Read::read(&mut client, &mut [0u8; 32]).unwrap();
    assert_eq!(n, 5);

    client.write_all(b"reply").unwrap();
    client.flush().unwrap();
    assert_eq!(client.get_ref().outbound, b"reply");

    client.stop();
    assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);
    assert!(Write::write(&mut client, b"x").is_err());
}
