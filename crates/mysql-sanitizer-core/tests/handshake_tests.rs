//! Integration tests for the session handshake.
//!
//! The proxy relays the greeting and the client's credentials verbatim,
//! installs the server-side statement time limit once the server accepts
//! the session, and only then lets the authentication verdict through.

use std::time::Duration;

use tokio::time::timeout;

use mysql_sanitizer_core::protocol::constants::COM_QUERY;
use mysql_sanitizer_core::protocol::{Packet, PacketKind};
use mysql_sanitizer_core::testing::{ProxyTestHarness, TestHarnessBuilder};

#[tokio::test]
async fn test_handshake_relayed_and_session_established() {
    let mut harness = ProxyTestHarness::new().await;

    let mut client = harness.connect_raw_client().await;
    let verdict = client.handshake().await;
    assert_eq!(verdict.kind(), PacketKind::Ok);

    // The proxy opened the session with exactly one statement of its own.
    let queries = harness.get_calls_for_command(COM_QUERY).await;
    assert_eq!(queries.len(), 1);
    assert_eq!(
        queries[0].query_text().as_deref(),
        Some("SET SESSION max_execution_time = 20000")
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_time_limit_installed_before_any_client_command() {
    let mut harness = TestHarnessBuilder::new()
        .statement_timeout_secs(7)
        .build()
        .await;

    let _client = harness.connect_client().await;

    // The very first packet the server saw after authentication must be
    // the time-limit statement, before any client traffic.
    let calls = harness.get_server_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command, COM_QUERY);
    assert_eq!(
        calls[0].query_text().as_deref(),
        Some("SET SESSION max_execution_time = 7000")
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_auth_failure_forwarded_then_connection_closed() {
    let mut harness = ProxyTestHarness::new().await;
    harness
        .mock_server()
        .set_auth_verdict(Packet::err(1045, "28000", "Access denied for user", 2))
        .await;

    let mut client = harness.connect_raw_client().await;
    let verdict = client.handshake().await;

    // The client sees the real error packet, untouched.
    assert_eq!(verdict.kind(), PacketKind::Err);
    assert_eq!(
        u16::from_le_bytes([verdict.payload[1], verdict.payload[2]]),
        1045
    );

    // After forwarding the rejection the proxy ends the session.
    let next = timeout(Duration::from_secs(2), client.try_read_packet())
        .await
        .expect("connection should close promptly");
    assert!(next.is_none(), "no further packets after a rejected handshake");

    // The rejected session never got the time-limit statement.
    assert!(harness.get_calls_for_command(COM_QUERY).await.is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rejected_time_limit_terminates_session() {
    let mut harness = ProxyTestHarness::new().await;
    harness
        .mock_server()
        .set_timeout_install_response(Packet::err(1193, "HY000", "Unknown system variable", 1))
        .await;

    let mut client = harness.connect_raw_client().await;
    let greeting = client.read_packet().await;
    assert_eq!(greeting.payload[0], 0x0A);
    client
        .write_packet(&Packet {
            sequence_id: 1,
            payload: vec![0x85, 0xA6, 0x03, 0x00],
        })
        .await;

    // The session dies before the authentication verdict is forwarded.
    let next = timeout(Duration::from_secs(2), client.try_read_packet())
        .await
        .expect("connection should close promptly");
    assert!(next.is_none(), "session must not come up without the time limit");

    harness.shutdown().await;
}
