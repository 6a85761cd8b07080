//! Integration tests for command-phase relaying.
//!
//! Supported commands pass through verbatim. Anything else is answered
//! locally with an error packet and never reaches the server.

use std::time::Duration;

use tokio::time::timeout;

use mysql_sanitizer_core::protocol::constants::{
    COM_FIELD_LIST, COM_INIT_DB, COM_PING, COM_PROCESS_KILL, COM_QUIT, COM_STATISTICS,
};
use mysql_sanitizer_core::protocol::PacketKind;
use mysql_sanitizer_core::testing::{responses, ProxyTestHarness};

/// COM_STMT_PREPARE, the canonical command outside the supported set.
const COM_STMT_PREPARE: u8 = 0x16;

#[tokio::test]
async fn test_unsupported_command_answered_without_server_contact() {
    let mut harness = ProxyTestHarness::new().await;

    let mut client = harness.connect_client().await;
    harness.clear_server_calls().await;

    client.send_command(COM_STMT_PREPARE, b"SELECT ?").await;
    let reply = client.read_packet().await;

    // Synthesized error packet: header, code 1002, SQL state marker.
    assert_eq!(reply.kind(), PacketKind::Err);
    assert_eq!(reply.sequence_id, 1);
    assert_eq!(reply.payload[0], 0xFF);
    assert_eq!(u16::from_le_bytes([reply.payload[1], reply.payload[2]]), 1002);
    assert_eq!(reply.payload[3], b'#');
    assert_eq!(&reply.payload[4..9], b"HY000");
    let message = String::from_utf8_lossy(&reply.payload[9..]);
    assert!(
        message.contains("0x16"),
        "message should name the command byte: {message}"
    );

    // The server never saw the command.
    assert!(harness.get_server_calls().await.is_empty());

    // The session is still alive afterwards.
    client.send_command(COM_PING, &[]).await;
    let pong = client.read_packet().await;
    assert_eq!(pong.kind(), PacketKind::Ok);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_supported_commands_relayed_verbatim() {
    let mut harness = ProxyTestHarness::new().await;
    harness
        .register_response(COM_STATISTICS, responses::ok_response())
        .await;

    let mut client = harness.connect_client().await;
    harness.clear_server_calls().await;

    client.send_command(COM_PING, &[]).await;
    assert_eq!(client.read_packet().await.kind(), PacketKind::Ok);

    client.send_command(COM_INIT_DB, b"analytics").await;
    assert_eq!(client.read_packet().await.kind(), PacketKind::Ok);

    client.send_command(COM_PROCESS_KILL, &42u32.to_le_bytes()).await;
    assert_eq!(client.read_packet().await.kind(), PacketKind::Ok);

    client.send_command(COM_STATISTICS, &[]).await;
    assert_eq!(client.read_packet().await.kind(), PacketKind::Ok);

    let calls = harness.get_server_calls().await;
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].command, COM_PING);
    assert_eq!(calls[1].command, COM_INIT_DB);
    assert_eq!(calls[1].argument(), b"analytics");
    assert_eq!(calls[2].command, COM_PROCESS_KILL);
    assert_eq!(calls[2].argument(), 42u32.to_le_bytes());
    assert_eq!(calls[3].command, COM_STATISTICS);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_field_list_reply_relayed_until_terminal() {
    let mut harness = ProxyTestHarness::new().await;
    harness
        .register_response(
            COM_FIELD_LIST,
            responses::field_list_response(&[("email", 255), ("id", 11)]),
        )
        .await;

    let mut client = harness.connect_client().await;
    harness.clear_server_calls().await;

    client.send_command(COM_FIELD_LIST, b"users\0").await;

    // Two column definitions, then the EOF that closes the reply.
    assert_eq!(client.read_packet().await.kind(), PacketKind::Data);
    assert_eq!(client.read_packet().await.kind(), PacketKind::Data);
    assert_eq!(client.read_packet().await.kind(), PacketKind::Eof);

    let calls = harness.get_server_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command, COM_FIELD_LIST);
    assert_eq!(calls[0].argument(), b"users\0");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_quit_is_forwarded_and_ends_the_session() {
    let mut harness = ProxyTestHarness::new().await;

    let mut client = harness.connect_client().await;
    harness.clear_server_calls().await;

    client.send_command(COM_QUIT, &[]).await;

    // The server closes its side; the proxy tears the session down and
    // the client socket follows.
    let next = timeout(Duration::from_secs(2), client.try_read_packet())
        .await
        .expect("connection should close promptly");
    assert!(next.is_none());

    let calls = harness.get_server_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command, COM_QUIT);

    harness.shutdown().await;
}
