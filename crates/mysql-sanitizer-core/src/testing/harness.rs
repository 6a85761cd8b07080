//! Test harness for integration testing of the sanitizing proxy.
//!
//! Provides a complete test environment with:
//! - Mock MySQL server
//! - A running proxy listener wired to it
//! - A scripted client for sending commands and reading replies

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::metrics::ProxyMetrics;
use crate::network::ProxyListener;
use crate::protocol::constants::COM_QUERY;
use crate::protocol::packet::{Packet, PacketKind};
use crate::protocol::wire::PayloadReader;
use crate::session::SessionContext;
use crate::upstream::UpstreamStream;

use super::mock_server::{MockMysqlServer, ResponseGenerator, ServerCall};

/// Test harness for integration testing.
pub struct ProxyTestHarness {
    /// The mock server behind the proxy
    mock_server: MockMysqlServer,
    /// Address clients should connect to
    pub proxy_addr: SocketAddr,
    /// Metrics registry shared with the running proxy
    pub metrics: Arc<ProxyMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProxyTestHarness {
    /// Create a new test harness with default configuration.
    ///
    /// Default config: sanitizing enabled, salt `test-salt`, sensitive
    /// patterns `email` and `^secret_`.
    pub async fn new() -> Self {
        TestHarnessBuilder::new().build().await
    }

    /// Access the mock server directly.
    #[must_use]
    pub fn mock_server(&self) -> &MockMysqlServer {
        &self.mock_server
    }

    /// Register a custom response handler for a command byte.
    pub async fn register_response(&self, command: u8, handler: ResponseGenerator) {
        self.mock_server.register_response(command, handler).await;
    }

    /// Get all recorded server calls.
    pub async fn get_server_calls(&self) -> Vec<ServerCall> {
        self.mock_server.get_calls().await
    }

    /// Get server calls filtered by command byte.
    pub async fn get_calls_for_command(&self, command: u8) -> Vec<ServerCall> {
        self.mock_server.get_calls_for_command(command).await
    }

    /// Clear all recorded server calls.
    pub async fn clear_server_calls(&self) {
        self.mock_server.clear_calls().await;
    }

    /// Get the last recorded server call.
    pub async fn last_server_call(&self) -> Option<ServerCall> {
        self.mock_server.get_calls().await.pop()
    }

    /// Connect a client and complete the handshake.
    pub async fn connect_client(&self) -> TestClient {
        let mut client = self.connect_raw_client().await;
        let verdict = client.handshake().await;
        assert_eq!(
            verdict.kind(),
            PacketKind::Ok,
            "handshake should be accepted"
        );
        client
    }

    /// Connect a client without performing the handshake.
    pub async fn connect_raw_client(&self) -> TestClient {
        TestClient::connect(self.proxy_addr).await
    }

    /// Stop only the mock server, leaving the proxy running.
    pub async fn stop_mock_server(&mut self) {
        self.mock_server.stop().await;
    }

    /// Shutdown the test harness.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.mock_server.stop().await;
    }
}

/// Builder for creating a test harness with specific configuration.
pub struct TestHarnessBuilder {
    salt: String,
    sensitive_columns: Vec<String>,
    sanitize_enabled: bool,
    statement_timeout_secs: u64,
}

impl TestHarnessBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            salt: "test-salt".to_string(),
            sensitive_columns: vec!["email".to_string(), "^secret_".to_string()],
            sanitize_enabled: true,
            statement_timeout_secs: 20,
        }
    }

    /// Set the hashing salt.
    #[must_use]
    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    /// Set the sensitive column name patterns.
    #[must_use]
    pub fn sensitive_columns(mut self, patterns: &[&str]) -> Self {
        self.sensitive_columns = patterns.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Enable or disable row rewriting.
    #[must_use]
    pub fn sanitizing(mut self, enabled: bool) -> Self {
        self.sanitize_enabled = enabled;
        self
    }

    /// Set the per-statement execution time limit in seconds.
    #[must_use]
    pub fn statement_timeout_secs(mut self, secs: u64) -> Self {
        self.statement_timeout_secs = secs;
        self
    }

    /// Build the test harness: start the mock server, then bind and run
    /// the proxy against it.
    pub async fn build(self) -> ProxyTestHarness {
        let mut mock_server = MockMysqlServer::new("127.0.0.1:0");
        let server_addr = mock_server
            .start()
            .await
            .expect("Failed to start mock server");

        let mut config = ProxyConfig::default();
        config.listen.address = "127.0.0.1:0".to_string();
        config.listen.max_connections = 16;
        config.listen.session_buffer = 32;
        config.upstream.address = server_addr;
        config.upstream.connect_timeout_ms = 1_000;
        config.upstream.statement_timeout_secs = self.statement_timeout_secs;
        config.sanitize.enabled = self.sanitize_enabled;
        config.sanitize.salt = self.salt;
        config.sanitize.sensitive_columns = self.sensitive_columns;

        let context =
            SessionContext::from_config(&config).expect("Failed to build session context");
        let metrics = Arc::new(ProxyMetrics::new());

        let listener = ProxyListener::bind(&config.listen, context, Arc::clone(&metrics))
            .await
            .expect("Failed to bind proxy listener");
        let proxy_addr = listener.local_addr();
        let shutdown_tx = listener.shutdown_handle();
        tokio::spawn(async move {
            let _ = listener.run().await;
        });

        ProxyTestHarness {
            mock_server,
            proxy_addr,
            metrics,
            shutdown_tx,
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A scripted MySQL client for driving the proxy in tests.
pub struct TestClient {
    stream: UpstreamStream,
}

/// One complete reply to a text-protocol query.
pub enum QueryReply {
    /// The statement produced no result set.
    Terminal(Packet),
    /// The statement produced a full result set.
    ResultSet(TextResultSet),
}

/// A text-protocol result set split into its packet groups.
pub struct TextResultSet {
    /// Column definition packets, in order.
    pub columns: Vec<Packet>,
    /// Row packets, in order, excluding the terminating packet.
    pub rows: Vec<Packet>,
    /// The packet that closed the result set.
    pub terminal: Packet,
}

impl TestClient {
    /// Connect to the given proxy address.
    ///
    /// # Panics
    ///
    /// Panics if the connection fails.
    pub async fn connect(address: SocketAddr) -> Self {
        let stream = UpstreamStream::connect(&address.to_string(), Duration::from_secs(1))
            .await
            .expect("Failed to connect to the proxy");
        Self { stream }
    }

    /// Read the server greeting, answer it, and return the verdict.
    ///
    /// # Panics
    ///
    /// Panics if the greeting does not arrive or is not protocol
    /// version 10.
    pub async fn handshake(&mut self) -> Packet {
        let greeting = self.read_packet().await;
        assert_eq!(greeting.payload[0], 0x0A, "greeting should be protocol 10");

        self.write_packet(&Packet {
            sequence_id: greeting.sequence_id.wrapping_add(1),
            payload: vec![0x85, 0xA6, 0x03, 0x00],
        })
        .await;

        self.read_packet().await
    }

    /// Send a command packet with sequence id zero.
    pub async fn send_command(&mut self, command: u8, argument: &[u8]) {
        let mut payload = Vec::with_capacity(1 + argument.len());
        payload.push(command);
        payload.extend_from_slice(argument);
        self.write_packet(&Packet {
            sequence_id: 0,
            payload,
        })
        .await;
    }

    /// Send a query and read the complete reply.
    ///
    /// # Panics
    ///
    /// Panics on connection errors or a malformed result-set shape.
    pub async fn query(&mut self, sql: &str) -> QueryReply {
        self.send_command(COM_QUERY, sql.as_bytes()).await;

        let first = self.read_packet().await;
        if first.is_terminal() {
            return QueryReply::Terminal(first);
        }

        let column_count = {
            let mut reader = PayloadReader::new(&first.payload);
            reader
                .read_lenenc_int()
                .expect("column count should decode")
        };

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            columns.push(self.read_packet().await);
        }
        let columns_end = self.read_packet().await;
        assert_eq!(
            columns_end.kind(),
            PacketKind::Eof,
            "column definitions should end with EOF"
        );

        let mut rows = Vec::new();
        loop {
            let packet = self.read_packet().await;
            if packet.is_terminal() {
                return QueryReply::ResultSet(TextResultSet {
                    columns,
                    rows,
                    terminal: packet,
                });
            }
            rows.push(packet);
        }
    }

    /// Read one packet.
    ///
    /// # Panics
    ///
    /// Panics if the connection yields an error.
    pub async fn read_packet(&mut self) -> Packet {
        self.stream
            .next_packet()
            .await
            .expect("Failed to read a packet from the proxy")
    }

    /// Try to read one packet, returning None when the connection is
    /// closed.
    pub async fn try_read_packet(&mut self) -> Option<Packet> {
        self.stream.next_packet().await.ok()
    }

    /// Write one packet.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub async fn write_packet(&mut self, packet: &Packet) {
        self.stream
            .write_packet(packet)
            .await
            .expect("Failed to send a packet to the proxy");
    }
}

/// Decode the fields of a text-protocol row packet.
///
/// # Panics
///
/// Panics if the payload is not a well-formed row with exactly `count`
/// fields.
#[must_use]
pub fn row_fields(packet: &Packet, count: usize) -> Vec<Option<Vec<u8>>> {
    let mut reader = PayloadReader::new(&packet.payload);
    let fields: Vec<Option<Vec<u8>>> = (0..count)
        .map(|_| {
            reader
                .read_string_or_null()
                .expect("row field should decode")
                .map(|v| v.to_vec())
        })
        .collect();
    assert!(reader.is_empty(), "row should have no trailing bytes");
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::COM_PING;

    #[tokio::test]
    async fn test_harness_creation() {
        let mut harness = ProxyTestHarness::new().await;

        assert_ne!(harness.proxy_addr.port(), 0);
        assert!(!harness.mock_server().address().is_empty());

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_harness_client_round_trip() {
        let mut harness = ProxyTestHarness::new().await;

        let mut client = harness.connect_client().await;
        client.send_command(COM_PING, &[]).await;
        let reply = client.read_packet().await;
        assert_eq!(reply.kind(), PacketKind::Ok);

        let calls = harness.get_calls_for_command(COM_PING).await;
        assert_eq!(calls.len(), 1);

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_harness_builder() {
        let mut harness = TestHarnessBuilder::new()
            .salt("pepper")
            .sensitive_columns(&["^card_"])
            .statement_timeout_secs(5)
            .build()
            .await;

        let mut client = harness.connect_client().await;
        client.send_command(COM_PING, &[]).await;
        client.read_packet().await;

        let queries = harness.get_calls_for_command(COM_QUERY).await;
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].query_text().as_deref(),
            Some("SET SESSION max_execution_time = 5000")
        );

        harness.shutdown().await;
    }
}
