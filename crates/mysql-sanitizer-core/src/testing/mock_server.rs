//! Mock MySQL server for integration testing.
//!
//! A lightweight scripted server that:
//! - Greets connecting clients and accepts (or rejects) authentication
//! - Records every command packet received
//! - Returns configurable multi-packet responses per command byte

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};

use crate::protocol::constants::{COM_QUERY, COM_QUIT};
use crate::protocol::packet::{classify, Packet, PacketKind};
use crate::protocol::wire::{write_lenenc_int, write_string_or_null};
use crate::upstream::UpstreamStream;

/// A recorded command-phase packet.
#[derive(Debug, Clone)]
pub struct ServerCall {
    /// The command byte (first payload byte).
    pub command: u8,
    /// The packet's sequence id.
    pub sequence_id: u8,
    /// The complete payload including the command byte.
    pub payload: Vec<u8>,
}

impl ServerCall {
    /// The payload after the command byte.
    #[must_use]
    pub fn argument(&self) -> &[u8] {
        &self.payload[1..]
    }

    /// The statement text for query commands.
    #[must_use]
    pub fn query_text(&self) -> Option<String> {
        (self.command == COM_QUERY)
            .then(|| String::from_utf8_lossy(self.argument()).into_owned())
    }
}

/// Response generator function type.
pub type ResponseGenerator = Arc<dyn Fn(&ServerCall) -> Vec<Packet> + Send + Sync>;

/// Mock MySQL server for testing.
pub struct MockMysqlServer {
    address: String,
    listener: Option<TcpListener>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    call_log: Arc<RwLock<Vec<ServerCall>>>,
    response_handlers: Arc<RwLock<HashMap<u8, ResponseGenerator>>>,
    auth_verdict: Arc<RwLock<Packet>>,
    timeout_install_response: Arc<RwLock<Option<Packet>>>,
}

impl MockMysqlServer {
    /// Create a new mock server that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            listener: None,
            shutdown_tx: None,
            call_log: Arc::new(RwLock::new(Vec::new())),
            response_handlers: Arc::new(RwLock::new(HashMap::new())),
            auth_verdict: Arc::new(RwLock::new(Packet::ok(2))),
            timeout_install_response: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the mock server.
    ///
    /// Returns the actual address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();
        self.address = actual_address.clone();
        self.listener = Some(listener);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let listener = self.listener.take().expect("listener was just stored");
        let call_log = self.call_log.clone();
        let response_handlers = self.response_handlers.clone();
        let auth_verdict = self.auth_verdict.clone();
        let timeout_install = self.timeout_install_response.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let call_log = call_log.clone();
                                let response_handlers = response_handlers.clone();
                                let auth_verdict = auth_verdict.clone();
                                let timeout_install = timeout_install.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_connection(
                                        stream,
                                        call_log,
                                        response_handlers,
                                        auth_verdict,
                                        timeout_install,
                                        shutdown_rx,
                                    )
                                    .await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Register a response generator for a command byte.
    pub async fn register_response(&self, command: u8, handler: ResponseGenerator) {
        self.response_handlers.write().await.insert(command, handler);
    }

    /// Replace the authentication verdict sent after the handshake
    /// response. Anything other than an OK packet closes the connection
    /// after it is sent, like a real server.
    pub async fn set_auth_verdict(&self, verdict: Packet) {
        *self.auth_verdict.write().await = verdict;
    }

    /// Replace the reply to the statement-time-limit installation query
    /// every proxied session opens with. The default is an OK packet.
    pub async fn set_timeout_install_response(&self, response: Packet) {
        *self.timeout_install_response.write().await = Some(response);
    }

    /// Get all recorded command packets.
    pub async fn get_calls(&self) -> Vec<ServerCall> {
        self.call_log.read().await.clone()
    }

    /// Get recorded commands filtered by command byte.
    pub async fn get_calls_for_command(&self, command: u8) -> Vec<ServerCall> {
        self.call_log
            .read()
            .await
            .iter()
            .filter(|c| c.command == command)
            .cloned()
            .collect()
    }

    /// Clear the call log.
    pub async fn clear_calls(&self) {
        self.call_log.write().await.clear();
    }

    /// Get the server address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Handle a single proxied session.
    async fn handle_connection(
        stream: TcpStream,
        call_log: Arc<RwLock<Vec<ServerCall>>>,
        response_handlers: Arc<RwLock<HashMap<u8, ResponseGenerator>>>,
        auth_verdict: Arc<RwLock<Packet>>,
        timeout_install: Arc<RwLock<Option<Packet>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut stream = UpstreamStream::from_stream(stream, "mock-client".to_string());

        // Handshake: greeting out, response in, verdict out.
        let greeting = Packet {
            sequence_id: 0,
            payload: greeting_payload(),
        };
        if stream.write_packet(&greeting).await.is_err() {
            return;
        }
        if stream.next_packet().await.is_err() {
            return;
        }

        let verdict = auth_verdict.read().await.clone();
        let accepted = classify(&verdict.payload) == PacketKind::Ok;
        if stream.write_packet(&verdict).await.is_err() || !accepted {
            return;
        }

        loop {
            let packet = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = stream.next_packet() => match result {
                    Ok(packet) => packet,
                    Err(_) => break,
                },
            };

            let Some(&command) = packet.payload.first() else {
                break;
            };
            let call = ServerCall {
                command,
                sequence_id: packet.sequence_id,
                payload: packet.payload,
            };
            call_log.write().await.push(call.clone());

            // A real server closes its side on QUIT without replying.
            if command == COM_QUIT {
                break;
            }

            let responses = if is_timeout_install(&call) {
                match timeout_install.read().await.clone() {
                    Some(packet) => vec![packet],
                    None => vec![Packet::ok(call.sequence_id.wrapping_add(1))],
                }
            } else {
                let handlers = response_handlers.read().await;
                match handlers.get(&command) {
                    Some(handler) => handler(&call),
                    None => vec![Packet::ok(call.sequence_id.wrapping_add(1))],
                }
            };

            for response in &responses {
                if stream.write_packet(response).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Whether a recorded call is the statement-time-limit installation query
/// a proxied session always opens with.
fn is_timeout_install(call: &ServerCall) -> bool {
    call.command == COM_QUERY && call.argument().starts_with(b"SET SESSION max_execution_time")
}

/// A plausible protocol-version-10 greeting payload.
#[must_use]
pub fn greeting_payload() -> Vec<u8> {
    let mut payload = Vec::with_capacity(78);
    payload.push(0x0A);
    payload.extend_from_slice(b"8.0.32-mock\0");
    payload.extend_from_slice(&42u32.to_le_bytes()); // thread id
    payload.extend_from_slice(b"abcdefgh"); // auth-plugin-data part 1
    payload.push(0x00);
    payload.extend_from_slice(&0xF7FFu16.to_le_bytes()); // capabilities, lower half
    payload.push(0x21); // utf8_general_ci
    payload.extend_from_slice(&0x0002u16.to_le_bytes()); // status flags
    payload.extend_from_slice(&0x0000u16.to_le_bytes()); // capabilities, upper half
    payload.push(21); // auth-plugin-data length
    payload.extend_from_slice(&[0u8; 10]); // reserved
    payload.extend_from_slice(b"ijklmnopqrst\0"); // auth-plugin-data part 2
    payload.extend_from_slice(b"mysql_native_password\0");
    payload
}

/// A column-definition payload in the fixed protocol layout.
#[must_use]
pub fn column_definition_payload(name: &str, column_length: u32, column_type: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    write_string_or_null(&mut payload, Some(b"def"));
    write_string_or_null(&mut payload, Some(b"testdb"));
    write_string_or_null(&mut payload, Some(b"t"));
    write_string_or_null(&mut payload, Some(b"t"));
    write_string_or_null(&mut payload, Some(name.as_bytes()));
    write_string_or_null(&mut payload, Some(name.as_bytes()));
    write_lenenc_int(&mut payload, 0x0C);
    payload.extend_from_slice(&0x21u16.to_le_bytes()); // charset
    payload.extend_from_slice(&column_length.to_le_bytes());
    payload.push(column_type);
    payload.extend_from_slice(&0u16.to_le_bytes()); // flags
    payload.push(0); // decimals
    payload.extend_from_slice(&[0x00, 0x00]); // filler
    payload
}

/// A text-protocol row payload with the given fields.
#[must_use]
pub fn text_row_payload(fields: &[Option<&[u8]>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for field in fields {
        write_string_or_null(&mut payload, *field);
    }
    payload
}

/// Canned response generators for common reply shapes.
pub mod responses {
    use super::*;
    use crate::protocol::constants::SQL_STATE_GENERAL;

    /// A bare OK reply.
    pub fn ok_response() -> ResponseGenerator {
        Arc::new(|call: &ServerCall| vec![Packet::ok(call.sequence_id.wrapping_add(1))])
    }

    /// An ERR reply with the given code and message.
    pub fn error_response(code: u16, message: &str) -> ResponseGenerator {
        let message = message.to_string();
        Arc::new(move |call: &ServerCall| {
            vec![Packet::err(
                code,
                SQL_STATE_GENERAL,
                &message,
                call.sequence_id.wrapping_add(1),
            )]
        })
    }

    /// A complete text result set: column count, definitions, EOF, rows,
    /// terminating EOF, with conventional sequence numbering.
    pub fn result_set(columns: &[(&str, u32)], rows: &[&[Option<&[u8]>]]) -> ResponseGenerator {
        let columns: Vec<(String, u32)> = columns
            .iter()
            .map(|(name, length)| ((*name).to_string(), *length))
            .collect();
        let rows: Vec<Vec<Option<Vec<u8>>>> = rows
            .iter()
            .map(|row| row.iter().map(|field| field.map(|v| v.to_vec())).collect())
            .collect();

        Arc::new(move |call: &ServerCall| {
            let mut sequence_id = call.sequence_id;
            let mut next = move || {
                sequence_id = sequence_id.wrapping_add(1);
                sequence_id
            };

            let mut packets = Vec::with_capacity(columns.len() + rows.len() + 3);

            let mut count = Vec::new();
            write_lenenc_int(&mut count, columns.len() as u64);
            packets.push(Packet {
                sequence_id: next(),
                payload: count,
            });

            for (name, length) in &columns {
                packets.push(Packet {
                    sequence_id: next(),
                    payload: column_definition_payload(name, *length, 0xFD),
                });
            }
            packets.push(Packet::eof(next()));

            for row in &rows {
                let fields: Vec<Option<&[u8]>> =
                    row.iter().map(|field| field.as_deref()).collect();
                packets.push(Packet {
                    sequence_id: next(),
                    payload: text_row_payload(&fields),
                });
            }
            packets.push(Packet::eof(next()));

            packets
        })
    }

    /// Column definitions followed by EOF, in the FIELD_LIST reply shape.
    pub fn field_list_response(columns: &[(&str, u32)]) -> ResponseGenerator {
        let columns: Vec<(String, u32)> = columns
            .iter()
            .map(|(name, length)| ((*name).to_string(), *length))
            .collect();

        Arc::new(move |call: &ServerCall| {
            let mut sequence_id = call.sequence_id;
            let mut next = move || {
                sequence_id = sequence_id.wrapping_add(1);
                sequence_id
            };

            let mut packets = Vec::with_capacity(columns.len() + 1);
            for (name, length) in &columns {
                packets.push(Packet {
                    sequence_id: next(),
                    payload: column_definition_payload(name, *length, 0xFD),
                });
            }
            packets.push(Packet::eof(next()));
            packets
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::COM_PING;
    use std::time::Duration;

    async fn connected_client(address: &str) -> UpstreamStream {
        UpstreamStream::connect(address, Duration::from_secs(1))
            .await
            .unwrap()
    }

    async fn complete_handshake(stream: &mut UpstreamStream) {
        let greeting = stream.next_packet().await.unwrap();
        assert_eq!(greeting.sequence_id, 0);
        assert_eq!(greeting.payload[0], 0x0A);

        stream
            .write_packet(&Packet {
                sequence_id: 1,
                payload: vec![0x85, 0xA6, 0x03, 0x00], // capability bytes, enough for a script
            })
            .await
            .unwrap();

        let verdict = stream.next_packet().await.unwrap();
        assert_eq!(classify(&verdict.payload), PacketKind::Ok);
    }

    #[tokio::test]
    async fn test_mock_server_start_stop() {
        let mut server = MockMysqlServer::new("127.0.0.1:0");
        let address = server.start().await.unwrap();
        assert!(!address.is_empty());

        let mut stream = connected_client(&address).await;
        let greeting = stream.next_packet().await.unwrap();
        assert_eq!(greeting.payload[0], 0x0A);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_mock_server_records_commands() {
        let mut server = MockMysqlServer::new("127.0.0.1:0");
        let address = server.start().await.unwrap();

        let mut stream = connected_client(&address).await;
        complete_handshake(&mut stream).await;

        stream
            .write_packet(&Packet {
                sequence_id: 0,
                payload: vec![COM_PING],
            })
            .await
            .unwrap();
        let reply = stream.next_packet().await.unwrap();
        assert_eq!(classify(&reply.payload), PacketKind::Ok);
        assert_eq!(reply.sequence_id, 1);

        let calls = server.get_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, COM_PING);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_mock_server_scripted_result_set() {
        let mut server = MockMysqlServer::new("127.0.0.1:0");
        let address = server.start().await.unwrap();

        server
            .register_response(
                COM_QUERY,
                responses::result_set(
                    &[("email", 255), ("id", 11)],
                    &[&[Some(b"alice@example.com"), Some(b"7")]],
                ),
            )
            .await;

        let mut stream = connected_client(&address).await;
        complete_handshake(&mut stream).await;

        stream
            .write_packet(&Packet {
                sequence_id: 0,
                payload: b"\x03SELECT email, id FROM users".to_vec(),
            })
            .await
            .unwrap();

        // column count
        let count = stream.next_packet().await.unwrap();
        assert_eq!(count.payload, vec![0x02]);
        // two definitions, EOF, one row, EOF
        let first_column = stream.next_packet().await.unwrap();
        assert!(!first_column.payload.is_empty());
        stream.next_packet().await.unwrap();
        let eof = stream.next_packet().await.unwrap();
        assert_eq!(classify(&eof.payload), PacketKind::Eof);
        let row = stream.next_packet().await.unwrap();
        assert_eq!(classify(&row.payload), PacketKind::Data);
        let terminal = stream.next_packet().await.unwrap();
        assert_eq!(classify(&terminal.payload), PacketKind::Eof);

        let calls = server.get_calls_for_command(COM_QUERY).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].query_text().as_deref(),
            Some("SELECT email, id FROM users")
        );

        server.stop().await;
    }

    #[tokio::test]
    async fn test_mock_server_auth_rejection_closes_connection() {
        let mut server = MockMysqlServer::new("127.0.0.1:0");
        let address = server.start().await.unwrap();
        server
            .set_auth_verdict(Packet::err(1045, "28000", "Access denied", 2))
            .await;

        let mut stream = connected_client(&address).await;
        stream.next_packet().await.unwrap(); // greeting
        stream
            .write_packet(&Packet {
                sequence_id: 1,
                payload: vec![0x85, 0xA6, 0x03, 0x00],
            })
            .await
            .unwrap();

        let verdict = stream.next_packet().await.unwrap();
        assert_eq!(classify(&verdict.payload), PacketKind::Err);

        // The server closes after rejecting authentication.
        assert!(stream.next_packet().await.is_err());

        server.stop().await;
    }
}
