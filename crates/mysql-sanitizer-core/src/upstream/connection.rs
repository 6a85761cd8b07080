//! Server-side session handler.
//!
//! Drives the upstream half of one proxied session: relays the
//! authentication exchange, installs a server-side statement execution
//! time limit, then services the client's command stream. Result-set rows
//! pass through a rewrite step that replaces values in sensitive columns
//! with salted hashes before they reach the client.
//!
//! The handler owns the server socket exclusively. It talks to the
//! client-facing half only through the session bridge, receiving commands
//! on one channel and publishing responses on the other.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::protocol::column::Column;
use crate::protocol::constants::{command_name, COM_QUERY, MAX_COLUMNS, SUPPORTED_COMMANDS};
use crate::protocol::packet::{Packet, PacketKind};
use crate::protocol::wire::{hex_preview, write_string_or_null, PayloadReader};
use crate::sanitize::{sanitize_value, DIGEST_HEX_LEN};
use crate::session::{SessionContext, UpstreamEnd};

use super::stream::UpstreamStream;

/// A column definition paired with its cached sensitivity verdict.
///
/// The policy is consulted once per column when the result-set header is
/// read; every row in that result set reuses the verdict.
struct ResultColumn {
    column: Column,
    safe: bool,
}

/// The server-facing half of one proxied session.
pub struct UpstreamSession {
    stream: UpstreamStream,
    bridge: UpstreamEnd,
    context: SessionContext,
    metrics: Arc<ProxyMetrics>,
    session_id: u64,
}

impl UpstreamSession {
    /// Create a session handler over an established upstream connection.
    #[must_use]
    pub fn new(
        stream: UpstreamStream,
        bridge: UpstreamEnd,
        context: SessionContext,
        metrics: Arc<ProxyMetrics>,
        session_id: u64,
    ) -> Self {
        Self {
            stream,
            bridge,
            context,
            metrics,
            session_id,
        }
    }

    /// Run the session to completion and tear down the bridge.
    ///
    /// Consumes the handler. Errors never escape: expected disconnects are
    /// logged at debug level, everything else at warn with the error kind
    /// recorded in the session-error counter. Teardown runs on every exit
    /// path so a peer blocked on the bridge or its socket is released.
    #[instrument(skip_all, fields(session_id = self.session_id, upstream = %self.stream.address()))]
    pub async fn run(mut self) {
        match self.relay().await {
            Ok(()) => debug!("session finished"),
            Err(ref e) if e.is_disconnect() => debug!(error = %e, "session closed"),
            Err(ref e) => {
                warn!(error = %e, "session failed");
                self.metrics.record_session_error(e.kind_label());
            }
        }
        self.bridge.trigger_teardown();
    }

    async fn relay(&mut self) -> Result<()> {
        self.handshake().await?;
        self.command_loop().await
    }

    /// Relay the authentication exchange.
    ///
    /// The server greeting and the client's handshake response cross the
    /// proxy verbatim. The server's verdict is held back until the
    /// statement time limit is installed, so the client never gets to run
    /// a command on a session without the limit.
    async fn handshake(&mut self) -> Result<()> {
        let greeting = self.next_server_packet().await?;
        debug!(
            sequence_id = greeting.sequence_id,
            "forwarding server greeting"
        );
        self.send_toward_client(greeting).await?;

        let response = self.bridge.recv_toward_server().await?;
        debug!(
            sequence_id = response.sequence_id,
            "forwarding handshake response"
        );
        self.forward_to_server(&response).await?;

        let verdict = self.next_server_packet().await?;
        if verdict.kind() != PacketKind::Ok {
            let preview = hex_preview(&verdict.payload, 24);
            warn!(response = %preview, "upstream rejected the client handshake");
            self.send_toward_client(verdict).await?;
            return Err(ProxyError::UpstreamAuthFailure {
                message: format!("server declined the handshake ({preview})"),
            });
        }

        self.inject_statement_timeout().await?;

        self.send_toward_client(verdict).await?;
        info!("session established");
        Ok(())
    }

    /// Install the server-side statement execution time limit.
    ///
    /// This command is relay-internal: its response is consumed here and
    /// never reaches the client. Only an error response is fatal; any
    /// other answer is accepted silently.
    async fn inject_statement_timeout(&mut self) -> Result<()> {
        let millis = self.context.statement_timeout().as_millis() as u64;
        let statement = format!("SET SESSION max_execution_time = {millis}");

        let mut payload = Vec::with_capacity(1 + statement.len());
        payload.push(COM_QUERY);
        payload.extend_from_slice(statement.as_bytes());
        self.stream
            .write_packet(&Packet {
                sequence_id: 0,
                payload,
            })
            .await?;

        let answer = self.next_server_packet().await?;
        if answer.kind() == PacketKind::Err {
            warn!(
                response = %hex_preview(&answer.payload, 24),
                "server rejected the statement time limit"
            );
            return Err(ProxyError::UpstreamTimeoutConfig {
                message: format!("server rejected '{statement}'"),
            });
        }

        debug!(limit_ms = millis, "statement time limit installed");
        Ok(())
    }

    /// Service client commands until the session ends.
    ///
    /// Commands outside the supported set are answered with a synthesized
    /// error and never reach the server; the loop then continues. A QUIT
    /// is forwarded like any other supported command and ends the session
    /// through the server closing its side.
    async fn command_loop(&mut self) -> Result<()> {
        loop {
            let command = self.bridge.recv_toward_server().await?;
            let command_byte = command.first_byte()?;

            if !SUPPORTED_COMMANDS.contains(&command_byte) {
                let name = command_name(command_byte);
                debug!(
                    command = name,
                    byte = command_byte,
                    "rejecting unsupported command"
                );
                self.metrics.record_unsupported_command(name);
                let reply = Packet::unsupported_command(command_byte, command.sequence_id);
                self.send_toward_client(reply).await?;
                continue;
            }

            debug!(
                command = command_name(command_byte),
                sequence_id = command.sequence_id,
                "forwarding command"
            );
            self.forward_to_server(&command).await?;

            if command_byte == COM_QUERY {
                self.relay_query_response().await?;
            } else {
                self.relay_generic_response().await?;
            }
        }
    }

    /// Relay one COM_QUERY response, rewriting rows where needed.
    ///
    /// A terminal first packet means the statement produced no result set
    /// and is forwarded as-is. Otherwise the column definitions are
    /// decoded (and forwarded verbatim), the sensitivity policy is
    /// consulted once per column, and every row packet is rebuilt with
    /// sensitive values hashed. Safe-only result sets skip the rebuild
    /// entirely.
    async fn relay_query_response(&mut self) -> Result<()> {
        let started = Instant::now();

        let first = self.next_server_packet().await?;
        if first.is_terminal() {
            self.send_toward_client(first).await?;
            self.metrics
                .record_query_duration(started.elapsed().as_secs_f64());
            return Ok(());
        }

        let column_count = {
            let mut reader = PayloadReader::new(&first.payload);
            let count = reader.read_lenenc_int()?;
            usize::try_from(count)
                .ok()
                .filter(|count| *count <= MAX_COLUMNS)
                .ok_or_else(|| ProxyError::MalformedPacket {
                    message: format!("column count {count} exceeds the protocol limit"),
                })?
        };
        self.send_toward_client(first).await?;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let packet = self.next_server_packet().await?;
            let column = Column::parse(&packet.payload)?;
            let safe = self.context.policy().is_safe(&column);
            if self.context.sanitizing_enabled()
                && !safe
                && (column.length as usize) < DIGEST_HEX_LEN
            {
                debug!(
                    column = %column.name,
                    declared = column.length,
                    "replacement digest will be truncated to the declared length"
                );
            }
            columns.push(ResultColumn { column, safe });
            self.send_toward_client(packet).await?;
        }

        let columns_end = self.next_server_packet().await?;
        if columns_end.kind() != PacketKind::Eof {
            // A row must never be mistaken for metadata, so an absent
            // end-of-columns marker is fatal rather than forwarded.
            return Err(ProxyError::MalformedPacket {
                message: format!(
                    "expected end-of-columns marker, found {}",
                    hex_preview(&columns_end.payload, 16)
                ),
            });
        }
        self.send_toward_client(columns_end).await?;

        let must_rewrite =
            self.context.sanitizing_enabled() && columns.iter().any(|entry| !entry.safe);
        if must_rewrite {
            debug!(
                columns = columns.len(),
                sensitive = columns.iter().filter(|entry| !entry.safe).count(),
                "rewriting result set"
            );
        }

        loop {
            let packet = self.next_server_packet().await?;
            if packet.is_terminal() {
                self.send_toward_client(packet).await?;
                break;
            }

            let outgoing = if must_rewrite {
                let (rebuilt, hashed) = rebuild_row(&packet, &columns, self.context.salt())?;
                if hashed > 0 {
                    self.metrics.record_row_rewritten(hashed);
                }
                rebuilt
            } else {
                packet
            };
            self.send_toward_client(outgoing).await?;
        }

        self.metrics
            .record_query_duration(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Forward server packets verbatim until a terminal packet closes the
    /// exchange. Covers every supported non-query command.
    async fn relay_generic_response(&mut self) -> Result<()> {
        loop {
            let packet = self.next_server_packet().await?;
            let terminal = packet.is_terminal();
            self.send_toward_client(packet).await?;
            if terminal {
                return Ok(());
            }
        }
    }

    /// Read the next server packet, giving up if the session is torn down
    /// while blocked on the socket.
    async fn next_server_packet(&mut self) -> Result<Packet> {
        tokio::select! {
            result = self.stream.next_packet() => result,
            () = self.bridge.teardown_signal() => Err(ProxyError::Shutdown),
        }
    }

    async fn forward_to_server(&mut self, packet: &Packet) -> Result<()> {
        self.stream.write_packet(packet).await?;
        self.metrics.record_packet_toward_server();
        Ok(())
    }

    async fn send_toward_client(&mut self, packet: Packet) -> Result<()> {
        self.bridge.send_toward_client(packet).await?;
        self.metrics.record_packet_toward_client();
        Ok(())
    }
}

/// Rebuild one text-protocol row, hashing values in sensitive columns.
///
/// NULL fields keep their NULL marker, safe-column values pass through
/// byte-for-byte, and the rebuilt packet reuses the original sequence id.
/// Returns the rebuilt packet and the number of values hashed.
fn rebuild_row(packet: &Packet, columns: &[ResultColumn], salt: &[u8]) -> Result<(Packet, u64)> {
    let mut reader = PayloadReader::new(&packet.payload);
    let mut payload = Vec::with_capacity(packet.payload.len());
    let mut hashed = 0u64;

    for entry in columns {
        match reader.read_string_or_null()? {
            None => write_string_or_null(&mut payload, None),
            Some(value) if entry.safe => write_string_or_null(&mut payload, Some(value)),
            Some(value) => {
                let digest = sanitize_value(value, &entry.column, salt);
                write_string_or_null(&mut payload, Some(digest.as_slice()));
                hashed += 1;
            }
        }
    }

    if !reader.is_empty() {
        return Err(ProxyError::MalformedPacket {
            message: format!(
                "row packet has {} trailing bytes after {} fields",
                reader.remaining(),
                columns.len()
            ),
        });
    }

    Ok((
        Packet {
            sequence_id: packet.sequence_id,
            payload,
        },
        hashed,
    ))
}
