//! Packet-framed stream to the upstream MySQL server.
//!
//! Wraps a TCP connection and exposes whole-packet reads and writes using
//! the MySQL framing header: a 3-byte little-endian payload length followed
//! by a 1-byte sequence id.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::protocol::packet::{Packet, HEADER_LEN, MAX_PAYLOAD_LEN};

/// A packet-framed connection to the upstream server.
///
/// Reads and writes operate on whole packets. Partial reads from the wire
/// are handled internally with exact-length reads.
pub struct UpstreamStream {
    stream: TcpStream,
    address: String,
}

impl UpstreamStream {
    /// Connect to the upstream server with a timeout.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the TCP connection fails or does not
    /// complete within `connect_timeout`.
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(address, error = %e, "failed to connect to upstream server");
                return Err(ProxyError::Transport(e));
            }
            Err(_) => {
                warn!(address, "upstream connection timeout");
                return Err(ProxyError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to {address} timed out"),
                )));
            }
        };

        // Latency matters more than throughput for interactive sessions.
        stream.set_nodelay(true)?;

        debug!(address, "connected to upstream server");

        Ok(Self {
            stream,
            address: address.to_string(),
        })
    }

    /// Wrap an already-connected socket.
    #[must_use]
    pub fn from_stream(stream: TcpStream, address: String) -> Self {
        Self { stream, address }
    }

    /// The address this stream is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Read the next complete packet from the server.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection is lost mid-packet or
    /// closed before a full header arrives.
    pub async fn next_packet(&mut self) -> Result<Packet> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;

        let payload_len =
            usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
        let sequence_id = header[3];

        let mut payload = vec![0u8; payload_len];
        self.stream.read_exact(&mut payload).await?;

        Ok(Packet {
            sequence_id,
            payload,
        })
    }

    /// Write a complete packet to the server.
    ///
    /// # Errors
    ///
    /// Returns a malformed-packet error if the payload exceeds the 3-byte
    /// length field, or a transport error if the write fails.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProxyError::MalformedPacket {
                message: format!(
                    "payload of {} bytes exceeds the framing limit",
                    packet.payload.len()
                ),
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + packet.payload.len());
        let len = packet.payload.len() as u32;
        buf.put_u8(len as u8);
        buf.put_u8((len >> 8) as u8);
        buf.put_u8((len >> 16) as u8);
        buf.put_u8(packet.sequence_id);
        buf.extend_from_slice(&packet.payload);

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
