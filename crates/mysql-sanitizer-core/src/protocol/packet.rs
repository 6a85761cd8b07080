//! MySQL packet framing and terminal-packet classification.
//!
//! Wire format of every packet:
//! ```text
//! [3 bytes: payload length, little-endian]
//! [1 byte: sequence id]
//! [N bytes: payload]
//! ```

use crate::error::{ProxyError, Result};
use crate::protocol::constants::{
    EOF_HEADER, ERR_HEADER, OK_HEADER, SQL_STATE_GENERAL, UNSUPPORTED_COMMAND_CODE,
};

/// Size of the packet header on the wire.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single packet can carry (16 MiB - 1).
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// A MySQL wire packet.
///
/// The sequence id is protocol-assigned per direction. The relay preserves
/// it when a packet is rewritten and never increments it on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    #[must_use]
    pub fn new(sequence_id: u8, payload: Vec<u8>) -> Self {
        Self {
            sequence_id,
            payload,
        }
    }

    /// First payload byte, read for command dispatch and classification.
    ///
    /// Every packet the relay inspects must carry a non-empty payload; an
    /// empty one is a protocol violation by the peer.
    pub fn first_byte(&self) -> Result<u8> {
        self.payload
            .first()
            .copied()
            .ok_or_else(|| ProxyError::MalformedPacket {
                message: "empty payload".to_string(),
            })
    }

    /// Terminal classification of this packet's payload.
    #[must_use]
    pub fn kind(&self) -> PacketKind {
        classify(&self.payload)
    }

    /// Whether this packet ends a response stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Minimal seven-byte OK packet (zero affected rows, no warnings).
    #[must_use]
    pub fn ok(sequence_id: u8) -> Self {
        let mut payload = Vec::with_capacity(7);
        payload.push(OK_HEADER);
        payload.push(0x00); // affected rows
        payload.push(0x00); // last insert id
        payload.extend_from_slice(&0x0002u16.to_le_bytes()); // autocommit status
        payload.extend_from_slice(&0u16.to_le_bytes()); // warnings
        Self::new(sequence_id, payload)
    }

    /// ERR packet with the `#` marker and five-byte SQL state.
    #[must_use]
    pub fn err(error_code: u16, sql_state: &str, message: &str, sequence_id: u8) -> Self {
        let mut payload = Vec::with_capacity(9 + message.len());
        payload.push(ERR_HEADER);
        payload.extend_from_slice(&error_code.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(sql_state.as_bytes());
        payload.extend_from_slice(message.as_bytes());
        Self::new(sequence_id, payload)
    }

    /// Five-byte EOF packet (no warnings, default status).
    #[must_use]
    pub fn eof(sequence_id: u8) -> Self {
        let mut payload = Vec::with_capacity(5);
        payload.push(EOF_HEADER);
        payload.extend_from_slice(&0u16.to_le_bytes()); // warnings
        payload.extend_from_slice(&0x0002u16.to_le_bytes()); // status flags
        Self::new(sequence_id, payload)
    }

    /// The relay's refusal reply for a command byte outside the supported
    /// set. Sent to the client in the response position of the rejected
    /// command; the server is never contacted.
    #[must_use]
    pub fn unsupported_command(command: u8, command_sequence_id: u8) -> Self {
        Self::err(
            UNSUPPORTED_COMMAND_CODE,
            SQL_STATE_GENERAL,
            &format!("command 0x{command:02x} is not supported by the sanitizing proxy"),
            command_sequence_id.wrapping_add(1),
        )
    }
}

/// Terminal classification of a packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// OK packet: statement succeeded, or final row-stream terminator on
    /// servers with CLIENT_DEPRECATE_EOF.
    Ok,
    /// ERR packet.
    Err,
    /// EOF packet: section terminator inside result sets.
    Eof,
    /// Anything else: column count, column definition, row, greeting.
    Data,
}

impl PacketKind {
    /// Whether a packet of this kind ends a response stream.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, PacketKind::Data)
    }
}

/// Classify a payload. The checks run in fixed order (OK, ERR, EOF) and are
/// mutually exclusive on well-formed input: an OK payload is at least seven
/// bytes, while 0xFE only means EOF below nine bytes (longer payloads
/// starting 0xFE are 8-byte length-encoded integers).
#[must_use]
pub fn classify(payload: &[u8]) -> PacketKind {
    match payload.first() {
        Some(&OK_HEADER) if payload.len() >= 7 => PacketKind::Ok,
        Some(&ERR_HEADER) => PacketKind::Err,
        Some(&EOF_HEADER) if payload.len() < 9 => PacketKind::Eof,
        _ => PacketKind::Data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_packet_classifies_ok() {
        let packet = Packet::ok(1);
        assert_eq!(packet.payload[0], 0x00);
        assert_eq!(packet.payload.len(), 7);
        assert_eq!(packet.kind(), PacketKind::Ok);
    }

    #[test]
    fn test_err_packet_layout() {
        let packet = Packet::err(1064, "42000", "Syntax error", 1);
        assert_eq!(packet.payload[0], 0xFF);
        assert_eq!(u16::from_le_bytes([packet.payload[1], packet.payload[2]]), 1064);
        assert_eq!(packet.payload[3], b'#');
        assert_eq!(&packet.payload[4..9], b"42000");
        assert_eq!(&packet.payload[9..], b"Syntax error");
        assert_eq!(packet.kind(), PacketKind::Err);
    }

    #[test]
    fn test_eof_packet_classifies_eof() {
        let packet = Packet::eof(3);
        assert_eq!(packet.payload.len(), 5);
        assert_eq!(packet.kind(), PacketKind::Eof);
    }

    #[test]
    fn test_unsupported_command_reply() {
        let packet = Packet::unsupported_command(0x16, 0);
        assert_eq!(packet.sequence_id, 1);
        assert_eq!(packet.payload[0], 0xFF);
        assert_eq!(u16::from_le_bytes([packet.payload[1], packet.payload[2]]), 1002);
        assert_eq!(&packet.payload[4..9], b"HY000");
        let message = String::from_utf8_lossy(&packet.payload[9..]).into_owned();
        assert!(message.contains("0x16"));
    }

    #[test]
    fn test_short_ok_payload_is_data() {
        // A 0x00 first byte alone is not an OK packet.
        assert_eq!(classify(&[0x00, 0x00, 0x00]), PacketKind::Data);
    }

    #[test]
    fn test_long_eof_first_byte_is_data() {
        // Nine or more bytes starting 0xFE are a length-encoded integer,
        // e.g. a huge row count, not an EOF packet.
        assert_eq!(classify(&[0xFE; 9]), PacketKind::Data);
        assert_eq!(classify(&[0xFE; 8]), PacketKind::Eof);
    }

    #[test]
    fn test_classification_exclusivity() {
        let samples: Vec<Vec<u8>> = vec![
            vec![0x00; 7],
            vec![0x00; 3],
            vec![0xFF, 0x01, 0x02],
            vec![0xFE; 5],
            vec![0xFE; 9],
            vec![0x03, b'S', b'E', b'L'],
            vec![0x01],
        ];
        for payload in samples {
            let matches = [
                payload.first() == Some(&0x00) && payload.len() >= 7,
                payload.first() == Some(&0xFF),
                payload.first() == Some(&0xFE) && payload.len() < 9,
            ]
            .iter()
            .filter(|&&m| m)
            .count();
            assert!(matches <= 1, "payload {payload:?} matched {matches} classes");
        }
    }

    #[test]
    fn test_first_byte_on_empty_payload_fails() {
        let packet = Packet::new(0, Vec::new());
        assert!(packet.first_byte().is_err());
    }
}
