//! MySQL packet codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for MySQL wire
//! packets. The framing format is a 4-byte header (3-byte little-endian
//! payload length, then a 1-byte sequence id) followed by the payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProxyError;
use crate::protocol::packet::{Packet, HEADER_LEN, MAX_PAYLOAD_LEN};

/// Codec for MySQL wire packets.
///
/// The 3-byte length field cannot express a payload larger than
/// `MAX_PAYLOAD_LEN`, so decoding needs no separate size guard; encoding
/// rejects oversized payloads instead.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the full header before the payload length is known
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let payload_len =
            usize::from(src[0]) | usize::from(src[1]) << 8 | usize::from(src[2]) << 16;

        if src.len() < HEADER_LEN + payload_len {
            // Reserve space for the rest of the packet
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        let sequence_id = src[3];
        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).to_vec();

        Ok(Some(Packet {
            sequence_id,
            payload,
        }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProxyError::MalformedPacket {
                message: format!(
                    "payload of {} bytes exceeds the framing limit",
                    item.payload.len()
                ),
            });
        }

        let len = item.payload.len() as u32;
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(len as u8);
        dst.put_u8((len >> 8) as u8);
        dst.put_u8((len >> 16) as u8);
        dst.put_u8(item.sequence_id);
        dst.extend_from_slice(&item.payload);

        Ok(())
    }
}
