//! MySQL wire protocol primitives.
//!
//! This module provides:
//! - Packet type, framing constants, and terminal-packet classification
//! - Length-encoded integer/string codec over packet payloads
//! - Column-definition decoding for result sets

pub mod column;
pub mod constants;
pub mod packet;
pub mod wire;

pub use column::Column;
pub use packet::{classify, Packet, PacketKind};
pub use wire::PayloadReader;
