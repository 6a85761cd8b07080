//! MySQL protocol constants used by the relay.

/// COM_QUIT: client is closing the session.
pub const COM_QUIT: u8 = 0x01;

/// COM_INIT_DB: select a default schema.
pub const COM_INIT_DB: u8 = 0x02;

/// COM_QUERY: text-protocol statement.
pub const COM_QUERY: u8 = 0x03;

/// COM_FIELD_LIST: legacy column listing for a table.
pub const COM_FIELD_LIST: u8 = 0x04;

/// COM_STATISTICS: human-readable server statistics string.
pub const COM_STATISTICS: u8 = 0x09;

/// COM_PROCESS_KILL: terminate a server thread by id.
pub const COM_PROCESS_KILL: u8 = 0x0C;

/// COM_PING: liveness check.
pub const COM_PING: u8 = 0x0E;

/// Commands the relay forwards upstream; everything else is answered with a
/// synthesized error packet without contacting the server.
pub const SUPPORTED_COMMANDS: [u8; 7] = [
    COM_QUIT,
    COM_INIT_DB,
    COM_QUERY,
    COM_FIELD_LIST,
    COM_STATISTICS,
    COM_PROCESS_KILL,
    COM_PING,
];

/// First payload byte of an OK packet.
pub const OK_HEADER: u8 = 0x00;

/// First payload byte of an ERR packet.
pub const ERR_HEADER: u8 = 0xFF;

/// First payload byte of an EOF packet. Also the 8-byte marker of the
/// length-encoded integer encoding, which is why EOF classification is
/// length-gated.
pub const EOF_HEADER: u8 = 0xFE;

/// Length-encoded NULL marker. Only valid in string contexts.
pub const LENENC_NULL: u8 = 0xFB;

/// Marker for a 2-byte little-endian length-encoded integer.
pub const LENENC_U16: u8 = 0xFC;

/// Marker for a 3-byte little-endian length-encoded integer.
pub const LENENC_U24: u8 = 0xFD;

/// Marker for an 8-byte little-endian length-encoded integer.
pub const LENENC_U64: u8 = 0xFE;

/// Upper bound on columns per result set, matching the server's own limit.
pub const MAX_COLUMNS: usize = 4096;

/// Error code carried by synthesized unsupported-command replies.
pub const UNSUPPORTED_COMMAND_CODE: u16 = 1002;

/// Catch-all SQL state used by synthesized error packets.
pub const SQL_STATE_GENERAL: &str = "HY000";

/// Human-readable name of a command byte for log output.
#[must_use]
pub fn command_name(command: u8) -> &'static str {
    match command {
        COM_QUIT => "COM_QUIT",
        COM_INIT_DB => "COM_INIT_DB",
        COM_QUERY => "COM_QUERY",
        COM_FIELD_LIST => "COM_FIELD_LIST",
        COM_STATISTICS => "COM_STATISTICS",
        COM_PROCESS_KILL => "COM_PROCESS_KILL",
        COM_PING => "COM_PING",
        _ => "COM_UNKNOWN",
    }
}
