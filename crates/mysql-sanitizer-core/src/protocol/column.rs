//! Column-definition decoding for result sets.

use crate::error::{ProxyError, Result};
use crate::protocol::wire::PayloadReader;

/// Metadata for one result-set column.
///
/// Decoded from the server's column-definition packet at the head of a
/// result set and read-only afterwards; its lifetime is one result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name as presented to the client (the alias, not the origin
    /// name).
    pub name: String,
    /// Declared maximum value length in bytes.
    pub length: u32,
    /// Column type byte.
    pub column_type: u8,
    /// Character set identifier.
    pub charset: u16,
    /// Column definition flags.
    pub flags: u16,
    /// Decimal places for numeric types.
    pub decimals: u8,
}

impl Column {
    /// Parse a column-definition payload.
    ///
    /// Field layout: catalog, schema, table, original table, name, original
    /// name (length-encoded strings), fixed-length field marker
    /// (length-encoded integer, always 0x0c), character set (2 bytes),
    /// column length (4 bytes), column type (1 byte), flags (2 bytes),
    /// decimals (1 byte), filler (2 bytes). COM_FIELD_LIST replies append a
    /// default-value field after the filler, which the relay ignores.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        let _catalog = reader.read_string_or_null()?;
        let _schema = reader.read_string_or_null()?;
        let _table = reader.read_string_or_null()?;
        let _org_table = reader.read_string_or_null()?;
        let name = reader
            .read_string_or_null()?
            .ok_or_else(|| ProxyError::MalformedPacket {
                message: "column definition carries NULL name".to_string(),
            })?;
        let _org_name = reader.read_string_or_null()?;
        let _fixed_len = reader.read_lenenc_int()?;
        let charset = reader.read_u16_le()?;
        let length = reader.read_u32_le()?;
        let column_type = reader.read_u8()?;
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;
        let _filler = reader.read_u16_le()?;

        Ok(Self {
            name: String::from_utf8_lossy(name).into_owned(),
            length,
            column_type,
            charset,
            flags,
            decimals,
        })
    }
}
