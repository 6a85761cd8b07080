//! Row-value sanitization transform.
//!
//! Maps a sensitive value to the hex-encoded SHA-256 of `value ++ salt`.
//! The output is deterministic for a fixed salt, so repeated queries and
//! joins over a sanitized column stay self-consistent while the original
//! value remains unrecoverable.

use sha2::{Digest, Sha256};

use crate::protocol::Column;

/// Length of a hex-encoded SHA-256 digest in bytes.
pub const DIGEST_HEX_LEN: usize = 64;

/// Replace a sensitive value.
///
/// The replacement is the 64-character hex digest, truncated to the
/// column's declared length when that is narrower. Truncation is a
/// documented lossy trade-off for narrow columns: the result still fits
/// the client's declared schema but collides more easily.
#[must_use]
pub fn sanitize_value(value: &[u8], column: &Column, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(value);
    hasher.update(salt);
    let mut replacement = hex::encode(hasher.finalize());
    replacement.truncate(DIGEST_HEX_LEN.min(column.length as usize));
    replacement.into_bytes()
}
