//! Result-set sanitization.
//!
//! This module provides:
//! - The value transform replacing sensitive values with a salted digest
//! - The pluggable column policy deciding which columns are sensitive

pub mod policy;
pub mod transform;

pub use policy::{ColumnPolicy, PassthroughPolicy, PatternPolicy};
pub use transform::{sanitize_value, DIGEST_HEX_LEN};
