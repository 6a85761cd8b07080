//! Column sensitivity policy.
//!
//! Which columns need sanitizing is a deployment concern, not a protocol
//! one, so the session handler only sees the [`ColumnPolicy`] trait. The
//! shipped implementation matches column names against configured patterns;
//! deployments with different rules (type-based, schema-based) implement
//! the trait themselves.

use regex::RegexSetBuilder;

use crate::error::{ConfigError, ConfigResult};
use crate::protocol::Column;

/// Decides whether a column's values may pass through unsanitized.
///
/// Consulted once per column per result set; the session handler caches
/// the answer for the result set's lifetime.
pub trait ColumnPolicy: Send + Sync {
    /// True when values in this column are safe to forward verbatim.
    fn is_safe(&self, column: &Column) -> bool;
}

/// Name-based policy: a column is sensitive when any configured pattern
/// matches its name, case-insensitively.
#[derive(Debug)]
pub struct PatternPolicy {
    patterns: regex::RegexSet,
}

impl PatternPolicy {
    /// Compile the configured patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] naming the first pattern
    /// that fails to compile.
    pub fn new(patterns: &[String]) -> ConfigResult<Self> {
        for pattern in patterns {
            if let Err(source) = regex::Regex::new(pattern) {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                });
            }
        }
        let patterns = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: patterns.join(", "),
                source,
            })?;
        Ok(Self { patterns })
    }
}

impl ColumnPolicy for PatternPolicy {
    fn is_safe(&self, column: &Column) -> bool {
        !self.patterns.is_match(&column.name)
    }
}

/// Treats every column as safe. With this policy the relay is a pure
/// pass-through; useful for staged rollouts and in tests.
#[derive(Debug, Default)]
pub struct PassthroughPolicy;

impl ColumnPolicy for PassthroughPolicy {
    fn is_safe(&self, _column: &Column) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Column {
        Column {
            name: name.to_string(),
            length: 255,
            column_type: 0xFD,
            charset: 0x0021,
            flags: 0,
            decimals: 0,
        }
    }

    #[test]
    fn test_pattern_match_marks_unsafe() {
        let policy = PatternPolicy::new(&["email".to_string(), "^ssn$".to_string()]).unwrap();
        assert!(!policy.is_safe(&named("email")));
        assert!(!policy.is_safe(&named("user_email")));
        assert!(!policy.is_safe(&named("ssn")));
        assert!(policy.is_safe(&named("ssn_hash")));
        assert!(policy.is_safe(&named("id")));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let policy = PatternPolicy::new(&["password".to_string()]).unwrap();
        assert!(!policy.is_safe(&named("PASSWORD")));
        assert!(!policy.is_safe(&named("Password_hash")));
    }

    #[test]
    fn test_empty_pattern_list_passes_everything() {
        let policy = PatternPolicy::new(&[]).unwrap();
        assert!(policy.is_safe(&named("email")));
    }

    #[test]
    fn test_invalid_pattern_is_named_in_error() {
        let err = PatternPolicy::new(&["[unclosed".to_string()]).unwrap_err();
        assert!(err.to_string().contains("[unclosed"));
    }

    #[test]
    fn test_passthrough_policy() {
        let policy = PassthroughPolicy;
        assert!(policy.is_safe(&named("email")));
        assert!(policy.is_safe(&named("ssn")));
    }
}
