//! Immutable session context.
//!
//! Carries the process-wide sanitization inputs (salt, policy, timeouts)
//! into each session at construction, so the handlers never read ambient
//! global state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::error::ConfigResult;
use crate::sanitize::{ColumnPolicy, PatternPolicy};

/// Process-wide inputs shared by every session.
///
/// Read-only after startup. Cloning is cheap: the salt and the policy are
/// reference-counted.
#[derive(Clone)]
pub struct SessionContext {
    salt: Arc<[u8]>,
    policy: Arc<dyn ColumnPolicy>,
    sanitizing: bool,
    statement_timeout: Duration,
    upstream_address: Arc<str>,
    connect_timeout: Duration,
    session_buffer: usize,
}

impl SessionContext {
    /// Build the context from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the sensitive-column patterns fail to compile.
    pub fn from_config(config: &ProxyConfig) -> ConfigResult<Self> {
        let policy = PatternPolicy::new(&config.sanitize.sensitive_columns)?;
        Ok(Self {
            salt: config.sanitize.salt_bytes().into(),
            policy: Arc::new(policy),
            sanitizing: config.sanitize.enabled,
            statement_timeout: Duration::from_secs(config.upstream.statement_timeout_secs),
            upstream_address: config.upstream.address.as_str().into(),
            connect_timeout: Duration::from_millis(config.upstream.connect_timeout_ms),
            session_buffer: config.listen.session_buffer,
        })
    }

    /// Replace the column policy, e.g. with a deployment-specific rule.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ColumnPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Secret salt appended to values before hashing.
    #[must_use]
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// The column sensitivity policy.
    #[must_use]
    pub fn policy(&self) -> &dyn ColumnPolicy {
        &*self.policy
    }

    /// Whether result-set rows are rewritten at all.
    #[must_use]
    pub fn sanitizing_enabled(&self) -> bool {
        self.sanitizing
    }

    /// Server-side statement execution time limit.
    #[must_use]
    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Upstream server address as `host:port`.
    #[must_use]
    pub fn upstream_address(&self) -> &str {
        &self.upstream_address
    }

    /// Upstream connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Per-direction packet buffer for the session bridge.
    #[must_use]
    pub fn session_buffer(&self) -> usize {
        self.session_buffer
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The salt is a secret; log its length only.
        f.debug_struct("SessionContext")
            .field("salt_len", &self.salt.len())
            .field("sanitizing", &self.sanitizing)
            .field("statement_timeout", &self.statement_timeout)
            .field("upstream_address", &self.upstream_address)
            .field("connect_timeout", &self.connect_timeout)
            .field("session_buffer", &self.session_buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanitizeConfig;
    use crate::protocol::Column;
    use crate::sanitize::PassthroughPolicy;

    fn config_with_patterns() -> ProxyConfig {
        ProxyConfig {
            sanitize: SanitizeConfig {
                enabled: true,
                salt: "pepper".to_string(),
                sensitive_columns: vec!["email".to_string()],
            },
            ..ProxyConfig::default()
        }
    }

    fn email_column() -> Column {
        Column {
            name: "email".to_string(),
            length: 255,
            column_type: 0xFD,
            charset: 0x0021,
            flags: 0,
            decimals: 0,
        }
    }

    #[test]
    fn test_from_config_wires_fields() {
        let context = SessionContext::from_config(&config_with_patterns()).unwrap();
        assert_eq!(context.salt(), b"pepper");
        assert!(context.sanitizing_enabled());
        assert_eq!(context.statement_timeout(), Duration::from_secs(20));
        assert_eq!(context.upstream_address(), "localhost:3306");
        assert!(!context.policy().is_safe(&email_column()));
    }

    #[test]
    fn test_with_policy_overrides() {
        let context = SessionContext::from_config(&config_with_patterns())
            .unwrap()
            .with_policy(Arc::new(PassthroughPolicy));
        assert!(context.policy().is_safe(&email_column()));
    }

    #[test]
    fn test_debug_redacts_salt() {
        let context = SessionContext::from_config(&config_with_patterns()).unwrap();
        let debug = format!("{context:?}");
        assert!(!debug.contains("pepper"));
        assert!(debug.contains("salt_len"));
    }
}
