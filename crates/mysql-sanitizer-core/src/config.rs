//! Configuration types for the MySQL sanitizing proxy.
//!
//! Configuration is loaded from YAML files and validated before use. The
//! file carries the hashing salt, so loading rejects files accessible by
//! group or other.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::sanitize::PatternPolicy;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// TCP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Upstream MySQL server configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Sanitization configuration.
    #[serde(default)]
    pub sanitize: SanitizeConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:3306".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Maximum number of concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-direction packet buffer between the two session tasks.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

/// Upstream MySQL server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Server address, e.g., "localhost:3306".
    #[serde(default = "default_upstream_address")]
    pub address: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Server-side statement execution time limit in seconds, injected once
    /// per session right after authentication.
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

/// Sanitization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SanitizeConfig {
    /// Whether result-set rows are rewritten at all. With this off the
    /// relay still gates commands but forwards rows verbatim.
    #[serde(default = "default_sanitize_enabled")]
    pub enabled: bool,

    /// Secret salt appended to values before hashing.
    /// Supports environment variable expansion: "${SANITIZER_SALT}"
    #[serde(default)]
    pub salt: String,

    /// Case-insensitive patterns marking sensitive column names.
    /// A column is sanitized when any pattern matches its name.
    #[serde(default)]
    pub sensitive_columns: Vec<String>,
}

impl SanitizeConfig {
    /// Get the salt with environment variables expanded.
    #[must_use]
    pub fn salt_bytes(&self) -> Vec<u8> {
        expand_env_vars(&self.salt).into_bytes()
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable
/// `VAR_NAME`. If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_listen_address() -> String {
    "0.0.0.0:3306".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_session_buffer() -> usize {
    32
}

fn default_upstream_address() -> String {
    "localhost:3306".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_statement_timeout_secs() -> u64 {
    20
}

fn default_sanitize_enabled() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_connections: default_max_connections(),
            session_buffer: default_session_buffer(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: default_upstream_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            enabled: default_sanitize_enabled(),
            salt: String::new(),
            sensitive_columns: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Configuration loading and validation

impl ProxyConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if it is
    /// accessible by group/other, or if validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        verify_permissions(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - either address is not `host:port`
    /// - the statement timeout is zero
    /// - sensitive columns are configured without a salt
    /// - any sensitive-column pattern fails to compile
    pub fn validate(&self) -> ConfigResult<()> {
        split_host_port(&self.listen.address)?;
        split_host_port(&self.upstream.address)?;

        if self.upstream.statement_timeout_secs == 0 {
            return Err(ConfigError::InvalidStatementTimeout);
        }

        if !self.sanitize.sensitive_columns.is_empty() && self.sanitize.salt_bytes().is_empty() {
            return Err(ConfigError::MissingSalt);
        }

        PatternPolicy::new(&self.sanitize.sensitive_columns)?;

        Ok(())
    }
}

/// Split a `host:port` address, validating the port.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAddress`] when the address has no colon or
/// a non-numeric port.
pub fn split_host_port(addr: &str) -> ConfigResult<(String, u16)> {
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    if parts.len() != 2 || parts[1].is_empty() {
        return Err(ConfigError::InvalidAddress(addr.to_string()));
    }
    let port: u16 = parts[0]
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))?;
    Ok((parts[1].to_string(), port))
}

/// Reject config files readable or writable by group/other.
#[cfg(unix)]
fn verify_permissions(path: &Path) -> ConfigResult<()> {
    use std::os::unix::fs::MetadataExt;

    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;
    let mode = metadata.mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(ConfigError::PermissiveMode {
            path: path.display().to_string(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn verify_permissions(_path: &Path) -> ConfigResult<()> {
    Ok(())
}
