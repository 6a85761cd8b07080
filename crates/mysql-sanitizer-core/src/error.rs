//! Domain error types for the MySQL sanitizing proxy.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Configuration file is readable or writable by group/other.
    #[error("config file '{path}' has permissive mode {mode:o}; it holds the salt and must be accessible only by its owner")]
    PermissiveMode { path: String, mode: u32 },

    /// Salt is required whenever sensitive column patterns are configured.
    #[error("sanitize.salt must be non-empty when sensitive_columns is non-empty")]
    MissingSalt,

    /// A sensitive-column pattern failed to compile.
    #[error("invalid sensitive column pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Statement timeout of zero would disable the server-side limit.
    #[error("upstream.statement_timeout_secs must be at least 1")]
    InvalidStatementTimeout,
}

/// Errors that occur during proxy operation.
///
/// `Transport` and `MalformedPacket` are always fatal to the session that
/// raised them. `UnsupportedCommand` is recoverable: the command loop answers
/// it with a synthesized error packet and keeps the session alive.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// TCP/IO failure on either socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Protocol decode failure on an unexpected field layout or truncated
    /// buffer.
    #[error("malformed packet: {message}")]
    MalformedPacket { message: String },

    /// Client issued a command byte outside the supported set.
    #[error("unsupported command 0x{command:02x}")]
    UnsupportedCommand { command: u8 },

    /// Upstream rejected the relayed credentials during the handshake.
    #[error("upstream authentication failed: {message}")]
    UpstreamAuthFailure { message: String },

    /// Upstream rejected the injected statement-timeout command.
    #[error("failed to set statement timeout upstream: {message}")]
    UpstreamTimeoutConfig { message: String },

    /// The peer end of the session bridge is gone.
    #[error("session bridge closed")]
    BridgeClosed,

    /// Shutdown signal received.
    #[error("proxy shutting down")]
    Shutdown,
}

impl ProxyError {
    /// Whether this error should end the session.
    ///
    /// Everything except `UnsupportedCommand` is fatal; the command loop
    /// never propagates `UnsupportedCommand` past its synthesized reply.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProxyError::UnsupportedCommand { .. })
    }

    /// Whether this error is an orderly end of the session rather than a
    /// fault: the peer hung up or the proxy is shutting down.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Transport(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            ProxyError::BridgeClosed | ProxyError::Shutdown => true,
            _ => false,
        }
    }

    /// Short stable label used as a metrics dimension.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            ProxyError::Transport(_) => "transport",
            ProxyError::MalformedPacket { .. } => "malformed_packet",
            ProxyError::UnsupportedCommand { .. } => "unsupported_command",
            ProxyError::UpstreamAuthFailure { .. } => "upstream_auth",
            ProxyError::UpstreamTimeoutConfig { .. } => "timeout_config",
            ProxyError::BridgeClosed => "bridge_closed",
            ProxyError::Shutdown => "shutdown",
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
