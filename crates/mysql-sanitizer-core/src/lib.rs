//! MySQL Sanitizing Proxy Core Library
//!
//! This library provides the core functionality for a transparent MySQL
//! proxy that rewrites query results in flight. Values in columns deemed
//! sensitive are replaced with salted hashes before they reach the client,
//! while everything else is relayed byte-for-byte.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`protocol`] - MySQL wire format: packets, length-encoded values, column metadata
//! - [`sanitize`] - Sensitivity policy and value hashing
//! - [`session`] - Per-session state and the client/upstream bridge
//! - [`network`] - TCP listener, packet codec, and the client-facing half
//! - [`upstream`] - The server-facing half and the relay state machine
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use mysql_sanitizer_core::config::ProxyConfig;
//!
//! // Load configuration
//! let config = ProxyConfig::from_file("config.yaml")?;
//!
//! // Start the proxy
//! // ...
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod protocol;
pub mod sanitize;
pub mod session;
pub mod upstream;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::ProxyConfig;
pub use error::{ConfigError, ConfigResult, ProxyError, Result};
pub use metrics::ProxyMetrics;
pub use network::ProxyListener;
pub use session::SessionContext;
