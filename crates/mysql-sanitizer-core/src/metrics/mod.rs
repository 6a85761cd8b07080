//! Metrics collection for the MySQL sanitizing proxy.
//!
//! Provides Prometheus-compatible metrics for monitoring session counts,
//! relay throughput, and sanitization activity.

pub mod prometheus;

pub use prometheus::ProxyMetrics;
