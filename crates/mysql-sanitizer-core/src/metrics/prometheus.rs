//! Prometheus metrics for the MySQL sanitizing proxy.
//!
//! Provides counters, histograms, and gauges for monitoring session health
//! and sanitization activity.

use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder,
};

/// Proxy metrics collection.
///
/// Contains all metrics exposed by the proxy for monitoring.
pub struct ProxyMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Current active client sessions.
    pub active_sessions: IntGauge,

    /// Total sessions accepted since startup.
    pub sessions_total: Counter,

    /// Total packets relayed, labelled by direction.
    pub packets_relayed: CounterVec,

    /// Total result-set rows rewritten with hashed values.
    pub rows_rewritten: Counter,

    /// Total individual column values replaced by a hash.
    pub values_hashed: Counter,

    /// Total commands rejected as unsupported, labelled by command name.
    pub unsupported_commands: CounterVec,

    /// Total session-ending errors, labelled by error kind.
    pub session_errors: CounterVec,

    /// Query response latency from command forward to terminal packet.
    pub query_duration_seconds: Histogram,
}

impl ProxyMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_sessions = IntGauge::new(
            "mysql_sanitizer_active_sessions",
            "Current number of active client sessions",
        )
        .expect("metric creation should succeed");

        let sessions_total = Counter::new(
            "mysql_sanitizer_sessions_total",
            "Total number of sessions accepted since startup",
        )
        .expect("metric creation should succeed");

        let packets_relayed = CounterVec::new(
            Opts::new(
                "mysql_sanitizer_packets_relayed_total",
                "Total number of packets relayed by direction",
            ),
            &["direction"],
        )
        .expect("metric creation should succeed");

        let rows_rewritten = Counter::new(
            "mysql_sanitizer_rows_rewritten_total",
            "Total number of result-set rows rewritten with hashed values",
        )
        .expect("metric creation should succeed");

        let values_hashed = Counter::new(
            "mysql_sanitizer_values_hashed_total",
            "Total number of column values replaced by a salted hash",
        )
        .expect("metric creation should succeed");

        let unsupported_commands = CounterVec::new(
            Opts::new(
                "mysql_sanitizer_unsupported_commands_total",
                "Total number of client commands rejected as unsupported",
            ),
            &["command"],
        )
        .expect("metric creation should succeed");

        let session_errors = CounterVec::new(
            Opts::new(
                "mysql_sanitizer_session_errors_total",
                "Total number of session-ending errors by kind",
            ),
            &["kind"],
        )
        .expect("metric creation should succeed");

        let query_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mysql_sanitizer_query_duration_seconds",
                "Query response latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 20.0,
            ]),
        )
        .expect("metric creation should succeed");

        // Register all metrics
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(sessions_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(packets_relayed.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(rows_rewritten.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(values_hashed.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(unsupported_commands.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(session_errors.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(query_duration_seconds.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            active_sessions,
            sessions_total,
            packets_relayed,
            rows_rewritten,
            values_hashed,
            unsupported_commands,
            session_errors,
            query_duration_seconds,
        }
    }

    /// Record a newly accepted session.
    pub fn record_session_started(&self) {
        self.sessions_total.inc();
        self.active_sessions.inc();
    }

    /// Record a session ending for any reason.
    pub fn record_session_closed(&self) {
        self.active_sessions.dec();
    }

    /// Record a packet relayed toward the client.
    pub fn record_packet_toward_client(&self) {
        self.packets_relayed.with_label_values(&["toward_client"]).inc();
    }

    /// Record a packet relayed toward the server.
    pub fn record_packet_toward_server(&self) {
        self.packets_relayed.with_label_values(&["toward_server"]).inc();
    }

    /// Record a rewritten row and the number of values hashed in it.
    pub fn record_row_rewritten(&self, hashed_values: u64) {
        self.rows_rewritten.inc();
        self.values_hashed.inc_by(hashed_values as f64);
    }

    /// Record a command rejected as unsupported.
    pub fn record_unsupported_command(&self, command: &str) {
        self.unsupported_commands.with_label_values(&[command]).inc();
    }

    /// Record a session-ending error by kind.
    pub fn record_session_error(&self, kind: &str) {
        self.session_errors.with_label_values(&[kind]).inc();
    }

    /// Record the latency of one query response.
    pub fn record_query_duration(&self, duration_seconds: f64) {
        self.query_duration_seconds.observe(duration_seconds);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ProxyMetrics::new();
        assert!(metrics.encode().is_ok());
    }

    #[test]
    fn test_session_gauges() {
        let metrics = ProxyMetrics::new();

        metrics.record_session_started();
        metrics.record_session_started();
        metrics.record_session_closed();

        assert_eq!(metrics.active_sessions.get(), 1);

        let output = metrics.encode().unwrap();
        assert!(output.contains("mysql_sanitizer_active_sessions"));
        assert!(output.contains("mysql_sanitizer_sessions_total"));
    }

    #[test]
    fn test_packet_counters() {
        let metrics = ProxyMetrics::new();
        metrics.record_packet_toward_client();
        metrics.record_packet_toward_client();
        metrics.record_packet_toward_server();

        let output = metrics.encode().unwrap();
        assert!(output.contains("mysql_sanitizer_packets_relayed_total"));
        assert!(output.contains("toward_client"));
        assert!(output.contains("toward_server"));
    }

    #[test]
    fn test_row_rewrite_counters() {
        let metrics = ProxyMetrics::new();
        metrics.record_row_rewritten(3);
        metrics.record_row_rewritten(1);

        assert_eq!(metrics.rows_rewritten.get() as u64, 2);
        assert_eq!(metrics.values_hashed.get() as u64, 4);
    }

    #[test]
    fn test_unsupported_command_counter() {
        let metrics = ProxyMetrics::new();
        metrics.record_unsupported_command("COM_STMT_PREPARE");

        let output = metrics.encode().unwrap();
        assert!(output.contains("mysql_sanitizer_unsupported_commands_total"));
        assert!(output.contains("COM_STMT_PREPARE"));
    }

    #[test]
    fn test_session_error_counter() {
        let metrics = ProxyMetrics::new();
        metrics.record_session_error("transport");
        metrics.record_session_error("malformed_packet");

        let output = metrics.encode().unwrap();
        assert!(output.contains("mysql_sanitizer_session_errors_total"));
        assert!(output.contains("malformed_packet"));
    }

    #[test]
    fn test_query_duration() {
        let metrics = ProxyMetrics::new();
        metrics.record_query_duration(0.002);
        metrics.record_query_duration(0.050);

        let output = metrics.encode().unwrap();
        assert!(output.contains("mysql_sanitizer_query_duration_seconds"));
    }
}
