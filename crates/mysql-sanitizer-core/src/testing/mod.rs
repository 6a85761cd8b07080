//! Test utilities for the MySQL sanitizing proxy.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockMysqlServer`] - A lightweight scripted MySQL server
//! - [`ProxyTestHarness`] - A complete test environment with mock server and proxy
//! - [`TestHarnessBuilder`] - Builder pattern for custom test configurations
//! - [`TestClient`] - A scripted client for driving the proxy
//!
//! # Example
//!
//! ```rust,ignore
//! use mysql_sanitizer_core::testing::{responses, ProxyTestHarness};
//!
//! #[tokio::test]
//! async fn test_query_relay() {
//!     let mut harness = ProxyTestHarness::new().await;
//!     harness
//!         .register_response(0x03, responses::result_set(&[("id", 11)], &[&[Some(b"7")]]))
//!         .await;
//!
//!     let mut client = harness.connect_client().await;
//!     let reply = client.query("SELECT id FROM users").await;
//!
//!     harness.shutdown().await;
//! }
//! ```

pub mod harness;
pub mod mock_server;

pub use harness::{
    row_fields, ProxyTestHarness, QueryReply, TestClient, TestHarnessBuilder, TextResultSet,
};
pub use mock_server::{
    column_definition_payload, greeting_payload, responses, text_row_payload, MockMysqlServer,
    ResponseGenerator, ServerCall,
};
