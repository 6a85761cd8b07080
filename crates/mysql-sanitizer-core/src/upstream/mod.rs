//! Upstream server connection management.
//!
//! Contains the packet-framed transport to the MySQL server and the
//! session handler that drives the server-facing half of each proxied
//! connection.

pub mod connection;
pub mod stream;

pub use connection::UpstreamSession;
pub use stream::UpstreamStream;
