//! Per-session wiring between the client-facing and server-facing tasks.
//!
//! This module provides:
//! - The session bridge: two FIFO packet channels plus combined teardown
//! - The immutable session context carrying salt, timeouts, and policy

pub mod bridge;
pub mod context;

pub use bridge::{ClientEnd, SessionBridge, UpstreamEnd};
pub use context::SessionContext;
