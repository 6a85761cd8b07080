//! Network layer for the MySQL sanitizing proxy.
//!
//! This module provides:
//! - TCP listener for accepting client sessions
//! - MySQL packet codec for framing the client byte stream
//! - Client-side pump relaying packets over the session bridge

pub mod client;
pub mod codec;
pub mod listener;

pub use client::ClientConnection;
pub use codec::PacketCodec;
pub use listener::ProxyListener;
