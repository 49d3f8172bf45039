//! # Transport Layer
//!
//! Per-peer connection state over any `AsyncRead + AsyncWrite` byte stream.
//! TCP is the transport the node opens and accepts; tests use in-memory
//! duplex streams through the same path.

pub mod connection;

pub use connection::{Connection, ConnectionId, ConnectionSettings, Direction, Received};
