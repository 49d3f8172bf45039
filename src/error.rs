//! # Error Types
//!
//! Error handling for the peer protocol core.
//!
//! Every failure the wire layer, the connection layer or the node can produce is a
//! variant of [`ProtocolError`]. Errors are never used for ordinary control flow:
//! framing, integrity and compression errors are local to one connection and end
//! up in the owning node's fault log (see [`FaultKind`]).
//!
//! ## Error Categories
//! - **Framing**: declared lengths inconsistent with the bytes actually present,
//!   frames above the size ceiling, malformed sub-packets
//! - **Integrity**: the recomputed message id does not match the embedded one
//! - **Compression**: unsupported method tags, codec failures, size limit violations
//! - **Protocol mismatch**: the peer belongs to a different network fingerprint
//! - **Transport**: the underlying write or connect failed, or the connection is gone
//!
//! ## Example Usage
//! ```rust
//! use peer_protocol::error::{ProtocolError, Result};
//! use peer_protocol::core::base58;
//!
//! fn parse_timestamp(text: &str) -> Result<u64> {
//!     base58::decode_u64(text)
//! }
//!
//! match parse_timestamp("0OIl") {
//!     Err(ProtocolError::InvalidBase58(c)) => assert_eq!(c, '0'),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use serde::Serialize;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Framing errors
    pub const ERR_SHORT_FRAME: &str = "Frame shorter than its length header";
    pub const ERR_TRUNCATED_SUBPACKET: &str = "Sub-packet header truncated";
    pub const ERR_SUBPACKET_OVERRUN: &str = "Sub-packet length overruns frame body";
    pub const ERR_MISSING_HEADERS: &str = "Frame carries fewer than four metadata sub-packets";
    pub const ERR_BAD_MSG_TYPE: &str = "Message type sub-packet must be exactly one byte";
    pub const ERR_BAD_TIMESTAMP: &str = "Timestamp sub-packet is not a valid base58 integer";
    pub const ERR_BODY_TOO_LARGE: &str = "Frame body does not fit a 32-bit length";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_OUTBOUND_QUEUE_FULL: &str = "Outbound queue full";
    pub const ERR_NOTHING_TO_RESEND: &str = "Resend requested before any message was sent";

    /// Handshake errors
    pub const ERR_HANDSHAKE_SHAPE: &str = "Handshake payload has the wrong number of fields";
    pub const ERR_HANDSHAKE_ADDRESS: &str = "Handshake address field is not a [host, port] pair";
    pub const ERR_HANDSHAKE_SELF: &str = "Handshake carries our own node id";
    pub const ERR_HANDSHAKE_EMPTY_ID: &str = "Handshake carries an empty node id";
    pub const ERR_HANDSHAKE_REPEATED: &str =
        "Handshake announces a different node id than the connection already has";

    /// Renegotiation errors
    pub const ERR_RENEGOTIATE_SHAPE: &str = "Renegotiation payload is missing its sub-type";

    /// Miscellaneous
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_BASE58_OVERFLOW: &str = "Base58 value does not fit in 64 bits";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    OversizedFrame { size: usize, max: usize },

    #[error("Integrity check failed: embedded id {embedded} != computed id {computed}")]
    Integrity { embedded: String, computed: String },

    #[error("Unsupported compression method: 0x{0:02x}")]
    UnsupportedCompression(u8),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Protocol mismatch: local fingerprint {local}, remote fingerprint {remote}")]
    ProtocolMismatch { local: String, remote: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid base58 character: {0:?}")]
    InvalidBase58(char),

    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Classify this error for the fault log.
    pub fn kind(&self) -> FaultKind {
        match self {
            ProtocolError::Framing(_)
            | ProtocolError::OversizedFrame { .. }
            | ProtocolError::UnknownMessageType(_)
            | ProtocolError::InvalidBase58(_) => FaultKind::Framing,
            ProtocolError::Integrity { .. } => FaultKind::Integrity,
            ProtocolError::UnsupportedCompression(_)
            | ProtocolError::CompressionFailure
            | ProtocolError::DecompressionFailure => FaultKind::Compression,
            ProtocolError::ProtocolMismatch { .. } => FaultKind::ProtocolMismatch,
            ProtocolError::Io(_)
            | ProtocolError::Transport(_)
            | ProtocolError::ConnectionClosed => FaultKind::Transport,
            ProtocolError::Handshake(_) | ProtocolError::Json(_) => FaultKind::Handshake,
            ProtocolError::ConfigError(_) | ProtocolError::Custom(_) => FaultKind::Other,
        }
    }

    /// Whether this error forces the connection it occurred on to close.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.kind(),
            FaultKind::Framing
                | FaultKind::Integrity
                | FaultKind::Compression
                | FaultKind::ProtocolMismatch
                | FaultKind::Transport
        )
    }
}

/// Coarse error category recorded alongside each fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FaultKind {
    Framing,
    Integrity,
    Compression,
    ProtocolMismatch,
    Transport,
    Handshake,
    Handler,
    Other,
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
