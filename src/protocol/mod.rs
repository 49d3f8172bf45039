//! # Protocol Layer
//!
//! Flag tables, the handshake and renegotiation control messages, and the
//! ordered handler chain that application messages are dispatched through.

pub mod dispatcher;
pub mod flags;
pub mod handshake;
pub mod renegotiate;
