//! # Core Protocol Components
//!
//! Wire-level building blocks: base58 text encoding, the protocol fingerprint,
//! the message envelope and the frame reassembly codec.
//!
//! ## Wire Format
//! ```text
//! Frame     := LEN32BE(body) BODY
//! BODY      := SubPacket{4,..}   (optionally compressed as a whole)
//! SubPacket := LEN32BE(bytes) bytes
//! order     := msg_type, sender_id, id, timestamp_base58, payload...
//! ```
//!
//! ## Security
//! - Frame bodies are capped (16 MiB by default) before anything is buffered
//! - Decompressed output is capped at the same ceiling
//! - Every decoded envelope's id is recomputed and compared

pub mod base58;
pub mod codec;
pub mod envelope;
pub mod identity;
