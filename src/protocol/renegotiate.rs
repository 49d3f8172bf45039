//! Renegotiation control messages.
//!
//! A `renegotiate` envelope never reaches application handlers. Its payload
//! starts with a sub-flag:
//!
//! - `compression` (0x01) followed by a JSON list of single-character strings,
//!   one per compression tag (`["\u0013", "\u0011"]`)
//! - `resend` (0x09) with nothing after it
//!
//! Any other sub-flag is ignored.

use crate::core::envelope::Envelope;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::flags::{MessageType, SubFlag};
use bytes::Bytes;

/// A parsed renegotiation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renegotiation {
    /// The peer's new list of acceptable compression tags, in its preference order.
    Compression(Vec<u8>),
    /// The peer asks for our last broadcast/whisper again.
    Resend,
}

/// Serialize compression tags as a JSON list of one-character strings.
pub fn encode_tag_list(tags: &[u8]) -> Result<Vec<u8>> {
    let entries: Vec<String> = tags.iter().map(|&tag| char::from(tag).to_string()).collect();
    Ok(serde_json::to_vec(&entries)?)
}

/// Parse a JSON tag list. Entries that are not a single character in
/// `U+0000..=U+00FF` cannot name a tag and are skipped.
pub fn decode_tag_list(bytes: &[u8]) -> Result<Vec<u8>> {
    let entries: Vec<String> = serde_json::from_slice(bytes)?;
    Ok(entries
        .iter()
        .filter_map(|entry| {
            let mut chars = entry.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => u8::try_from(u32::from(c)).ok(),
                _ => None,
            }
        })
        .collect())
}

/// Payload announcing a new compression list.
pub fn compression_payload(tags: &[u8]) -> Result<Vec<Bytes>> {
    Ok(vec![
        Bytes::copy_from_slice(&SubFlag::Compression.packet()),
        Bytes::from(encode_tag_list(tags)?),
    ])
}

/// Payload asking the peer to retransmit.
pub fn resend_payload() -> Vec<Bytes> {
    vec![Bytes::copy_from_slice(&SubFlag::Resend.packet())]
}

/// Interpret a renegotiate envelope.
///
/// Returns `Ok(None)` for sub-flags this side does not act on.
///
/// # Errors
/// `ProtocolError::Framing` when the payload is empty or a compression
/// request carries no list, `ProtocolError::Json` when the list is malformed.
pub fn parse(envelope: &Envelope) -> Result<Option<Renegotiation>> {
    debug_assert_eq!(envelope.msg_type(), MessageType::Renegotiate);

    let payload = envelope.payload();
    let first = payload
        .first()
        .ok_or_else(|| ProtocolError::Framing(constants::ERR_RENEGOTIATE_SHAPE.into()))?;

    match SubFlag::from_packet(first) {
        Some(SubFlag::Compression) => {
            let list = payload
                .get(1)
                .ok_or_else(|| ProtocolError::Framing(constants::ERR_RENEGOTIATE_SHAPE.into()))?;
            Ok(Some(Renegotiation::Compression(decode_tag_list(list)?)))
        }
        Some(SubFlag::Resend) => Ok(Some(Renegotiation::Resend)),
        _ => Ok(None),
    }
}
