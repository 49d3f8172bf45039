//! Peer handshake.
//!
//! Both ends send a handshake as soon as a connection is attached. It is a
//! `whisper` whose payload is
//!
//! ```text
//! [0x05, node_id, fingerprint, json([host, port]), json(compression tags)]
//! ```
//!
//! The receiver checks the fingerprint against its own protocol identity and
//! refuses connections to itself; the node then promotes the connection from
//! the pending set into its routing table.

use crate::core::envelope::Envelope;
use crate::core::identity::ProtocolIdentity;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::flags::{MessageType, SubFlag};
use crate::protocol::renegotiate::{decode_tag_list, encode_tag_list};
use bytes::Bytes;
use tracing::{debug, instrument};

/// Number of payload packets in a handshake, sub-flag included.
const HANDSHAKE_FIELDS: usize = 5;

/// What a peer announced about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub node_id: String,
    pub fingerprint: String,
    pub host: String,
    pub port: u16,
    pub compression: Vec<u8>,
}

/// Build the handshake payload for the local node.
pub fn build_payload(
    node_id: &str,
    protocol: &ProtocolIdentity,
    host: &str,
    port: u16,
    compression: &[u8],
) -> Result<Vec<Bytes>> {
    Ok(vec![
        Bytes::copy_from_slice(&SubFlag::Handshake.packet()),
        Bytes::copy_from_slice(node_id.as_bytes()),
        Bytes::from(protocol.fingerprint()),
        Bytes::from(serde_json::to_vec(&(host, port))?),
        Bytes::from(encode_tag_list(compression)?),
    ])
}

/// Whether an envelope is a handshake.
pub fn is_handshake(envelope: &Envelope) -> bool {
    envelope.msg_type() == MessageType::Whisper
        && envelope
            .payload()
            .first()
            .and_then(|packet| SubFlag::from_packet(packet))
            == Some(SubFlag::Handshake)
}

/// Parse a handshake payload (sub-flag included).
///
/// # Errors
/// `ProtocolError::Handshake` for a payload of the wrong shape, an empty or
/// non-UTF-8 id, or an address that is not a `[host, port]` pair.
pub fn parse_payload(payload: &[Bytes]) -> Result<HandshakeInfo> {
    if payload.len() != HANDSHAKE_FIELDS
        || SubFlag::from_packet(&payload[0]) != Some(SubFlag::Handshake)
    {
        return Err(ProtocolError::Handshake(constants::ERR_HANDSHAKE_SHAPE.into()));
    }

    let node_id = std::str::from_utf8(&payload[1])
        .map_err(|_| ProtocolError::Handshake(constants::ERR_HANDSHAKE_SHAPE.into()))?;
    if node_id.is_empty() {
        return Err(ProtocolError::Handshake(
            constants::ERR_HANDSHAKE_EMPTY_ID.into(),
        ));
    }

    let fingerprint = std::str::from_utf8(&payload[2])
        .map_err(|_| ProtocolError::Handshake(constants::ERR_HANDSHAKE_SHAPE.into()))?;

    let (host, port): (String, u16) = serde_json::from_slice(&payload[3])
        .map_err(|_| ProtocolError::Handshake(constants::ERR_HANDSHAKE_ADDRESS.into()))?;

    let compression = decode_tag_list(&payload[4])?;

    Ok(HandshakeInfo {
        node_id: node_id.to_string(),
        fingerprint: fingerprint.to_string(),
        host,
        port,
        compression,
    })
}

/// Validate a received handshake against the local node.
///
/// # Errors
/// - `ProtocolError::ProtocolMismatch` if the fingerprints differ
/// - `ProtocolError::Handshake` if the peer claims our own id
#[instrument(skip(envelope, protocol), fields(sender = %envelope.sender()))]
pub fn verify(
    envelope: &Envelope,
    protocol: &ProtocolIdentity,
    local_id: &str,
) -> Result<HandshakeInfo> {
    let info = parse_payload(envelope.payload())?;

    let local = protocol.fingerprint();
    if info.fingerprint != local {
        return Err(ProtocolError::ProtocolMismatch {
            local,
            remote: info.fingerprint,
        });
    }

    if info.node_id == local_id {
        return Err(ProtocolError::Handshake(constants::ERR_HANDSHAKE_SELF.into()));
    }

    debug!(peer = %info.node_id, host = %info.host, port = info.port, "Handshake verified");
    Ok(info)
}
