//! # Message Envelope
//!
//! The logical message and its wire form.
//!
//! ## Wire Format
//! ```text
//! Frame     := LEN32BE(body) BODY
//! BODY      := SubPacket{4,..}      -- after optional whole-body decompression
//! SubPacket := LEN32BE(bytes) bytes
//! order     := msg_type, sender_id, id, timestamp_base58, payload...
//! ```
//!
//! The `id` is a content-and-time checksum,
//! `base58(SHA-384(concat(payload) ‖ base58(timestamp)))`. It is recomputed on
//! demand and checked on every decode, so a corrupted payload never reaches a
//! handler.
//!
//! ## Security
//! - Declared lengths are checked against the bytes actually present before use
//! - Decompression output is bounded by the frame ceiling

use crate::core::base58;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::flags::MessageType;
use crate::utils::compression::{self, CompressionKind};
use crate::utils::time;
use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha384};
use tracing::trace;

/// Size of every length prefix on the wire.
pub const LENGTH_PREFIX: usize = 4;

/// Number of metadata sub-packets preceding the payload.
const HEADER_PACKETS: usize = 4;

/// What happened to the body during decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// No offered tag was in the supported set, so nothing was tried.
    NotAttempted,
    /// The body was decompressed with this method.
    Decompressed(CompressionKind),
    /// Every candidate failed; the body was read as uncompressed.
    Failed,
}

/// A logical message before encoding or after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    msg_type: MessageType,
    sender_id: Bytes,
    payload: Vec<Bytes>,
    compression_offer: Vec<u8>,
    timestamp: u64,
}

impl Envelope {
    pub fn new(
        msg_type: MessageType,
        sender_id: impl Into<Bytes>,
        payload: Vec<Bytes>,
        timestamp: u64,
    ) -> Self {
        Self {
            msg_type,
            sender_id: sender_id.into(),
            payload,
            compression_offer: Vec::new(),
            timestamp,
        }
    }

    /// Envelope stamped with the current time.
    ///
    /// # Errors
    /// Returns `ProtocolError::Custom` if the system clock is before the epoch.
    pub fn now(
        msg_type: MessageType,
        sender_id: impl Into<Bytes>,
        payload: Vec<Bytes>,
    ) -> Result<Self> {
        Ok(Self::new(msg_type, sender_id, payload, time::unix_timestamp()?))
    }

    /// Attach the compression tags the receiving side accepts.
    pub fn with_compression_offer(mut self, offer: Vec<u8>) -> Self {
        self.compression_offer = offer;
        self
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn sender_id(&self) -> &Bytes {
        &self.sender_id
    }

    /// Sender id as text, lossy for non-UTF-8 ids.
    pub fn sender(&self) -> String {
        String::from_utf8_lossy(&self.sender_id).into_owned()
    }

    pub fn payload(&self) -> &[Bytes] {
        &self.payload
    }

    pub fn compression_offer(&self) -> &[u8] {
        &self.compression_offer
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn timestamp_base58(&self) -> String {
        base58::encode_u64(self.timestamp)
    }

    /// Content and time checksum of this message.
    pub fn id(&self) -> String {
        compute_id(&self.payload, &self.timestamp_base58())
    }

    /// Method used to compress this envelope on the wire, if any.
    pub fn compression_used(&self) -> Option<CompressionKind> {
        compression::select(&self.compression_offer)
    }

    /// Encode into a complete frame (length header included).
    ///
    /// # Errors
    /// `ProtocolError::Framing` if the body does not fit a 32-bit length,
    /// `ProtocolError::CompressionFailure` if the selected codec fails.
    pub fn encode(&self) -> Result<Bytes> {
        self.encode_with_threshold(0)
    }

    /// Encode, leaving bodies shorter than `threshold_bytes` uncompressed.
    pub fn encode_with_threshold(&self, threshold_bytes: usize) -> Result<Bytes> {
        let id = self.id();
        let timestamp = self.timestamp_base58();
        let msg_type = [self.msg_type.as_byte()];

        let headers: [&[u8]; HEADER_PACKETS] = [
            &msg_type,
            &self.sender_id,
            id.as_bytes(),
            timestamp.as_bytes(),
        ];
        let packets: Vec<&[u8]> = headers
            .into_iter()
            .chain(self.payload.iter().map(|p| p.as_ref()))
            .collect();

        let body_len: usize = packets.iter().map(|p| LENGTH_PREFIX + p.len()).sum();

        let mut body = BytesMut::with_capacity(body_len);
        for packet in packets {
            body.put_u32(length_u32(packet.len())?);
            body.put_slice(packet);
        }

        let body = match self.compression_used() {
            Some(kind) => {
                let (compressed, applied) =
                    compression::maybe_compress(&body, &kind, threshold_bytes)?;
                trace!(method = kind.name(), applied, "Frame body compression");
                Bytes::from(compressed)
            }
            None => body.freeze(),
        };

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + body.len());
        frame.put_u32(length_u32(body.len())?);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    /// Decode a frame.
    ///
    /// Unless `sizeless`, the leading length header must describe the rest of the
    /// buffer exactly. `offered` is tried in order for decompression; bodies that
    /// no offered method decodes are read as uncompressed.
    ///
    /// # Errors
    /// `ProtocolError::Framing` for inconsistent lengths or malformed sub-packets,
    /// `ProtocolError::Integrity` when the embedded id does not match.
    pub fn decode(bytes: &[u8], sizeless: bool, offered: &[u8]) -> Result<Self> {
        Self::decode_with_outcome(bytes, sizeless, offered).map(|(envelope, _)| envelope)
    }

    /// [`Envelope::decode`], also reporting what happened during decompression.
    pub fn decode_with_outcome(
        bytes: &[u8],
        sizeless: bool,
        offered: &[u8],
    ) -> Result<(Self, CompressionOutcome)> {
        let body = if sizeless {
            bytes
        } else {
            if bytes.len() < LENGTH_PREFIX {
                return Err(ProtocolError::Framing(constants::ERR_SHORT_FRAME.into()));
            }
            let declared = read_length(bytes);
            let actual = bytes.len() - LENGTH_PREFIX;
            if declared != actual {
                return Err(ProtocolError::Framing(format!(
                    "Real message size {actual} != expected size {declared}"
                )));
            }
            &bytes[LENGTH_PREFIX..]
        };

        let (body, outcome) = decompress_body(body, offered);
        let packets = split_packets(body)?;
        if packets.len() < HEADER_PACKETS {
            return Err(ProtocolError::Framing(constants::ERR_MISSING_HEADERS.into()));
        }

        let msg_type = match packets[0].as_ref() {
            [byte] => MessageType::try_from(*byte)?,
            _ => return Err(ProtocolError::Framing(constants::ERR_BAD_MSG_TYPE.into())),
        };
        let timestamp_text = std::str::from_utf8(&packets[3])
            .map_err(|_| ProtocolError::Framing(constants::ERR_BAD_TIMESTAMP.into()))?;
        let timestamp = base58::decode_u64(timestamp_text)?;

        let mut packets = packets.into_iter();
        let _msg_type = packets.next();
        let sender_id = packets.next().unwrap_or_default();
        let embedded_id = packets.next().unwrap_or_default();
        let _timestamp = packets.next();
        let payload: Vec<Bytes> = packets.collect();

        let envelope = Envelope {
            msg_type,
            sender_id,
            payload,
            compression_offer: offered.to_vec(),
            timestamp,
        };

        let computed = envelope.id();
        if embedded_id.as_ref() != computed.as_bytes() {
            return Err(ProtocolError::Integrity {
                embedded: String::from_utf8_lossy(&embedded_id).into_owned(),
                computed,
            });
        }

        Ok((envelope, outcome))
    }
}

/// `base58(SHA-384(concat(payload) ‖ timestamp_base58))`
pub fn compute_id(payload: &[Bytes], timestamp_base58: &str) -> String {
    let mut hasher = Sha384::new();
    for packet in payload {
        hasher.update(packet);
    }
    hasher.update(timestamp_base58.as_bytes());
    base58::encode(&hasher.finalize())
}

#[inline]
fn read_length(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

#[inline]
fn length_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| ProtocolError::Framing(constants::ERR_BODY_TOO_LARGE.into()))
}

fn decompress_body(body: &[u8], offered: &[u8]) -> (Bytes, CompressionOutcome) {
    let mut outcome = CompressionOutcome::NotAttempted;
    for kind in offered.iter().filter_map(|&tag| CompressionKind::from_tag(tag)) {
        match compression::decompress(body, &kind) {
            Ok(raw) => return (Bytes::from(raw), CompressionOutcome::Decompressed(kind)),
            Err(_) => {
                trace!(method = kind.name(), "Decompression candidate failed");
                outcome = CompressionOutcome::Failed;
            }
        }
    }
    (Bytes::copy_from_slice(body), outcome)
}

fn split_packets(body: Bytes) -> Result<Vec<Bytes>> {
    let mut packets = Vec::new();
    let mut cursor = 0usize;

    while cursor < body.len() {
        if body.len() - cursor < LENGTH_PREFIX {
            return Err(ProtocolError::Framing(
                constants::ERR_TRUNCATED_SUBPACKET.into(),
            ));
        }
        let len = read_length(&body[cursor..]);
        cursor += LENGTH_PREFIX;
        if len > body.len() - cursor {
            return Err(ProtocolError::Framing(constants::ERR_SUBPACKET_OVERRUN.into()));
        }
        packets.push(body.slice(cursor..cursor + len));
        cursor += len;
    }

    Ok(packets)
}
