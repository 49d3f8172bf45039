//! Reserved flag bytes.
//!
//! Values `0x00..=0x1F` are reserved by the protocol. Main flags occupy the
//! message-type sub-packet, sub-flags lead the payload of control and meta
//! messages, and compression tags (`0x10..=0x1F`) name compression methods.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest reserved flag value.
pub const RESERVED_MAX: u8 = 0x1F;

/// First byte of the compression tag range.
pub const COMPRESSION_RANGE_START: u8 = 0x10;

/// Whether `byte` is reserved and must not be used by application payload conventions.
#[inline]
pub fn is_reserved(byte: u8) -> bool {
    byte <= RESERVED_MAX
}

/// Whether `byte` falls in the compression tag range.
#[inline]
pub fn is_compression_tag(byte: u8) -> bool {
    (COMPRESSION_RANGE_START..=RESERVED_MAX).contains(&byte)
}

/// Main flag carried in an envelope's message-type sub-packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Broadcast = 0x00,
    Renegotiate = 0x01,
    Whisper = 0x02,
    Ping = 0x03,
    Pong = 0x04,
}

impl MessageType {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Broadcast and whisper messages are cached for resend; control messages are not.
    #[inline]
    pub fn is_resendable(self) -> bool {
        matches!(self, MessageType::Broadcast | MessageType::Whisper)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Broadcast => "broadcast",
            MessageType::Renegotiate => "renegotiate",
            MessageType::Whisper => "whisper",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(MessageType::Broadcast),
            0x01 => Ok(MessageType::Renegotiate),
            0x02 => Ok(MessageType::Whisper),
            0x03 => Ok(MessageType::Ping),
            0x04 => Ok(MessageType::Pong),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sub-flags leading the payload of control and meta messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SubFlag {
    Compression = 0x01,
    Handshake = 0x05,
    Notify = 0x06,
    Peers = 0x07,
    Request = 0x08,
    Resend = 0x09,
    Response = 0x0A,
    Store = 0x0B,
    Retrieve = 0x0C,
}

impl SubFlag {
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Single-byte payload packet carrying this sub-flag.
    #[inline]
    pub fn packet(self) -> [u8; 1] {
        [self as u8]
    }

    /// Recognise a payload packet as a sub-flag (it must be exactly one byte).
    pub fn from_packet(packet: &[u8]) -> Option<Self> {
        match packet {
            [byte] => Self::try_from(*byte).ok(),
            _ => None,
        }
    }
}

impl TryFrom<u8> for SubFlag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(SubFlag::Compression),
            0x05 => Ok(SubFlag::Handshake),
            0x06 => Ok(SubFlag::Notify),
            0x07 => Ok(SubFlag::Peers),
            0x08 => Ok(SubFlag::Request),
            0x09 => Ok(SubFlag::Resend),
            0x0A => Ok(SubFlag::Response),
            0x0B => Ok(SubFlag::Store),
            0x0C => Ok(SubFlag::Retrieve),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}
