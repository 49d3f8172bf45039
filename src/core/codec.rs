//! # Frame Reassembly
//!
//! [`FrameCodec`] turns a raw byte stream into complete frames. It is a two-state
//! machine:
//!
//! ```text
//! AwaitingHeader (expect 4)  --4 bytes buffered-->  AwaitingBody (expect N + 4)
//! AwaitingBody   (expect N+4) --N+4 bytes buffered--> emit frame, AwaitingHeader
//! ```
//!
//! Parsing the header consumes nothing; the emitted frame still starts with its
//! length header so it can be handed to [`Envelope::decode`] unchanged.
//! Declared lengths above the ceiling are rejected before any buffering happens.
//!
//! [`Envelope::decode`]: crate::core::envelope::Envelope::decode

use crate::config::MAX_FRAME_SIZE;
use crate::core::envelope::LENGTH_PREFIX;
use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Position of the reassembly state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    AwaitingHeader,
    /// `expected` counts the header as well as the body.
    AwaitingBody { expected: usize },
}

/// Length-prefixed frame codec with a configurable size ceiling.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: ReassemblyState,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: ReassemblyState::AwaitingHeader,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with a custom body size ceiling (clamped to the 32-bit length limit).
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(u32::MAX as usize);
        self
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Bytes that must be buffered before the machine can advance.
    pub fn expected_bytes(&self) -> usize {
        match self.state {
            ReassemblyState::AwaitingHeader => LENGTH_PREFIX,
            ReassemblyState::AwaitingBody { expected } => expected,
        }
    }

    /// Whether the current frame's header has been parsed.
    pub fn frame_header_seen(&self) -> bool {
        matches!(self.state, ReassemblyState::AwaitingBody { .. })
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                ReassemblyState::AwaitingHeader => {
                    if src.len() < LENGTH_PREFIX {
                        return Ok(None);
                    }

                    // Peek at the length (don't consume yet)
                    let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                    if declared > self.max_frame_size {
                        return Err(ProtocolError::OversizedFrame {
                            size: declared,
                            max: self.max_frame_size,
                        });
                    }

                    trace!(declared, "Frame header parsed");
                    self.state = ReassemblyState::AwaitingBody {
                        expected: declared + LENGTH_PREFIX,
                    };
                }
                ReassemblyState::AwaitingBody { expected } => {
                    if src.len() < expected {
                        src.reserve(expected - src.len());
                        return Ok(None);
                    }

                    let frame = src.split_to(expected).freeze();
                    self.state = ReassemblyState::AwaitingHeader;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    /// Writes an already encoded frame, enforcing the ceiling on the way out.
    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        let body_len = frame.len().saturating_sub(LENGTH_PREFIX);
        if body_len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}
