//! Compression codec registry.
//!
//! Maps compression-method tags to codecs. The registry is a compile-time table:
//! stateless, and safe to call from any number of tasks at once.
//!
//! [`SUPPORTED`] lists the methods in canonical order. That order is the global
//! priority used to pick a method from a peer's offer (see [`select`]), so it is
//! part of the wire contract and must not be reordered.

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// zlib-wrapped deflate
    Zlib,
    /// gzip-wrapped deflate
    Gzip,
    Zstd,
    Lz4,
}

/// Supported methods in canonical (global priority) order.
pub const SUPPORTED: [CompressionKind; 4] = [
    CompressionKind::Zlib,
    CompressionKind::Gzip,
    CompressionKind::Zstd,
    CompressionKind::Lz4,
];

/// Maximum output size for decompression (aligned with the frame ceiling to prevent DoS)
const MAX_DECOMPRESSION_SIZE: usize = MAX_FRAME_SIZE;

impl CompressionKind {
    /// Wire tag of this method.
    pub const fn tag(self) -> u8 {
        match self {
            CompressionKind::Gzip => 0x11,
            CompressionKind::Zlib => 0x13,
            CompressionKind::Zstd => 0x15,
            CompressionKind::Lz4 => 0x16,
        }
    }

    /// Look up a supported method by tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        SUPPORTED.iter().copied().find(|kind| kind.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Zlib => "zlib",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Zstd => "zstd",
            CompressionKind::Lz4 => "lz4",
        }
    }
}

impl TryFrom<u8> for CompressionKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self> {
        Self::from_tag(tag).ok_or(ProtocolError::UnsupportedCompression(tag))
    }
}

/// Tags of all supported methods in canonical order.
pub fn supported_tags() -> Vec<u8> {
    SUPPORTED.iter().map(|kind| kind.tag()).collect()
}

/// Pick the method for an offer: the first entry of [`SUPPORTED`] that appears
/// anywhere in `offer`. Global priority wins over the offer's own ordering.
pub fn select(offer: &[u8]) -> Option<CompressionKind> {
    SUPPORTED
        .iter()
        .copied()
        .find(|kind| offer.contains(&kind.tag()))
}

/// Supported tags that appear in `offer`, in the offer's order.
pub fn intersect_supported(offer: &[u8]) -> Vec<u8> {
    offer
        .iter()
        .copied()
        .filter(|&tag| CompressionKind::from_tag(tag).is_some())
        .collect()
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            encoder
                .finish()
                .map_err(|_| ProtocolError::CompressionFailure)
        }
        CompressionKind::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            encoder
                .finish()
                .map_err(|_| ProtocolError::CompressionFailure)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Enforces a maximum output size limit to prevent decompression bombs.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds MAX_DECOMPRESSION_SIZE
pub fn decompress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match *kind {
        CompressionKind::Zlib => read_bounded(flate2::read::ZlibDecoder::new(data)),
        CompressionKind::Gzip => read_bounded(flate2::read::GzDecoder::new(data)),
        CompressionKind::Zstd => {
            let reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            read_bounded(reader)
        }
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4 bytes little-endian;
            // reject oversized claims before it allocates
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }

            let decompressed = lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            if decompressed.len() > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }
            Ok(decompressed)
        }
    }
}

/// Compress by wire tag.
///
/// # Errors
/// `ProtocolError::UnsupportedCompression` for tags outside the supported set.
pub fn compress_tagged(data: &[u8], tag: u8) -> Result<Vec<u8>> {
    compress(data, &CompressionKind::try_from(tag)?)
}

/// Decompress by wire tag.
///
/// # Errors
/// `ProtocolError::UnsupportedCompression` for tags outside the supported set.
pub fn decompress_tagged(data: &[u8], tag: u8) -> Result<Vec<u8>> {
    decompress(data, &CompressionKind::try_from(tag)?)
}

/// Compress data if it meets the configured threshold, otherwise return it unchanged.
/// Returns the output bytes and a flag indicating whether compression was applied.
pub fn maybe_compress(
    data: &[u8],
    kind: &CompressionKind,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if data.len() < threshold_bytes {
        Ok((data.to_vec(), false))
    } else {
        Ok((compress(data, kind)?, true))
    }
}

fn read_bounded<R: Read>(reader: R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(MAX_DECOMPRESSION_SIZE as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::DecompressionFailure)?;
    if out.len() > MAX_DECOMPRESSION_SIZE {
        return Err(ProtocolError::DecompressionFailure);
    }
    Ok(out)
}
