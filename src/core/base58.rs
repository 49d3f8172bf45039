//! # Base58 Integer Codec
//!
//! Base58 as used on the wire: the input is an unsigned big-endian integer, not a
//! byte string. Leading zero bytes therefore carry no digits, and the integer zero
//! encodes as the single character `"1"`.
//!
//! Timestamps, message ids, protocol fingerprints and node ids all use this form.

use crate::error::{constants, ProtocolError, Result};

/// The base58 alphabet (no `0`, `O`, `I` or `l`).
pub const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Reverse lookup from ASCII byte to digit value, 0xFF for bytes outside the alphabet.
const DIGIT_VALUES: [u8; 128] = build_digit_values();

const fn build_digit_values() -> [u8; 128] {
    let mut table = [0xFFu8; 128];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Encode a big-endian unsigned integer as base58.
pub fn encode(value: &[u8]) -> String {
    // little-endian base58 digits
    let mut digits: Vec<u8> = Vec::with_capacity(value.len() * 138 / 100 + 1);

    for &byte in value {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    if digits.is_empty() {
        return (ALPHABET[0] as char).to_string();
    }

    digits
        .iter()
        .rev()
        .map(|&d| ALPHABET[d as usize] as char)
        .collect()
}

/// Decode base58 text into the minimal big-endian representation of its integer.
///
/// Zero decodes to an empty vector.
///
/// # Errors
/// Returns `ProtocolError::InvalidBase58` on the first character outside the alphabet.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    // little-endian bytes
    let mut bytes: Vec<u8> = Vec::with_capacity(text.len() * 733 / 1000 + 1);

    for c in text.chars() {
        let value = digit_value(c)?;
        let mut carry = value as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xFF) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xFF) as u8);
            carry >>= 8;
        }
    }

    bytes.reverse();
    Ok(bytes)
}

/// Encode a `u64` (used for timestamps).
pub fn encode_u64(value: u64) -> String {
    encode(&value.to_be_bytes())
}

/// Decode base58 text into a `u64`.
///
/// # Errors
/// Returns `ProtocolError::InvalidBase58` for characters outside the alphabet and
/// `ProtocolError::Framing` when the value does not fit in 64 bits.
pub fn decode_u64(text: &str) -> Result<u64> {
    let mut value: u64 = 0;
    for c in text.chars() {
        let digit = digit_value(c)?;
        value = value
            .checked_mul(58)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| ProtocolError::Framing(constants::ERR_BASE58_OVERFLOW.into()))?;
    }
    Ok(value)
}

#[inline]
fn digit_value(c: char) -> Result<u8> {
    let code = c as u32;
    if code >= 128 {
        return Err(ProtocolError::InvalidBase58(c));
    }
    match DIGIT_VALUES[code as usize] {
        0xFF => Err(ProtocolError::InvalidBase58(c)),
        value => Ok(value),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        &bytes[first..]
    }

    #[test]
    fn test_zero_encodes_as_one() {
        assert_eq!(encode(&[]), "1");
        assert_eq!(encode(&[0]), "1");
        assert_eq!(encode(&[0, 0, 0]), "1");
        assert_eq!(encode_u64(0), "1");
    }

    #[test]
    fn test_small_values() {
        assert_eq!(encode_u64(1), "2");
        assert_eq!(encode_u64(57), "z");
        assert_eq!(encode_u64(58), "21");
        assert_eq!(decode_u64("21").unwrap(), 58);
    }

    #[test]
    fn test_roundtrip_zero_and_one() {
        assert!(decode(&encode(&[0])).unwrap().is_empty());
        assert_eq!(decode(&encode(&[1])).unwrap(), vec![1]);
        assert_eq!(decode_u64(&encode_u64(0)).unwrap(), 0);
        assert_eq!(decode_u64(&encode_u64(1)).unwrap(), 1);
    }

    #[test]
    fn test_roundtrip_beyond_u64() {
        // 2^64 + 12345 and a 384-bit value
        let mut big = vec![0x01];
        big.extend_from_slice(&12345u64.to_be_bytes());
        assert_eq!(decode(&encode(&big)).unwrap(), big);

        let wide: Vec<u8> = (1..=48).collect();
        assert_eq!(decode(&encode(&wide)).unwrap(), wide);
    }

    #[test]
    fn test_leading_zero_bytes_are_ignored() {
        let padded = [0, 0, 0x12, 0x34];
        assert_eq!(encode(&padded), encode(&[0x12, 0x34]));
        assert_eq!(
            decode(&encode(&padded)).unwrap(),
            strip_leading_zeros(&padded)
        );
    }

    #[test]
    fn test_timestamp_encoding() {
        let ts = 1_700_000_000u64;
        let text = encode_u64(ts);
        assert_eq!(decode_u64(&text).unwrap(), ts);
        assert_eq!(encode(&ts.to_be_bytes()), text);
    }

    #[test]
    fn test_invalid_characters() {
        for bad in ["0", "O", "I", "l", "ab+", "é"] {
            assert!(
                matches!(decode(bad), Err(ProtocolError::InvalidBase58(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_u64_overflow() {
        let too_big = encode(&[1, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            decode_u64(&too_big),
            Err(ProtocolError::Framing(_))
        ));
        assert_eq!(decode_u64(&encode_u64(u64::MAX)).unwrap(), u64::MAX);
    }
}
