//! HPACK primitive representations (RFC 7541 Section 5)
//!
//! Prefixed integers and length-prefixed string literals. Decoders take a
//! `&mut &[u8]` cursor and advance it past what they consume.

use bytes::{BufMut, BytesMut};

use super::huffman;
use crate::http::h2::error::{Error, Result};

/// Largest integer accepted while decoding; keeps the shift arithmetic in range
const MAX_INTEGER: usize = u32::MAX as usize;

/// Encode `value` with an N-bit prefix; `flags` fill the bits above the prefix
pub fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, flags: u8) {
    let prefix_max = (1usize << prefix_bits) - 1;

    if value < prefix_max {
        dst.put_u8(flags | value as u8);
        return;
    }

    dst.put_u8(flags | prefix_max as u8);
    let mut remaining = value - prefix_max;
    while remaining >= 128 {
        dst.put_u8((remaining % 128) as u8 | 0x80);
        remaining /= 128;
    }
    dst.put_u8(remaining as u8);
}

/// Decode an N-bit prefixed integer, ignoring the bits above the prefix
pub fn decode_integer(src: &mut &[u8], prefix_bits: u8) -> Result<usize> {
    let (&first, rest) = src
        .split_first()
        .ok_or_else(|| Error::compression("truncated integer"))?;
    *src = rest;

    let prefix_max = (1usize << prefix_bits) - 1;
    let mut value = first as usize & prefix_max;
    if value < prefix_max {
        return Ok(value);
    }

    let mut shift = 0u32;
    loop {
        let (&byte, rest) = src
            .split_first()
            .ok_or_else(|| Error::compression("truncated integer"))?;
        *src = rest;

        if shift > 28 {
            return Err(Error::compression("integer overflow"));
        }
        value += ((byte & 0x7f) as usize) << shift;
        if value > MAX_INTEGER {
            return Err(Error::compression("integer overflow"));
        }
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// Encode a string literal
///
/// With `huffman` set the value must be printable ASCII; it is Huffman-coded
/// unless that would not make it shorter.
pub fn encode_string(dst: &mut BytesMut, value: &str, huffman: bool) -> Result<()> {
    let bytes = value.as_bytes();
    if huffman {
        huffman::ensure_encodable(bytes)?;
        let encoded_len = huffman::encoded_len(bytes);
        if encoded_len < bytes.len() {
            encode_integer(dst, encoded_len, 7, 0x80);
            return huffman::encode(bytes, dst);
        }
    }

    encode_integer(dst, bytes.len(), 7, 0x00);
    dst.put_slice(bytes);
    Ok(())
}

/// Decode a string literal; the high bit of the first octet flags Huffman
pub fn decode_string(src: &mut &[u8]) -> Result<String> {
    let huffman = src
        .first()
        .map(|b| b & 0x80 != 0)
        .ok_or_else(|| Error::compression("truncated string literal"))?;
    let length = decode_integer(src, 7)?;

    if src.len() < length {
        return Err(Error::compression(format!(
            "string literal of {} octets exceeds remaining {}",
            length,
            src.len()
        )));
    }
    let (data, rest) = src.split_at(length);
    *src = rest;

    let bytes = if huffman {
        huffman::decode(data)?
    } else {
        data.to_vec()
    };

    String::from_utf8(bytes).map_err(|_| Error::compression("header string is not valid UTF-8"))
}
