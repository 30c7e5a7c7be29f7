//! Recursive-Length Prefix serialization.
//!
//! RLP is the binary encoding used by every discovery packet payload and node
//! record. Values form a tree: an [`Item`] is either a byte string or a list
//! of items. The encoding is self-delimiting, so a decoder can consume
//! exactly one item from a buffer and know where it ends.

use std::fmt;

/// Errors that may occur while decoding RLP data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer ended before the declared item did.
    RlpIsTooShort,
    /// A length prefix does not describe a representable length.
    RlpInvalidLength,
    /// A byte string was found where a list was required.
    RlpExpectedToBeList,
    /// A list was found where a byte string was required.
    RlpExpectedToBeData,
    /// Decoded items do not exactly tile the enclosing payload.
    RlpInconsistentLengthAndData,
    /// Anything the other variants cannot express.
    Custom(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self, f)
    }
}

/// A single node in an RLP tree: a byte string, or a list of further items.
///
/// The two variants are mutually exclusive by construction; empty bytes and
/// the empty list are distinct values with distinct encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    /// Builds a byte-string item from an unsigned integer, encoded as the
    /// minimal big-endian byte string. Zero encodes as the empty string.
    pub fn uint(value: u64) -> Item {
        let be = value.to_be_bytes();
        let start = be.iter().position(|b| *b != 0).unwrap_or(be.len());
        Item::Bytes(be[start..].to_vec())
    }

    /// The payload of a byte-string item.
    pub fn as_bytes(&self) -> Result<&[u8], DecoderError> {
        match self {
            Item::Bytes(data) => Ok(data),
            Item::List(_) => Err(DecoderError::RlpExpectedToBeData),
        }
    }

    /// The children of a list item.
    pub fn as_list(&self) -> Result<&[Item], DecoderError> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(DecoderError::RlpExpectedToBeList),
        }
    }

    /// The `index`-th child of a list item.
    pub fn at(&self, index: usize) -> Result<&Item, DecoderError> {
        self.as_list()?.get(index).ok_or(DecoderError::RlpIsTooShort)
    }

    /// Reads a byte-string item as a big-endian unsigned integer. Leading
    /// zero bytes are tolerated; the empty string reads as zero.
    pub fn as_uint(&self) -> Result<u64, DecoderError> {
        let data = self.as_bytes()?;
        let data = match data.iter().position(|b| *b != 0) {
            Some(start) => &data[start..],
            None => &[],
        };
        if data.len() > 8 {
            return Err(DecoderError::RlpInvalidLength);
        }
        Ok(data.iter().fold(0u64, |acc, b| acc << 8 | u64::from(*b)))
    }

    pub fn as_u16(&self) -> Result<u16, DecoderError> {
        u16::try_from(self.as_uint()?).map_err(|_| DecoderError::RlpInvalidLength)
    }

    /// Reads a byte-string item as a 32-byte hash.
    pub fn as_hash32(&self) -> Result<[u8; 32], DecoderError> {
        let data = self.as_bytes()?;
        data.try_into()
            .map_err(|_| DecoderError::Custom("expected a 32 byte hash"))
    }

    /// Serializes the item tree.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Item::Bytes(data) => match data.len() {
                1 if data[0] <= 0x7f => data.clone(),
                n if n <= 55 => {
                    let mut out = Vec::with_capacity(1 + n);
                    out.push(0x80 + n as u8);
                    out.extend_from_slice(data);
                    out
                }
                n => {
                    let mut out = encode_length(0xb7, n);
                    out.extend_from_slice(data);
                    out
                }
            },
            Item::List(items) => {
                let mut payload = Vec::new();
                for item in items {
                    payload.extend_from_slice(&item.encode());
                }
                let mut out = if payload.len() <= 55 {
                    vec![0xc0 + payload.len() as u8]
                } else {
                    encode_length(0xf7, payload.len())
                };
                out.extend_from_slice(&payload);
                out
            }
        }
    }
}

// Length prefix for payloads longer than 55 bytes: the tag byte carries the
// size of the length field, followed by the length in minimal big-endian.
fn encode_length(tag: u8, len: usize) -> Vec<u8> {
    let be = (len as u64).to_be_bytes();
    let start = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    let mut out = Vec::with_capacity(1 + be.len() - start);
    out.push(tag + (be.len() - start) as u8);
    out.extend_from_slice(&be[start..]);
    out
}

/// Deserializes a buffer holding exactly one RLP item.
pub fn decode(buf: &[u8]) -> Result<Item, DecoderError> {
    let (item, consumed) = decode_item(buf)?;
    if consumed != buf.len() {
        return Err(DecoderError::RlpInconsistentLengthAndData);
    }
    Ok(item)
}

// Decodes one item from the front of `buf`, returning it along with the
// number of bytes consumed. The first byte selects one of five framing
// regions; see the protocol documentation for the exact boundaries.
fn decode_item(buf: &[u8]) -> Result<(Item, usize), DecoderError> {
    let first = *buf.first().ok_or(DecoderError::RlpIsTooShort)?;
    match first {
        // single byte literal
        0x00..=0x7f => Ok((Item::Bytes(vec![first]), 1)),
        // string of 0..=55 bytes
        0x80..=0xb7 => {
            let end = 1 + (first - 0x80) as usize;
            if buf.len() < end {
                return Err(DecoderError::RlpIsTooShort);
            }
            Ok((Item::Bytes(buf[1..end].to_vec()), end))
        }
        // string longer than 55 bytes
        0xb8..=0xbf => {
            let (header, len) = decode_length(buf, 0xb7)?;
            let end = header
                .checked_add(len)
                .ok_or(DecoderError::RlpInvalidLength)?;
            if buf.len() < end {
                return Err(DecoderError::RlpIsTooShort);
            }
            Ok((Item::Bytes(buf[header..end].to_vec()), end))
        }
        // list with a payload of 0..=55 bytes
        0xc0..=0xf7 => {
            let end = 1 + (first - 0xc0) as usize;
            if buf.len() < end {
                return Err(DecoderError::RlpIsTooShort);
            }
            Ok((Item::List(decode_children(&buf[1..end])?), end))
        }
        // list with a payload longer than 55 bytes
        0xf8..=0xff => {
            let (header, len) = decode_length(buf, 0xf7)?;
            let end = header
                .checked_add(len)
                .ok_or(DecoderError::RlpInvalidLength)?;
            if buf.len() < end {
                return Err(DecoderError::RlpIsTooShort);
            }
            Ok((Item::List(decode_children(&buf[header..end])?), end))
        }
    }
}

// Children must exactly tile the list payload: each child consumes precisely
// its own framing, and the loop ends only when the payload is exhausted.
fn decode_children(mut payload: &[u8]) -> Result<Vec<Item>, DecoderError> {
    let mut children = Vec::new();
    while !payload.is_empty() {
        let (child, consumed) = decode_item(payload)?;
        children.push(child);
        payload = &payload[consumed..];
    }
    Ok(children)
}

fn decode_length(buf: &[u8], tag: u8) -> Result<(usize, usize), DecoderError> {
    let len_of_len = (buf[0] - tag) as usize;
    if buf.len() < 1 + len_of_len {
        return Err(DecoderError::RlpIsTooShort);
    }
    let len = buf[1..1 + len_of_len]
        .iter()
        .fold(0u64, |acc, b| acc << 8 | u64::from(*b));
    let len = usize::try_from(len).map_err(|_| DecoderError::RlpInvalidLength)?;
    Ok((1 + len_of_len, len))
}
