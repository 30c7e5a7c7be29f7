//! Discovery v4 packet framing.
//!
//! Every datagram is laid out as `hash(32) ‖ signature(65) ‖ kind(1) ‖
//! payload`, where the hash covers everything after itself and the
//! recoverable signature covers `kind ‖ payload`. Verifying the frame yields
//! the sender's public key, which binds the packet contents to an identity
//! before any payload is decoded.

use std::fmt;

use k256::ecdsa::{SigningKey, VerifyingKey};

use crate::crypto::{self, keccak256, SIGNATURE_LENGTH};
use crate::error::PacketError;

/// Largest datagram the protocol sends or accepts.
pub const MAX_PACKET_SIZE: usize = 1280;

pub const HASH_LENGTH: usize = 32;
/// Total frame overhead before the payload: hash, signature, kind byte.
pub const HEADER_LENGTH: usize = HASH_LENGTH + SIGNATURE_LENGTH + 1;

/// The message type carried in a packet's kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ping,
    Pong,
    FindNode,
    Neighbors,
    EnrRequest,
    EnrResponse,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<PacketKind> {
        match byte {
            0x01 => Some(PacketKind::Ping),
            0x02 => Some(PacketKind::Pong),
            0x03 => Some(PacketKind::FindNode),
            0x04 => Some(PacketKind::Neighbors),
            0x05 => Some(PacketKind::EnrRequest),
            0x06 => Some(PacketKind::EnrResponse),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            PacketKind::Ping => 0x01,
            PacketKind::Pong => 0x02,
            PacketKind::FindNode => 0x03,
            PacketKind::Neighbors => 0x04,
            PacketKind::EnrRequest => 0x05,
            PacketKind::EnrResponse => 0x06,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self, f)
    }
}

/// A verified inbound packet: the frame hash (used by pong correlation and
/// ENR responses), the recovered sender key, and the undecoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub hash: [u8; 32],
    pub remote_key: VerifyingKey,
    pub kind: PacketKind,
    pub body: Vec<u8>,
}

impl Packet {
    /// Assembles a frame for transmission:
    ///
    /// 1. sign `keccak256(kind ‖ payload)`
    /// 2. hash `signature ‖ kind ‖ payload`
    /// 3. emit `hash ‖ signature ‖ kind ‖ payload`
    ///
    /// Returns the encoded datagram and its hash, which callers record to
    /// correlate the matching response.
    pub fn encode(
        key: &SigningKey,
        kind: PacketKind,
        payload: &[u8],
    ) -> Result<(Vec<u8>, [u8; 32]), PacketError> {
        let mut to_sign = Vec::with_capacity(1 + payload.len());
        to_sign.push(kind.byte());
        to_sign.extend_from_slice(payload);
        let signature = crypto::sign(key, &keccak256(&to_sign))?;

        let mut hashed = Vec::with_capacity(SIGNATURE_LENGTH + to_sign.len());
        hashed.extend_from_slice(&signature);
        hashed.extend_from_slice(&to_sign);
        let hash = keccak256(&hashed);

        let mut packet = Vec::with_capacity(HASH_LENGTH + hashed.len());
        packet.extend_from_slice(&hash);
        packet.extend_from_slice(&hashed);
        Ok((packet, hash))
    }

    /// Verifies an inbound datagram's frame and recovers the sender key.
    /// Nothing about the payload is interpreted here beyond the kind byte.
    pub fn decode(data: &[u8]) -> Result<Packet, PacketError> {
        if data.len() <= HEADER_LENGTH {
            return Err(PacketError::TooSmall);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&data[..HASH_LENGTH]);
        if hash != keccak256(&data[HASH_LENGTH..]) {
            return Err(PacketError::HashMismatch);
        }

        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature.copy_from_slice(&data[HASH_LENGTH..HASH_LENGTH + SIGNATURE_LENGTH]);
        let signed = keccak256(&data[HASH_LENGTH + SIGNATURE_LENGTH..]);
        let remote_key = crypto::recover(&signature, &signed)?;

        let kind_byte = data[HASH_LENGTH + SIGNATURE_LENGTH];
        let kind = PacketKind::from_byte(kind_byte).ok_or(PacketError::UnknownKind(kind_byte))?;

        Ok(Packet {
            hash,
            remote_key,
            kind,
            body: data[HEADER_LENGTH..].to_vec(),
        })
    }
}
