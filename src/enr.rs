//! Node identities and Ethereum Node Records.
//!
//! A [`NodeId`] is the Keccak-256 of a node's compact public key; identities
//! are compared by XOR log-distance. A [`NodeRecord`] carries a node's
//! addressing information together with the bonding state the engine keeps
//! per peer, and marshals to the signed EIP-778 wire form.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use k256::ecdsa::{SigningKey, VerifyingKey};

use crate::crypto::{
    self, compact_public_key, compressed_public_key, keccak256, public_key_from_compressed,
};
use crate::error::EnrError;
use crate::rlp::{self, DecoderError, Item};

/// A 32-byte node identity: `keccak256(compact(public_key))`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn new(raw: [u8; 32]) -> Self {
        NodeId(raw)
    }

    pub fn raw(&self) -> [u8; 32] {
        self.0
    }

    /// XOR log-distance: `256 − leading_zero_bits(a ⊕ b)`. Zero means the
    /// identities are equal; 256 means they differ in the first bit.
    pub fn log_distance(&self, other: &NodeId) -> u16 {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let xor = a ^ b;
            if xor != 0 {
                return 256 - (i as u16 * 8 + xor.leading_zeros() as u16);
            }
        }
        0
    }
}

impl From<&VerifyingKey> for NodeId {
    fn from(key: &VerifyingKey) -> Self {
        NodeId(keccak256(&compact_public_key(key)))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

/// A node record: the public key and network endpoints of a peer, plus the
/// liveness state the engine tracks for bonding.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub public_key: VerifyingKey,
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    /// EIP-778 sequence number of this record.
    pub seq: u64,
    /// When the engine last pinged this peer.
    pub sent_ping: Option<Instant>,
    /// Hash of the last outbound ping, matched against inbound pongs.
    pub sent_ping_hash: Option<[u8; 32]>,
    pub received_ping: Option<Instant>,
    pub received_pong: Option<Instant>,
}

impl NodeRecord {
    pub fn new(public_key: VerifyingKey, ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        NodeRecord {
            public_key,
            ip,
            udp_port,
            tcp_port,
            seq: 1,
            sent_ping: None,
            sent_ping_hash: None,
            received_ping: None,
            received_pong: None,
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from(&self.public_key)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }

    /// The endpoint the RLPx layer dials for an encrypted session.
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    /// A peer is bonded once a ping has been received from it and a pong for
    /// one of our own pings. Only bonded peers enter the routing table.
    pub fn is_bonded(&self) -> bool {
        self.received_ping.is_some() && self.received_pong.is_some()
    }

    /// Builds the signed record tree `[signature, seq, (k, v)*]` with the
    /// key/value pairs in lexicographic key order.
    pub fn to_signed_item(&self, key: &SigningKey) -> Result<Item, EnrError> {
        let content = vec![
            Item::uint(self.seq),
            Item::Bytes(b"id".to_vec()),
            Item::Bytes(b"v4".to_vec()),
            Item::Bytes(b"ip".to_vec()),
            Item::Bytes(ip_octets(self.ip)),
            Item::Bytes(b"secp256k1".to_vec()),
            Item::Bytes(compressed_public_key(&self.public_key).to_vec()),
            Item::Bytes(b"tcp".to_vec()),
            Item::uint(u64::from(self.tcp_port)),
            Item::Bytes(b"udp".to_vec()),
            Item::uint(u64::from(self.udp_port)),
        ];
        let digest = keccak256(&Item::List(content.clone()).encode());
        let signature = crypto::sign(key, &digest).map_err(|_| EnrError::SigningFailed)?;

        let mut outer = vec![Item::Bytes(signature[..64].to_vec())];
        outer.extend(content);
        Ok(Item::List(outer))
    }

    /// Marshals the record to its signed RLP encoding.
    pub fn marshal(&self, key: &SigningKey) -> Result<Vec<u8>, EnrError> {
        Ok(self.to_signed_item(key)?.encode())
    }

    pub fn parse(buf: &[u8]) -> Result<NodeRecord, EnrError> {
        Self::from_item(&rlp::decode(buf)?)
    }

    /// Parses a signed record tree, verifying the signature against the
    /// embedded public key. Unknown keys are ignored; `tcp` defaults to zero.
    pub fn from_item(item: &Item) -> Result<NodeRecord, EnrError> {
        let items = item.as_list()?;
        if items.len() < 2 || items.len() % 2 != 0 {
            return Err(EnrError::Decoder(DecoderError::RlpIsTooShort));
        }
        let signature = items[0].as_bytes()?;
        let seq = items[1].as_uint()?;

        let mut ip = None;
        let mut udp_port = None;
        let mut tcp_port = None;
        let mut public_key = None;
        for pair in items[2..].chunks_exact(2) {
            match pair[0].as_bytes()? {
                b"id" => {
                    if pair[1].as_bytes()? != b"v4" {
                        return Err(EnrError::UnsupportedIdentityScheme);
                    }
                }
                b"ip" => ip = Some(ip_from_bytes(pair[1].as_bytes()?)?),
                b"secp256k1" => {
                    let key = public_key_from_compressed(pair[1].as_bytes()?)
                        .map_err(|_| EnrError::InvalidPublicKey)?;
                    public_key = Some(key);
                }
                b"tcp" => tcp_port = Some(pair[1].as_u16()?),
                b"udp" => udp_port = Some(pair[1].as_u16()?),
                _ => {}
            }
        }

        let public_key = public_key.ok_or(EnrError::MissingField("secp256k1"))?;
        let ip = ip.ok_or(EnrError::MissingField("ip"))?;
        let udp_port = udp_port.ok_or(EnrError::MissingField("udp"))?;

        let content = Item::List(items[1..].to_vec());
        let digest = keccak256(&content.encode());
        crypto::verify(&public_key, signature, &digest)
            .map_err(|_| EnrError::InvalidSignature)?;

        let mut record = NodeRecord::new(public_key, ip, udp_port, tcp_port.unwrap_or(0));
        record.seq = seq;
        Ok(record)
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id(), self.udp_addr())
    }
}

/// The wire form of an IP address: its raw octets, 4 or 16 bytes.
pub(crate) fn ip_octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

pub(crate) fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr, DecoderError> {
    match bytes.len() {
        4 => Ok(IpAddr::V4(Ipv4Addr::new(
            bytes[0], bytes[1], bytes[2], bytes[3],
        ))),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Ok(IpAddr::V6(octets.into()))
        }
        _ => Err(DecoderError::Custom("invalid ip address length")),
    }
}
