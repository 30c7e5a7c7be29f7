//! Discovery message payloads.
//!
//! Each packet kind carries one RLP list. [`Message`] models the six payload
//! layouts and converts between them and [`Item`] trees; the framing around
//! them (hash, signature, kind byte) lives in [`crate::packet`].

use std::net::IpAddr;

use k256::ecdsa::VerifyingKey;

use crate::crypto::{compact_public_key, public_key_from_compact};
use crate::enr::{ip_from_bytes, ip_octets, NodeRecord};
use crate::packet::PacketKind;
use crate::rlp::{self, DecoderError, Item};

/// The protocol version carried in every ping.
pub const PROTOCOL_VERSION: u64 = 4;

/// Cap on node tuples per neighbors packet. Sixteen full IPv6 entries would
/// overflow the 1280-byte MTU, so responses are split at this boundary.
pub const MAX_NEIGHBORS_PER_PACKET: usize = 12;

/// A UDP/TCP endpoint as it appears on the wire: `[ip, udp-port, tcp-port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Endpoint {
            ip,
            udp_port,
            tcp_port,
        }
    }

    fn to_item(&self) -> Item {
        Item::List(vec![
            Item::Bytes(ip_octets(self.ip)),
            Item::uint(u64::from(self.udp_port)),
            Item::uint(u64::from(self.tcp_port)),
        ])
    }

    fn from_item(item: &Item) -> Result<Endpoint, DecoderError> {
        Ok(Endpoint {
            ip: ip_from_bytes(item.at(0)?.as_bytes()?)?,
            udp_port: item.at(1)?.as_u16()?,
            tcp_port: item.at(2)?.as_u16()?,
        })
    }
}

impl From<&NodeRecord> for Endpoint {
    fn from(record: &NodeRecord) -> Self {
        Endpoint::new(record.ip, record.udp_port, record.tcp_port)
    }
}

/// One node tuple in a neighbors payload: `[ip, udp-port, tcp-port, id]`
/// where `id` is the 64-byte compact public key.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub public_key: VerifyingKey,
}

impl Neighbor {
    fn to_item(&self) -> Item {
        Item::List(vec![
            Item::Bytes(ip_octets(self.ip)),
            Item::uint(u64::from(self.udp_port)),
            Item::uint(u64::from(self.tcp_port)),
            Item::Bytes(compact_public_key(&self.public_key).to_vec()),
        ])
    }

    fn from_item(item: &Item) -> Result<Neighbor, DecoderError> {
        let public_key = public_key_from_compact(item.at(3)?.as_bytes()?)
            .map_err(|_| DecoderError::Custom("invalid secp256k1 public key"))?;
        Ok(Neighbor {
            ip: ip_from_bytes(item.at(0)?.as_bytes()?)?,
            udp_port: item.at(1)?.as_u16()?,
            tcp_port: item.at(2)?.as_u16()?,
            public_key,
        })
    }
}

impl From<&NodeRecord> for Neighbor {
    fn from(record: &NodeRecord) -> Self {
        Neighbor {
            ip: record.ip,
            udp_port: record.udp_port,
            tcp_port: record.tcp_port,
            public_key: record.public_key.clone(),
        }
    }
}

/// The payload of a discovery packet, one variant per kind. All expirations
/// are absolute unix seconds. `enr_seq` is the optional trailing sequence
/// number later protocol revisions append to pings and pongs; decoders
/// tolerate its absence and ignore anything after it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping {
        version: u64,
        from: Endpoint,
        to: Endpoint,
        expiration: u64,
        enr_seq: Option<u64>,
    },
    Pong {
        to: Endpoint,
        /// Frame hash of the ping being answered.
        ping_hash: [u8; 32],
        expiration: u64,
        enr_seq: Option<u64>,
    },
    FindNode {
        /// Compact public key whose keccak256 is the lookup target.
        target: [u8; 64],
        expiration: u64,
    },
    Neighbors {
        nodes: Vec<Neighbor>,
        expiration: u64,
    },
    EnrRequest {
        expiration: u64,
    },
    EnrResponse {
        /// Hash of the request datagram being answered.
        request_hash: [u8; 32],
        /// The signed node record, kept as its RLP tree.
        record: Item,
    },
}

impl Message {
    pub fn kind(&self) -> PacketKind {
        match self {
            Message::Ping { .. } => PacketKind::Ping,
            Message::Pong { .. } => PacketKind::Pong,
            Message::FindNode { .. } => PacketKind::FindNode,
            Message::Neighbors { .. } => PacketKind::Neighbors,
            Message::EnrRequest { .. } => PacketKind::EnrRequest,
            Message::EnrResponse { .. } => PacketKind::EnrResponse,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_item().encode()
    }

    fn to_item(&self) -> Item {
        match self {
            Message::Ping {
                version,
                from,
                to,
                expiration,
                enr_seq,
            } => {
                let mut items = vec![
                    Item::uint(*version),
                    from.to_item(),
                    to.to_item(),
                    Item::uint(*expiration),
                ];
                if let Some(seq) = enr_seq {
                    items.push(Item::uint(*seq));
                }
                Item::List(items)
            }
            Message::Pong {
                to,
                ping_hash,
                expiration,
                enr_seq,
            } => {
                let mut items = vec![
                    to.to_item(),
                    Item::Bytes(ping_hash.to_vec()),
                    Item::uint(*expiration),
                ];
                if let Some(seq) = enr_seq {
                    items.push(Item::uint(*seq));
                }
                Item::List(items)
            }
            Message::FindNode { target, expiration } => Item::List(vec![
                Item::Bytes(target.to_vec()),
                Item::uint(*expiration),
            ]),
            Message::Neighbors { nodes, expiration } => Item::List(vec![
                Item::List(nodes.iter().map(Neighbor::to_item).collect()),
                Item::uint(*expiration),
            ]),
            Message::EnrRequest { expiration } => Item::List(vec![Item::uint(*expiration)]),
            Message::EnrResponse {
                request_hash,
                record,
            } => Item::List(vec![Item::Bytes(request_hash.to_vec()), record.clone()]),
        }
    }

    pub fn decode(kind: PacketKind, payload: &[u8]) -> Result<Message, DecoderError> {
        let item = rlp::decode(payload)?;
        match kind {
            PacketKind::Ping => Ok(Message::Ping {
                version: item.at(0)?.as_uint()?,
                from: Endpoint::from_item(item.at(1)?)?,
                to: Endpoint::from_item(item.at(2)?)?,
                expiration: item.at(3)?.as_uint()?,
                enr_seq: item.at(4).ok().and_then(|seq| seq.as_uint().ok()),
            }),
            PacketKind::Pong => Ok(Message::Pong {
                to: Endpoint::from_item(item.at(0)?)?,
                ping_hash: item.at(1)?.as_hash32()?,
                expiration: item.at(2)?.as_uint()?,
                enr_seq: item.at(3).ok().and_then(|seq| seq.as_uint().ok()),
            }),
            PacketKind::FindNode => {
                let target = item.at(0)?.as_bytes()?;
                let target = target
                    .try_into()
                    .map_err(|_| DecoderError::Custom("expected a 64 byte target key"))?;
                Ok(Message::FindNode {
                    target,
                    expiration: item.at(1)?.as_uint()?,
                })
            }
            PacketKind::Neighbors => Ok(Message::Neighbors {
                nodes: item
                    .at(0)?
                    .as_list()?
                    .iter()
                    .map(Neighbor::from_item)
                    .collect::<Result<_, _>>()?,
                expiration: item.at(1)?.as_uint()?,
            }),
            PacketKind::EnrRequest => Ok(Message::EnrRequest {
                expiration: item.at(0)?.as_uint()?,
            }),
            PacketKind::EnrResponse => Ok(Message::EnrResponse {
                request_hash: item.at(0)?.as_hash32()?,
                record: item.at(1)?.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn random_public_key() -> VerifyingKey {
        VerifyingKey::from(&SigningKey::random(&mut rand::thread_rng()))
    }

    fn roundtrip(message: Message) {
        let encoded = message.encode();
        let decoded = Message::decode(message.kind(), &encoded).unwrap();
        assert_eq!(message, decoded);
    }

    fn endpoint(ip: &str, udp: u16, tcp: u16) -> Endpoint {
        Endpoint::new(ip.parse().unwrap(), udp, tcp)
    }

    #[test]
    fn ref_encode_ping() {
        let message = Message::Ping {
            version: 4,
            from: endpoint("127.0.0.1", 30303, 30303),
            to: endpoint("10.0.0.1", 30304, 0),
            expiration: 0x43b9_a355,
            enr_seq: Some(1),
        };
        let expected =
            hex::decode("dd04cb847f00000182765f82765fc9840a000001827660808443b9a35501").unwrap();
        assert_eq!(message.encode(), expected);
        roundtrip(message);
    }

    #[test]
    fn ref_encode_find_node() {
        let message = Message::FindNode {
            target: [0x11; 64],
            expiration: 0x43b9_a355,
        };
        let expected =
            hex::decode(format!("f847b840{}8443b9a355", "11".repeat(64))).unwrap();
        assert_eq!(message.encode(), expected);
        roundtrip(message);
    }

    #[test]
    fn ping_without_enr_seq_decodes() {
        let message = Message::Ping {
            version: 4,
            from: endpoint("127.0.0.1", 30303, 30303),
            to: endpoint("10.0.0.1", 30304, 0),
            expiration: 1_700_000_000,
            enr_seq: None,
        };
        roundtrip(message);
    }

    #[test]
    fn pong_roundtrip() {
        roundtrip(Message::Pong {
            to: endpoint("127.0.0.1", 30303, 0),
            ping_hash: [0xab; 32],
            expiration: 1_700_000_000,
            enr_seq: Some(7),
        });
    }

    #[test]
    fn neighbors_roundtrip_mixed_families() {
        roundtrip(Message::Neighbors {
            nodes: vec![
                Neighbor {
                    ip: "10.0.0.7".parse().unwrap(),
                    udp_port: 30303,
                    tcp_port: 30303,
                    public_key: random_public_key(),
                },
                Neighbor {
                    ip: "2001:db8::1".parse().unwrap(),
                    udp_port: 9000,
                    tcp_port: 0,
                    public_key: random_public_key(),
                },
            ],
            expiration: 1_700_000_000,
        });
    }

    #[test]
    fn enr_request_roundtrip() {
        roundtrip(Message::EnrRequest {
            expiration: 1_700_000_000,
        });
    }

    #[test]
    fn enr_response_keeps_record_opaque() {
        let record = Item::List(vec![
            Item::Bytes(vec![0x55; 64]),
            Item::uint(3),
            Item::Bytes(b"id".to_vec()),
            Item::Bytes(b"v4".to_vec()),
        ]);
        roundtrip(Message::EnrResponse {
            request_hash: [0x42; 32],
            record,
        });
    }

    #[test]
    fn neighbors_rejects_bad_public_key() {
        let item = Item::List(vec![
            Item::List(vec![Item::List(vec![
                Item::Bytes(vec![10, 0, 0, 1]),
                Item::uint(30303),
                Item::uint(0),
                Item::Bytes(vec![0x00; 64]),
            ])]),
            Item::uint(1_700_000_000),
        ]);
        assert_eq!(
            Message::decode(PacketKind::Neighbors, &item.encode()),
            Err(DecoderError::Custom("invalid secp256k1 public key"))
        );
    }

    #[test]
    fn find_node_rejects_short_target() {
        let item = Item::List(vec![Item::Bytes(vec![0x11; 63]), Item::uint(0)]);
        assert_eq!(
            Message::decode(PacketKind::FindNode, &item.encode()),
            Err(DecoderError::Custom("expected a 64 byte target key"))
        );
    }
}
