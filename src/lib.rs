#![deny(rustdoc::broken_intra_doc_links)]
//! An implementation of the [Node Discovery v4](https://github.com/ethereum/devp2p/blob/master/discv4.md) protocol.
//!
//! # Overview
//!
//! Discovery v4 finds and maintains a live set of peers on a public
//! peer-to-peer network. Nodes probe each other's liveness with signed
//! Ping/Pong datagrams over UDP and exchange neighbor lists with
//! FindNode/Neighbors; a node's identity is a secp256k1 key, and every
//! packet carries a recoverable signature binding its contents to the
//! sender. Peers that complete a ping/pong exchange in both directions are
//! *bonded* and enter a Kademlia-style routing table ordered by XOR distance
//! from the local identity.
//!
//! The protocol is split into layers:
//!
//! - [`rlp`]: the Recursive-Length Prefix codec every payload and node
//!   record is serialized with.
//! - [`enr`]: node identities and signed node records
//!   ([EIP-778](https://eips.ethereum.org/EIPS/eip-778)) binding a public
//!   key to its network endpoints.
//! - [`kbucket`]: the routing table of discovered peers.
//! - [`packet`] and [`rpc`]: datagram framing and the six message payloads.
//! - [`service`]: the protocol engine. The [`service::Service`] runs the
//!   UDP serve loop and a maintenance task that probes for new peers while
//!   the table is under-populated.
//! - [`Discv4`]: the application level. Starts and stops the underlying
//!   tasks, issues probes and exposes the discovered peers.
//!
//! The discovery channel is public by design: there is no session
//! encryption at this layer. The engine exposes bonded peers and their TCP
//! endpoints for a surrounding RLPx stack to dial.
//!
//! # Runtimes
//!
//! The server requires a tokio runtime with timing and io enabled:
//! [`Discv4::start`] spawns the serve loop and the maintenance task on the
//! runtime it is called from.
//!
//! # Usage
//!
//! ```rust,no_run
//! use discv4::{Discv4, Discv4ConfigBuilder, NodeRecord};
//! use k256::ecdsa::{SigningKey, VerifyingKey};
//! use tokio::net::UdpSocket;
//!
//! #[tokio::main]
//! async fn main() {
//!     let key = SigningKey::random(&mut rand::thread_rng());
//!     let record = NodeRecord::new(
//!         VerifyingKey::from(&key),
//!         "203.0.113.7".parse().unwrap(),
//!         30303,
//!         30303,
//!     );
//!
//!     let socket = UdpSocket::bind("0.0.0.0:30303").await.unwrap();
//!     let config = Discv4ConfigBuilder::new().build();
//!     let mut discv4 = Discv4::new(record, key, config).unwrap();
//!     discv4.start(socket).unwrap();
//!
//!     // bond with a boot node to seed the table
//!     // discv4.ping(&boot_node_record).await.unwrap();
//! }
//! ```

mod config;
mod discv4;
mod error;
pub mod crypto;
pub mod enr;
pub mod kbucket;
pub mod metrics;
pub mod packet;
pub mod rlp;
pub mod rpc;
pub mod service;

#[macro_use]
extern crate lazy_static;

pub use crate::discv4::Discv4;
pub use config::{Discv4Config, Discv4ConfigBuilder};
pub use enr::{NodeId, NodeRecord};
pub use error::{CryptoError, DiscoveryError, EnrError, PacketError};
pub use packet::{Packet, PacketKind, MAX_PACKET_SIZE};
pub use rlp::{DecoderError, Item};
pub use rpc::{Endpoint, Message, Neighbor};
