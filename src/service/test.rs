#![cfg(test)]
use super::*;
use crate::{Discv4, Discv4Config, Discv4ConfigBuilder};

use std::net::IpAddr;
use std::time::Duration;

use tokio::time::{sleep, timeout};

fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

const LOCALHOST: &str = "127.0.0.1";

/// Builds and starts a full engine on an ephemeral localhost port.
async fn build_node() -> Discv4 {
    let config = Discv4ConfigBuilder::new()
        .maintenance_interval(Duration::from_millis(100))
        .build();
    build_node_with(config).await
}

async fn build_node_with(config: Discv4Config) -> Discv4 {
    let key = SigningKey::random(&mut rand::thread_rng());
    let socket = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let ip: IpAddr = LOCALHOST.parse().unwrap();
    let record = NodeRecord::new(VerifyingKey::from(&key), ip, port, port);

    let mut node = Discv4::new(record, key, config).unwrap();
    node.start(socket).unwrap();
    node
}

/// Polls a condition until it holds or the test deadline passes.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(25)).await;
    }
}

fn contains_id(records: &[NodeRecord], id: NodeId) -> bool {
    records.iter().any(|record| record.id() == id)
}

/// A bare socket speaking the wire protocol directly, for driving an engine
/// from outside and observing its exact responses.
struct TestPeer {
    socket: UdpSocket,
    key: SigningKey,
}

impl TestPeer {
    async fn bind() -> Self {
        TestPeer {
            socket: UdpSocket::bind((LOCALHOST, 0)).await.unwrap(),
            key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    fn record(&self) -> NodeRecord {
        let addr = self.socket.local_addr().unwrap();
        NodeRecord::new(
            VerifyingKey::from(&self.key),
            addr.ip(),
            addr.port(),
            addr.port(),
        )
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::from(&self.record())
    }

    /// Frames and sends a message, returning the raw datagram for replay
    /// and hashing.
    async fn send(&self, message: &Message, to: SocketAddr) -> Vec<u8> {
        let (datagram, _) = Packet::encode(&self.key, message.kind(), &message.encode()).unwrap();
        self.socket.send_to(&datagram, to).await.unwrap();
        datagram
    }

    /// Receives datagrams until one of the wanted kind arrives. Anything
    /// else (maintenance probes, pongs we don't care about) is skipped.
    async fn recv_kind(&self, kind: PacketKind) -> (Packet, Message) {
        timeout(Duration::from_secs(5), async {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            loop {
                let (length, _) = self.socket.recv_from(&mut buf).await.unwrap();
                let packet = Packet::decode(&buf[..length]).unwrap();
                if packet.kind == kind {
                    let message = Message::decode(packet.kind, &packet.body).unwrap();
                    return (packet, message);
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
    }

    fn expiration(&self) -> u64 {
        unix_now() + 3600
    }
}

#[tokio::test]
async fn ping_pong_establishes_mutual_bond() {
    init();
    let a = build_node().await;
    let b = build_node().await;
    let (a_id, b_id) = (a.local_record().id(), b.local_record().id());

    a.ping(&b.local_record()).await.unwrap();

    wait_until("mutual table insertion", || {
        contains_id(&a.table_entries(), b_id) && contains_id(&b.table_entries(), a_id)
    })
    .await;

    // the bonded snapshot carries the TCP endpoint for the RLPx layer
    let bonded = a.bonded_peers();
    assert!(contains_id(&bonded, b_id));
    let peer = bonded.iter().find(|p| p.id() == b_id).unwrap();
    assert_eq!(peer.tcp_addr(), b.local_record().tcp_addr());
}

#[tokio::test]
async fn pong_must_match_the_outstanding_ping_hash() {
    init();
    let a = build_node().await;
    let a_addr = a.local_record().udp_addr();
    let peer = TestPeer::bind().await;

    a.ping(&peer.record()).await.unwrap();
    let (a_ping, _) = peer.recv_kind(PacketKind::Ping).await;

    // answer with a bogus hash, and ping so the inbound half of the bond
    // is in place
    peer.send(
        &Message::Pong {
            to: Endpoint::from(&a.local_record()),
            ping_hash: [0xff; 32],
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;
    peer.send(
        &Message::Ping {
            version: PROTOCOL_VERSION,
            from: peer.endpoint(),
            to: Endpoint::from(&a.local_record()),
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;

    // once our ping is answered, the serve loop has processed the bad pong
    peer.recv_kind(PacketKind::Pong).await;
    assert!(a.table_entries().is_empty());

    // the genuine hash completes the bond
    peer.send(
        &Message::Pong {
            to: Endpoint::from(&a.local_record()),
            ping_hash: a_ping.hash,
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;
    wait_until("bond after valid pong", || {
        contains_id(&a.table_entries(), peer.record().id())
    })
    .await;
}

#[tokio::test]
async fn pong_outside_the_correlation_window_is_rejected() {
    init();
    let config = Discv4ConfigBuilder::new()
        .maintenance_interval(Duration::from_millis(100))
        .pong_timeout(Duration::from_millis(50))
        .build();
    let a = build_node_with(config).await;
    let a_addr = a.local_record().udp_addr();
    let peer = TestPeer::bind().await;

    a.ping(&peer.record()).await.unwrap();
    let (a_ping, _) = peer.recv_kind(PacketKind::Ping).await;

    // put the inbound half of the bond in place, so that accepting the late
    // pong would be observable as a table insertion
    peer.send(
        &Message::Ping {
            version: PROTOCOL_VERSION,
            from: peer.endpoint(),
            to: Endpoint::from(&a.local_record()),
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;
    peer.recv_kind(PacketKind::Pong).await;

    // let the correlation window lapse, then answer with the genuine hash
    sleep(Duration::from_millis(200)).await;
    peer.send(
        &Message::Pong {
            to: Endpoint::from(&a.local_record()),
            ping_hash: a_ping.hash,
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;

    // a request/response exchange proves the serve loop, which is
    // sequential, has processed the late pong
    peer.send(
        &Message::EnrRequest {
            expiration: peer.expiration(),
        },
        a_addr,
    )
    .await;
    peer.recv_kind(PacketKind::EnrResponse).await;

    assert!(a.table_entries().is_empty());
    assert!(a.bonded_peers().is_empty());
}

#[tokio::test]
async fn ping_with_mismatched_endpoint_is_rejected() {
    init();
    let a = build_node().await;
    let a_addr = a.local_record().udp_addr();
    let peer = TestPeer::bind().await;

    // self-reported port that disagrees with the wire source
    let mut from = peer.endpoint();
    from.udp_port = from.udp_port.wrapping_add(1);
    peer.send(
        &Message::Ping {
            version: PROTOCOL_VERSION,
            from,
            to: Endpoint::from(&a.local_record()),
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;

    sleep(Duration::from_millis(200)).await;
    assert_eq!(a.peer_count(), 0);
}

#[tokio::test]
async fn replayed_ping_does_not_duplicate_table_entries() {
    init();
    let a = build_node().await;
    let a_addr = a.local_record().udp_addr();
    let peer = TestPeer::bind().await;

    let ping = Message::Ping {
        version: PROTOCOL_VERSION,
        from: peer.endpoint(),
        to: Endpoint::from(&a.local_record()),
        expiration: peer.expiration(),
        enr_seq: Some(1),
    };
    let datagram = peer.send(&ping, a_addr).await;

    // complete the bond by answering the engine's own ping
    let (a_ping, _) = peer.recv_kind(PacketKind::Ping).await;
    peer.send(
        &Message::Pong {
            to: Endpoint::from(&a.local_record()),
            ping_hash: a_ping.hash,
            expiration: peer.expiration(),
            enr_seq: None,
        },
        a_addr,
    )
    .await;
    wait_until("initial bond", || a.table_entries().len() == 1).await;

    // replay the captured ping verbatim: it is accepted again, state
    // updates are idempotent and the table gains nothing
    peer.socket.send_to(&datagram, a_addr).await.unwrap();
    peer.recv_kind(PacketKind::Pong).await;
    sleep(Duration::from_millis(100)).await;

    let entries = a.table_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id(), peer.record().id());
}

#[tokio::test]
async fn expired_enr_request_gets_no_reply() {
    init();
    let a = build_node().await;
    let a_addr = a.local_record().udp_addr();
    let peer = TestPeer::bind().await;

    peer.send(
        &Message::EnrRequest {
            expiration: unix_now() - 1,
        },
        a_addr,
    )
    .await;
    let reply = timeout(
        Duration::from_millis(300),
        peer.recv_kind(PacketKind::EnrResponse),
    )
    .await;
    assert!(reply.is_err(), "expired request must not be answered");
}

#[tokio::test]
async fn enr_request_is_answered_with_the_signed_record() {
    init();
    let a = build_node().await;
    let a_addr = a.local_record().udp_addr();
    let peer = TestPeer::bind().await;

    let datagram = peer
        .send(
            &Message::EnrRequest {
                expiration: peer.expiration(),
            },
            a_addr,
        )
        .await;

    let (_, message) = peer.recv_kind(PacketKind::EnrResponse).await;
    let Message::EnrResponse {
        request_hash,
        record,
    } = message
    else {
        panic!("expected an enr response");
    };
    assert_eq!(request_hash, keccak256(&datagram));

    let record = NodeRecord::from_item(&record).unwrap();
    let local = a.local_record();
    assert_eq!(record.public_key, local.public_key);
    assert_eq!(record.udp_addr(), local.udp_addr());
    assert_eq!(record.tcp_addr(), local.tcp_addr());
    assert_eq!(record.seq, local.seq);
}

#[tokio::test]
async fn find_node_returns_bonded_neighbors() {
    init();
    let a = build_node().await;
    let b = build_node().await;
    let b_id = b.local_record().id();

    a.ping(&b.local_record()).await.unwrap();
    wait_until("bond with b", || contains_id(&a.table_entries(), b_id)).await;

    let peer = TestPeer::bind().await;
    peer.send(
        &Message::FindNode {
            target: compact_public_key(peer.key.verifying_key()),
            expiration: peer.expiration(),
        },
        a.local_record().udp_addr(),
    )
    .await;

    let (_, message) = peer.recv_kind(PacketKind::Neighbors).await;
    let Message::Neighbors { nodes, .. } = message else {
        panic!("expected a neighbors response");
    };
    let b_record = b.local_record();
    assert!(nodes.iter().any(|n| {
        n.public_key == b_record.public_key
            && n.ip == b_record.ip
            && n.udp_port == b_record.udp_port
            && n.tcp_port == b_record.tcp_port
    }));
}

#[tokio::test]
async fn find_node_seeds_the_table_through_neighbors() {
    init();
    let a = build_node().await;
    let b = build_node().await;
    let c = build_node().await;
    let (a_id, b_id, c_id) = (
        a.local_record().id(),
        b.local_record().id(),
        c.local_record().id(),
    );

    a.ping(&b.local_record()).await.unwrap();
    b.ping(&c.local_record()).await.unwrap();
    wait_until("initial bonds", || {
        contains_id(&a.table_entries(), b_id) && contains_id(&b.table_entries(), c_id)
    })
    .await;

    // b's neighbors reply advertises c (and ourselves, which is skipped);
    // the resulting ping/pong loop pulls c into a's table
    a.find_node(&b.local_record()).await.unwrap();
    wait_until("c discovered through b", || {
        contains_id(&a.table_entries(), c_id)
    })
    .await;
    assert!(!contains_id(&a.table_entries(), a_id));
}
