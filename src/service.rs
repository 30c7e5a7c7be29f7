//! The discovery engine.
//!
//! The [`Service`] owns the UDP socket and the private key and runs two
//! long-lived tasks: a serve loop that reads, verifies and dispatches
//! inbound datagrams, and a maintenance task that probes for new peers while
//! the peer count is below target.
//!
//! Peer state lives in a single map guarded by one mutex; the routing table
//! has its own lock. Handlers never hold a guard across a socket operation:
//! outbound frames are encoded and state is recorded under the lock, the
//! datagram goes out after it is released.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use k256::ecdsa::{SigningKey, VerifyingKey};
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::Discv4Config;
use crate::crypto::{compact_public_key, keccak256};
use crate::enr::{NodeId, NodeRecord};
use crate::error::{DiscoveryError, PacketError};
use crate::kbucket::KademliaTable;
use crate::metrics::METRICS;
use crate::packet::{Packet, PacketKind, MAX_PACKET_SIZE};
use crate::rpc::{Endpoint, Message, Neighbor, MAX_NEIGHBORS_PER_PACKET, PROTOCOL_VERSION};
use crate::rlp::Item;

/// Wire expirations are absolute unix seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The protocol engine. Construct via [`Service::spawn`], which starts the
/// serve loop and the maintenance task in the background.
pub struct Service {
    config: Discv4Config,
    /// The key packets are signed with. Held in memory for the lifetime of
    /// the engine, never persisted or logged.
    key: SigningKey,
    local_record: Arc<RwLock<NodeRecord>>,
    socket: Arc<UdpSocket>,
    /// Every peer the engine has interacted with, bonded or not. This is
    /// the engine's single write mutex: all per-peer timestamps and hashes
    /// are updated under it.
    peers: Mutex<HashMap<NodeId, NodeRecord>>,
    kbuckets: Arc<RwLock<KademliaTable>>,
}

impl Service {
    /// Starts the serve loop and the maintenance task on the ambient tokio
    /// runtime. Returns the service handle along with one exit channel per
    /// task; dropping or firing an exit channel terminates its task.
    pub(crate) fn spawn(
        local_record: Arc<RwLock<NodeRecord>>,
        key: SigningKey,
        kbuckets: Arc<RwLock<KademliaTable>>,
        socket: UdpSocket,
        config: Discv4Config,
    ) -> (Arc<Service>, oneshot::Sender<()>, oneshot::Sender<()>) {
        let service = Arc::new(Service {
            config,
            key,
            local_record,
            socket: Arc::new(socket),
            peers: Mutex::new(HashMap::new()),
            kbuckets,
        });

        let (serve_exit, serve_rx) = oneshot::channel();
        let (maintenance_exit, maintenance_rx) = oneshot::channel();

        let serve = service.clone();
        tokio::task::spawn(async move {
            serve.serve(serve_rx).await;
        });
        let maintain = service.clone();
        tokio::task::spawn(async move {
            maintain.maintain(maintenance_rx).await;
        });

        (service, serve_exit, maintenance_exit)
    }

    /// The serve loop: reads datagrams sequentially until the exit channel
    /// fires. Per-datagram errors are logged and swallowed here; nothing a
    /// remote peer sends can take the loop down.
    async fn serve(self: Arc<Self>, mut exit: oneshot::Receiver<()>) {
        debug!("Discovery serve loop starting");
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((length, src)) => {
                        METRICS.add_recv_bytes(length);
                        if let Err(e) = self.handle_datagram(src, &buf[..length]).await {
                            METRICS.add_dropped_frame();
                            debug!("Dropping datagram from {}: {:?}", src, e);
                        }
                    }
                    Err(e) => warn!("UDP recv failed: {}", e),
                },
                _ = &mut exit => {
                    debug!("Serve loop shutdown");
                    return;
                }
            }
        }
    }

    /// The maintenance task: while the peer count is below target, ask one
    /// known peer for the nodes closest to our own identity. The resulting
    /// neighbors cascade into pings and, for live peers, bonds.
    async fn maintain(self: Arc<Self>, mut exit: oneshot::Receiver<()>) {
        debug!("Maintenance task starting");
        let mut interval = tokio::time::interval(self.config.maintenance_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.refresh().await,
                _ = &mut exit => {
                    debug!("Maintenance task shutdown");
                    return;
                }
            }
        }
    }

    async fn refresh(&self) {
        let candidates: Vec<NodeRecord> = {
            let peers = self.peers.lock();
            METRICS.set_known_peers(peers.len());
            peers.values().cloned().collect()
        };
        debug!("peer-count: {}", candidates.len());
        if candidates.len() >= self.config.target_peer_count {
            return;
        }

        let target = VerifyingKey::from(&self.key);
        for peer in candidates {
            match self.find_node(&target, &peer).await {
                Ok(()) => break,
                Err(e) => {
                    debug!("find-node to {} failed: {:?}", peer, e);
                    continue;
                }
            }
        }
    }

    /// Verifies one datagram's frame, builds the provisional sender record
    /// from the recovered key and the wire source address, and dispatches on
    /// the packet kind.
    async fn handle_datagram(
        &self,
        src: SocketAddr,
        datagram: &[u8],
    ) -> Result<(), DiscoveryError> {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(PacketError::UnknownKind(kind)) => {
                // unknown kinds are logged and ignored
                trace!("<unknown kind {:#04x} from {}", kind, src);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // The sender is addressed by what the datagram came from, never by
        // anything self-reported inside the payload.
        let sender = NodeRecord::new(packet.remote_key, src.ip(), src.port(), 0);

        match Message::decode(packet.kind, &packet.body)? {
            Message::Ping { from, .. } => self.handle_ping(sender, packet.hash, from).await,
            Message::Pong { ping_hash, .. } => self.handle_pong(sender, ping_hash),
            Message::FindNode { target, .. } => self.handle_find_node(sender, target).await,
            Message::Neighbors { nodes, .. } => self.handle_neighbors(sender, nodes).await,
            Message::EnrRequest { expiration } => {
                self.handle_enr_request(sender, datagram, expiration).await
            }
            Message::EnrResponse {
                request_hash,
                record,
            } => self.handle_enr_response(sender, request_hash, &record),
        }
    }

    /// Answers a ping with a pong echoing the ping's frame hash, records the
    /// sender, and pings back if this peer has not been pinged recently.
    async fn handle_ping(
        &self,
        sender: NodeRecord,
        ping_hash: [u8; 32],
        from: Endpoint,
    ) -> Result<(), DiscoveryError> {
        // the self-reported endpoint must match the wire source
        if from.ip != sender.ip || from.udp_port != sender.udp_port {
            return Err(DiscoveryError::EndpointMismatch);
        }
        trace!("<ping {} {}", sender, hex::encode(&ping_hash[..4]));

        self.pong(ping_hash, &sender).await?;

        let (peer, needs_ping) = {
            let mut peers = self.peers.lock();
            let peer = peers
                .entry(sender.id())
                .or_insert_with(|| sender.clone());
            peer.received_ping = Some(std::time::Instant::now());
            if peer.is_bonded() {
                self.kbuckets.write().insert(peer.clone());
            }
            let needs_ping = match peer.sent_ping {
                Some(at) => at.elapsed() > self.config.ping_interval,
                None => true,
            };
            let result = (peer.clone(), needs_ping);
            METRICS.set_known_peers(peers.len());
            result
        };

        if needs_ping {
            self.ping(&peer).await?;
        }
        Ok(())
    }

    /// Correlates a pong to the outstanding ping by frame hash. Only pongs
    /// matching the recorded hash within the correlation window advance the
    /// peer toward bonded.
    fn handle_pong(&self, sender: NodeRecord, ping_hash: [u8; 32]) -> Result<(), DiscoveryError> {
        trace!("<pong {} {}", sender, hex::encode(&ping_hash[..4]));

        let mut peers = self.peers.lock();
        let peer = peers
            .get_mut(&sender.id())
            .ok_or(DiscoveryError::MissingPeer)?;
        if peer.sent_ping_hash != Some(ping_hash) {
            return Err(DiscoveryError::InvalidPingHash);
        }
        match peer.sent_ping {
            Some(at) if at.elapsed() <= self.config.pong_timeout => {}
            _ => return Err(DiscoveryError::ExpiredPingHash),
        }

        peer.received_pong = Some(std::time::Instant::now());
        if peer.is_bonded() {
            self.kbuckets.write().insert(peer.clone());
        }
        Ok(())
    }

    /// Replies with the table's closest records to the requested target,
    /// split across as many packets as the MTU requires.
    async fn handle_find_node(
        &self,
        sender: NodeRecord,
        target: [u8; 64],
    ) -> Result<(), DiscoveryError> {
        let target_id = NodeId::new(keccak256(&target));
        let closest = self
            .kbuckets
            .read()
            .find_closest(&target_id, self.config.max_nodes_response);
        trace!(">neighbors {} ({} nodes)", sender, closest.len());

        let expiration = unix_now() + self.config.packet_expiry.as_secs();
        if closest.is_empty() {
            self.write(
                &Message::Neighbors {
                    nodes: Vec::new(),
                    expiration,
                },
                sender.udp_addr(),
            )
            .await?;
            return Ok(());
        }
        for chunk in closest.chunks(MAX_NEIGHBORS_PER_PACKET) {
            let nodes = chunk.iter().map(Neighbor::from).collect();
            self.write(&Message::Neighbors { nodes, expiration }, sender.udp_addr())
                .await?;
        }
        Ok(())
    }

    /// Begins bonding with every advertised node: discovery progresses by
    /// the ping/pong loop itself, not by recursive lookups.
    async fn handle_neighbors(
        &self,
        sender: NodeRecord,
        nodes: Vec<Neighbor>,
    ) -> Result<(), DiscoveryError> {
        let local_id = self.local_record.read().id();
        let records: Vec<NodeRecord> = nodes
            .into_iter()
            .map(|n| NodeRecord::new(n.public_key, n.ip, n.udp_port, n.tcp_port))
            .filter(|record| record.id() != local_id)
            .collect();
        trace!("<neighbors {} ({} nodes)", sender, records.len());

        for record in &records {
            self.ping(record).await?;
        }
        Ok(())
    }

    /// Answers a live ENR request with our signed record. The request hash
    /// echoed back covers the entire inbound datagram.
    async fn handle_enr_request(
        &self,
        sender: NodeRecord,
        datagram: &[u8],
        expiration: u64,
    ) -> Result<(), DiscoveryError> {
        if expiration < unix_now() {
            return Err(DiscoveryError::ExpiredRequest);
        }
        let record = {
            let local = self.local_record.read();
            local.to_signed_item(&self.key)?
        };
        trace!(">enr-response {}", sender);
        self.write(
            &Message::EnrResponse {
                request_hash: keccak256(datagram),
                record,
            },
            sender.udp_addr(),
        )
        .await?;
        Ok(())
    }

    /// Inbound records are decoded for their addressing fields and logged;
    /// the engine does not act on them further.
    fn handle_enr_response(
        &self,
        sender: NodeRecord,
        _request_hash: [u8; 32],
        record: &Item,
    ) -> Result<(), DiscoveryError> {
        let record = NodeRecord::from_item(record)?;
        debug!(
            "<enr-response {} seq {} udp {} tcp {}",
            sender,
            record.seq,
            record.udp_addr(),
            record.tcp_addr()
        );
        Ok(())
    }

    /// Pings a peer unless one is already outstanding within the ping
    /// interval. The frame hash is recorded before the datagram leaves so
    /// the matching pong can be correlated, and the peer enters the peer map
    /// immediately.
    pub async fn ping(&self, dest: &NodeRecord) -> Result<(), DiscoveryError> {
        let (packet, hash) = {
            let mut peers = self.peers.lock();
            if let Some(peer) = peers.get(&dest.id()) {
                if let Some(at) = peer.sent_ping {
                    if at.elapsed() < self.config.ping_interval {
                        trace!("skip-ping {}", peer);
                        return Ok(());
                    }
                }
            }

            let message = {
                let local = self.local_record.read();
                Message::Ping {
                    version: PROTOCOL_VERSION,
                    from: Endpoint::from(&*local),
                    to: Endpoint::from(dest),
                    expiration: unix_now() + self.config.packet_expiry.as_secs(),
                    enr_seq: Some(local.seq),
                }
            };
            let (packet, hash) = Packet::encode(&self.key, PacketKind::Ping, &message.encode())?;

            let peer = peers.entry(dest.id()).or_insert_with(|| dest.clone());
            peer.sent_ping = Some(std::time::Instant::now());
            peer.sent_ping_hash = Some(hash);
            METRICS.set_known_peers(peers.len());
            (packet, hash)
        };

        trace!(">ping {} {}", dest, hex::encode(&hash[..4]));
        self.socket.send_to(&packet, dest.udp_addr()).await?;
        METRICS.add_sent_bytes(packet.len());
        Ok(())
    }

    async fn pong(&self, ping_hash: [u8; 32], dest: &NodeRecord) -> Result<(), DiscoveryError> {
        let message = Message::Pong {
            to: Endpoint::from(dest),
            ping_hash,
            expiration: unix_now() + self.config.packet_expiry.as_secs(),
            enr_seq: Some(self.local_record.read().seq),
        };
        trace!(">pong {}", dest);
        self.write(&message, dest.udp_addr()).await?;
        Ok(())
    }

    /// Asks `dest` for the nodes closest to `target`.
    pub async fn find_node(
        &self,
        target: &VerifyingKey,
        dest: &NodeRecord,
    ) -> Result<(), DiscoveryError> {
        let target = compact_public_key(target);
        let message = Message::FindNode {
            target,
            expiration: unix_now() + self.config.packet_expiry.as_secs(),
        };
        trace!(">find-node {} {}", dest, hex::encode(&target[..4]));
        self.write(&message, dest.udp_addr()).await?;
        Ok(())
    }

    /// Asks `dest` for its current signed node record.
    pub async fn request_enr(&self, dest: &NodeRecord) -> Result<(), DiscoveryError> {
        let message = Message::EnrRequest {
            expiration: unix_now() + self.config.packet_expiry.as_secs(),
        };
        trace!(">enr-request {}", dest);
        self.write(&message, dest.udp_addr()).await?;
        Ok(())
    }

    /// Frames, signs and sends one message, returning the packet hash for
    /// correlation.
    async fn write(&self, message: &Message, to: SocketAddr) -> Result<[u8; 32], DiscoveryError> {
        let (packet, hash) = Packet::encode(&self.key, message.kind(), &message.encode())?;
        if packet.len() > MAX_PACKET_SIZE {
            warn!(
                "Sending packet larger than max size: {} max: {}",
                packet.len(),
                MAX_PACKET_SIZE
            );
        }
        self.socket.send_to(&packet, to).await?;
        METRICS.add_sent_bytes(packet.len());
        Ok(hash)
    }

    /// Number of peers the engine has interacted with, bonded or not.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// A snapshot of bonded peers, for the TCP/RLPx layer to dial.
    pub fn bonded_peers(&self) -> Vec<NodeRecord> {
        self.peers
            .lock()
            .values()
            .filter(|peer| peer.is_bonded())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test;
