//! The Node Discovery v4 protocol. See the module level docs for further details.
//!
//! This provides the main struct for running and interfacing with a
//! discovery server. A [`Discv4`] is created from the local node record and
//! its signing key, then started with a bound UDP socket via
//! [`Discv4::start`]; this spawns the serve loop and the maintenance task in
//! the background. The server is stopped with [`Discv4::shutdown`].

use std::sync::Arc;

use k256::ecdsa::{SigningKey, VerifyingKey};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::Discv4Config;
use crate::enr::NodeRecord;
use crate::error::DiscoveryError;
use crate::kbucket::KademliaTable;
use crate::metrics::{Metrics, METRICS};
use crate::service::Service;

/// The main discovery struct. This provides the user-level API for issuing
/// probes and querying discovered peers.
pub struct Discv4 {
    config: Discv4Config,
    key: SigningKey,
    local_record: Arc<RwLock<NodeRecord>>,
    kbuckets: Arc<RwLock<KademliaTable>>,
    service: Option<Arc<Service>>,
    serve_exit: Option<oneshot::Sender<()>>,
    maintenance_exit: Option<oneshot::Sender<()>>,
}

impl Discv4 {
    /// Builds a server from the local record and the key that owns it. The
    /// record's public key must match the signing key.
    pub fn new(
        local_record: NodeRecord,
        key: SigningKey,
        config: Discv4Config,
    ) -> Result<Self, DiscoveryError> {
        if local_record.public_key != *key.verifying_key() {
            return Err(DiscoveryError::KeyMismatch);
        }

        let kbuckets = Arc::new(RwLock::new(KademliaTable::new(local_record.id())));
        Ok(Discv4 {
            config,
            key,
            local_record: Arc::new(RwLock::new(local_record)),
            kbuckets,
            service: None,
            serve_exit: None,
            maintenance_exit: None,
        })
    }

    /// Starts the server on an already-bound UDP socket, spawning the serve
    /// loop and the maintenance task on the current tokio runtime. The
    /// socket is the engine's only network resource; closing it (via
    /// [`Discv4::shutdown`]) terminates the serve loop.
    pub fn start(&mut self, socket: UdpSocket) -> Result<(), DiscoveryError> {
        if self.service.is_some() {
            warn!("Service is already started");
            return Err(DiscoveryError::ServiceAlreadyStarted);
        }

        let (service, serve_exit, maintenance_exit) = Service::spawn(
            self.local_record.clone(),
            self.key.clone(),
            self.kbuckets.clone(),
            socket,
            self.config.clone(),
        );
        self.service = Some(service);
        self.serve_exit = Some(serve_exit);
        self.maintenance_exit = Some(maintenance_exit);
        Ok(())
    }

    /// Terminates the server tasks.
    pub fn shutdown(&mut self) {
        match (self.serve_exit.take(), self.maintenance_exit.take()) {
            (Some(serve), Some(maintenance)) => {
                if serve.send(()).is_err() || maintenance.send(()).is_err() {
                    debug!("Discovery service already shutdown");
                }
                self.service = None;
            }
            _ => debug!("Service is already shutdown"),
        }
    }

    fn service(&self) -> Result<&Arc<Service>, DiscoveryError> {
        self.service.as_ref().ok_or(DiscoveryError::ServiceNotStarted)
    }

    /// Begins bonding with a known node, e.g. a boot node. A live node
    /// answers with a pong and its own ping; once both sides complete the
    /// exchange the node enters the routing table.
    pub async fn ping(&self, record: &NodeRecord) -> Result<(), DiscoveryError> {
        self.service()?.ping(record).await
    }

    /// Asks `dest` for the nodes closest to this node's identity. The
    /// replies cascade into pings and, for live peers, table insertions.
    pub async fn find_node(&self, dest: &NodeRecord) -> Result<(), DiscoveryError> {
        let target = VerifyingKey::from(&self.key);
        self.service()?.find_node(&target, dest).await
    }

    /// Asks `dest` for its current signed node record.
    pub async fn request_enr(&self, dest: &NodeRecord) -> Result<(), DiscoveryError> {
        self.service()?.request_enr(dest).await
    }

    /// A snapshot of the routing table, every bucket front-to-back.
    pub fn table_entries(&self) -> Vec<NodeRecord> {
        self.kbuckets.read().entries()
    }

    /// Bonded peers with their TCP endpoints, for the RLPx layer to dial.
    pub fn bonded_peers(&self) -> Vec<NodeRecord> {
        self.service
            .as_ref()
            .map(|service| service.bonded_peers())
            .unwrap_or_default()
    }

    /// Number of peers the engine has interacted with, bonded or not.
    pub fn peer_count(&self) -> usize {
        self.service
            .as_ref()
            .map(|service| service.peer_count())
            .unwrap_or_default()
    }

    pub fn local_record(&self) -> NodeRecord {
        self.local_record.read().clone()
    }

    /// A snapshot of the server metrics.
    pub fn metrics(&self) -> Metrics {
        Metrics::from(&*METRICS)
    }
}
