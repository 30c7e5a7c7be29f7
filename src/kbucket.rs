//! The Kademlia routing table.
//!
//! Known peers are kept in 20 buckets indexed by the XOR log-distance of
//! their identity from the local node. Each bucket is an LRU list of at most
//! [`MAX_NODES_PER_BUCKET`] records: the front is the most recently seen
//! node and the back is evicted on overflow.

use arrayvec::ArrayVec;

use crate::enr::{NodeId, NodeRecord};

/// Maximum number of nodes in a bucket, i.e. the (fixed) `k` parameter.
pub const MAX_NODES_PER_BUCKET: usize = 16;

/// Number of buckets kept. Nodes closer than log-distance 237 are extremely
/// rare, so everything below the minimum shares the closest bucket.
pub const NUM_BUCKETS: usize = 20;

const MIN_LOG_DISTANCE: u16 = 256 + 1 - NUM_BUCKETS as u16;

/// A single k-bucket: records ordered from most recently seen (front) to
/// least recently seen (back).
#[derive(Default)]
struct KBucket {
    nodes: ArrayVec<NodeRecord, MAX_NODES_PER_BUCKET>,
}

impl KBucket {
    /// Inserts a record. An existing entry for the same identity is replaced
    /// and moved to the front; on overflow the least recently seen record at
    /// the back is evicted.
    fn store(&mut self, record: NodeRecord) {
        let id = record.id();
        if let Some(position) = self.nodes.iter().position(|n| n.id() == id) {
            self.nodes.remove(position);
            self.nodes.insert(0, record);
            return;
        }
        if self.nodes.is_full() {
            self.nodes.pop();
        }
        self.nodes.insert(0, record);
    }
}

/// The routing table over all buckets. Shared access is serialized by the
/// lock the service wraps around the table.
pub struct KademliaTable {
    local_id: NodeId,
    buckets: [KBucket; NUM_BUCKETS],
}

impl KademliaTable {
    pub fn new(local_id: NodeId) -> Self {
        KademliaTable {
            local_id,
            buckets: std::array::from_fn(|_| KBucket::default()),
        }
    }

    /// Inserts a record into the bucket selected by its log-distance from
    /// the local identity.
    pub fn insert(&mut self, record: NodeRecord) {
        let distance = self
            .local_id
            .log_distance(&record.id())
            .max(MIN_LOG_DISTANCE);
        self.buckets[(distance - MIN_LOG_DISTANCE) as usize].store(record);
    }

    /// Returns up to `count` records ordered by ascending log-distance from
    /// `target`. This is a full scan: the table holds at most 320 records,
    /// so gathering everything and sorting is fast enough. The sort is
    /// stable, so equally distant records keep their bucket order.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.nodes.iter().cloned())
            .collect();
        nodes.sort_by_key(|node| node.id().log_distance(target));
        nodes.truncate(count);
        nodes
    }

    /// A snapshot of every record in the table, front-to-back per bucket.
    pub fn entries(&self) -> Vec<NodeRecord> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.nodes.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
