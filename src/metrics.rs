use std::sync::atomic::{AtomicUsize, Ordering};

lazy_static! {
    pub static ref METRICS: InternalMetrics = InternalMetrics::default();
}

/// Counters updated by the running service.
#[derive(Default)]
pub struct InternalMetrics {
    bytes_sent: AtomicUsize,
    bytes_recv: AtomicUsize,
    frames_dropped: AtomicUsize,
    known_peers: AtomicUsize,
}

impl InternalMetrics {
    pub fn add_sent_bytes(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_recv_bytes(&self, bytes: usize) {
        self.bytes_recv.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_known_peers(&self, peers: usize) {
        self.known_peers.store(peers, Ordering::Relaxed);
    }
}

/// A snapshot of the server metrics.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub bytes_sent: usize,
    pub bytes_recv: usize,
    pub frames_dropped: usize,
    pub known_peers: usize,
}

impl From<&InternalMetrics> for Metrics {
    fn from(internal: &InternalMetrics) -> Self {
        Metrics {
            bytes_sent: internal.bytes_sent.load(Ordering::Relaxed),
            bytes_recv: internal.bytes_recv.load(Ordering::Relaxed),
            frames_dropped: internal.frames_dropped.load(Ordering::Relaxed),
            known_peers: internal.known_peers.load(Ordering::Relaxed),
        }
    }
}
