///! A set of configuration parameters to tune the discovery protocol.
use std::time::Duration;

/// Configuration parameters that define the behavior of the discovery server.
#[derive(Clone, Debug)]
pub struct Discv4Config {
    /// How often the maintenance task wakes up to check the peer count.
    /// Default: 5 seconds.
    pub maintenance_interval: Duration,

    /// The peer count below which the maintenance task issues FindNode
    /// probes. Default: 16.
    pub target_peer_count: usize,

    /// The maximum number of nodes we return to a find nodes request. The
    /// default is 16.
    pub max_nodes_response: usize,

    /// The minimum time between pings to the same peer. A bonded peer is
    /// re-pinged once this has elapsed. Default: 1 hour.
    pub ping_interval: Duration,

    /// How long a pong remains correlatable to its ping. Pongs arriving
    /// later are rejected. Default: 60 seconds.
    pub pong_timeout: Duration,

    /// Lifetime stamped into outbound packets as their wire expiration.
    /// Default: 1 hour.
    pub packet_expiry: Duration,
}

impl Default for Discv4Config {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(5),
            target_peer_count: 16,
            max_nodes_response: 16,
            ping_interval: Duration::from_secs(3600),
            pong_timeout: Duration::from_secs(60),
            packet_expiry: Duration::from_secs(3600),
        }
    }
}

#[derive(Default)]
pub struct Discv4ConfigBuilder {
    config: Discv4Config,
}

impl Discv4ConfigBuilder {
    // set default values
    pub fn new() -> Self {
        Discv4ConfigBuilder::default()
    }

    /// How often the maintenance task checks the peer count.
    pub fn maintenance_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// The peer count the maintenance task tries to reach.
    pub fn target_peer_count(&mut self, count: usize) -> &mut Self {
        self.config.target_peer_count = count;
        self
    }

    /// The maximum number of nodes we return to a find nodes request.
    pub fn max_nodes_response(&mut self, max: usize) -> &mut Self {
        self.config.max_nodes_response = max;
        self
    }

    /// The minimum time between pings to the same peer.
    pub fn ping_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.ping_interval = interval;
        self
    }

    /// How long a pong remains correlatable to its ping.
    pub fn pong_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.pong_timeout = timeout;
        self
    }

    /// Lifetime stamped into outbound packets as their wire expiration.
    pub fn packet_expiry(&mut self, expiry: Duration) -> &mut Self {
        self.config.packet_expiry = expiry;
        self
    }

    pub fn build(&mut self) -> Discv4Config {
        self.config.clone()
    }
}
