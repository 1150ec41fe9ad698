use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::token::Token;
use crate::settings::NodeRole;

/// Counters kept by a node for the lifetime of the process.
/// They survive simulated restarts so experiments can total them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub announces_sent: u64,
    pub beacons_sent: u64,
    pub data_originated: u64,
    pub data_forwarded: u64,
    pub data_received: u64,
    pub data_absorbed: u64,
    pub forwards_without_neighbor: u64,
    pub controls_sent: u64,
    pub recovers_sent: u64,
    pub recovers_accepted: u64,
    pub recovers_rejected: u64,
    pub neighbors_added: u64,
    pub neighbors_dropped_full: u64,
    pub neighbors_expired: u64,
    pub malformed_dropped: u64,
    pub dropped_while_down: u64,
    pub restarts: u64,
}

impl NodeStats {
    /// Total messages this node put on the air
    pub fn messages_sent(&self) -> u64 {
        self.announces_sent
            + self.beacons_sent
            + self.data_originated
            + self.data_forwarded
            + self.controls_sent
            + self.recovers_sent
    }
}

/// Point-in-time view of a node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub role: NodeRole,
    pub token: Token,
    pub neighbors: Vec<SocketAddr>,
    pub powered_down: bool,
    pub stats: NodeStats,
}
