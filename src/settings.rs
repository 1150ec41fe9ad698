//! rmhb application settings
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::Result;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_UDP: u16 = 30001;
pub const DEFAULT_PORT_UDP: &str = "30001";

pub const DEFAULT_ANNOUNCE_PERIOD_MS: &str = "15000";
pub const DEFAULT_INITIAL_ANNOUNCE_DELAY_MS: &str = "1000";
pub const DEFAULT_BEACON_PERIOD_MS: &str = "10000";
pub const DEFAULT_NEIGHBOR_TIMEOUT_MS: &str = "30000";
pub const DEFAULT_MAX_NEIGHBORS: &str = "16";

/// Which part a node plays in dissemination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Originates new token values and relays
    Source,
    /// Relays data to a random neighbor
    #[default]
    Relay,
    /// Absorbs data, never forwards it
    Sink,
}

impl NodeRole {
    pub fn forwards_data(&self) -> bool {
        !matches!(self, NodeRole::Sink)
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Source => write!(f, "source"),
            NodeRole::Relay => write!(f, "relay"),
            NodeRole::Sink => write!(f, "sink"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "source" => Ok(NodeRole::Source),
            "relay" => Ok(NodeRole::Relay),
            "sink" => Ok(NodeRole::Sink),
            _ => Err(format!("Invalid node role: {}", s)),
        }
    }
}

/// Everything the protocol state machine needs, fixed at node start
/// (role excepted, which may change at runtime).
#[derive(Clone, Debug)]
pub struct ProtocolSettings {
    pub role: NodeRole,
    pub announce_period: Duration,
    // First announce after a cold start
    pub initial_announce_delay: Duration,
    pub beacon_period: Duration,
    pub neighbor_timeout: Duration,
    pub max_neighbors: usize,
    // None = relay forever
    pub max_hops: Option<i32>,
    // Seed for neighbor selection; None seeds from the OS
    pub rng_seed: Option<u64>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            role: NodeRole::Relay,
            announce_period: Duration::from_secs(15),
            initial_announce_delay: Duration::from_secs(1),
            beacon_period: Duration::from_secs(10),
            neighbor_timeout: Duration::from_secs(30),
            max_neighbors: 16,
            max_hops: None,
            rng_seed: None,
        }
    }
}

impl ProtocolSettings {
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.announce_period.is_zero() {
            return Err(config_error!("announce period must be non-zero"));
        }
        if self.beacon_period.is_zero() {
            return Err(config_error!("beacon period must be non-zero"));
        }
        if self.neighbor_timeout.is_zero() {
            return Err(config_error!("neighbor timeout must be non-zero"));
        }
        if self.max_neighbors == 0 {
            return Err(config_error!("max neighbors must be at least 1"));
        }
        if let Some(max_hops) = self.max_hops {
            if max_hops < 0 {
                return Err(config_error!("max hops must not be negative: {}", max_hops));
            }
        }
        Ok(())
    }
}

/// Where and how the UDP transport binds and multicasts
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub listen: SocketAddr,
    // Real IP multicast group; when unset, multicast fans out to `peers`
    pub multicast_group: Option<IpAddr>,
    pub peers: Vec<SocketAddr>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Socket listen address
    pub listen_address: String,

    // UDP listen port for the protocol
    pub listen_port: u16,

    // Role at start
    pub role: NodeRole,

    // Periodic timers
    pub announce_period_ms: u64,
    pub initial_announce_delay_ms: u64,
    pub beacon_period_ms: u64,

    // Neighbor soft-state
    pub neighbor_timeout_ms: u64,
    pub max_neighbors: usize,

    // Optional relay hop ceiling
    pub max_hops: Option<i32>,

    // Multicast: group address, or static peer list fan-out
    pub multicast_group: Option<IpAddr>,
    pub peers: Vec<SocketAddr>,

    pub rng_seed: Option<u64>,

    // Scripted actions for test deployments
    pub start_after_ms: Option<u64>,
    pub start_value: Option<i32>,
    pub restart_after_ms: Option<u64>,
    pub restart_delay_ms: u64,
}

impl Settings {
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listen_address
            .parse()
            .map_err(|e| config_error!("Invalid listen address '{}': {}", self.listen_address, e))?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    pub fn protocol_settings(&self) -> ProtocolSettings {
        ProtocolSettings {
            role: self.role,
            announce_period: Duration::from_millis(self.announce_period_ms),
            initial_announce_delay: Duration::from_millis(self.initial_announce_delay_ms),
            beacon_period: Duration::from_millis(self.beacon_period_ms),
            neighbor_timeout: Duration::from_millis(self.neighbor_timeout_ms),
            max_neighbors: self.max_neighbors,
            max_hops: self.max_hops,
            rng_seed: self.rng_seed,
        }
    }

    pub fn transport_config(&self) -> Result<TransportConfig> {
        Ok(TransportConfig {
            listen: self.listen_socket_addr()?,
            multicast_group: self.multicast_group,
            peers: self.peers.clone(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol_settings().validate()?;
        self.listen_socket_addr()?;
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(config_error!("{} is not a multicast address", group));
            }
        }
        Ok(())
    }
}
