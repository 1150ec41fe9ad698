//! CLI for this application
//!
use std::net::{IpAddr, SocketAddr};

use crate::settings::{self, NodeRole, APP_NAME, APP_VERSION};

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = APP_NAME, version = APP_VERSION)]
pub struct Cli {
    // Socket listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("RMHB_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // UDP listen port for the protocol
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_UDP,
        env("RMHB_LISTEN_PORT"),
        help = "UDP port to bind the protocol socket to"
    )]
    pub listen_port: u16,

    // Role of this node
    #[clap(
        long,
        default_value = "relay",
        env("RMHB_ROLE"),
        help = "node role: 'source', 'relay', or 'sink'"
    )]
    pub role: NodeRole,

    #[clap(
        long,
        default_value = settings::DEFAULT_ANNOUNCE_PERIOD_MS,
        env("RMHB_ANNOUNCE_PERIOD_MS"),
        help = "Milliseconds between neighbor discovery announcements"
    )]
    pub announce_period_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_INITIAL_ANNOUNCE_DELAY_MS,
        env("RMHB_INITIAL_ANNOUNCE_DELAY_MS"),
        help = "Milliseconds before the first announcement after a (re)start"
    )]
    pub initial_announce_delay_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_BEACON_PERIOD_MS,
        env("RMHB_BEACON_PERIOD_MS"),
        help = "Milliseconds between version beacons"
    )]
    pub beacon_period_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_NEIGHBOR_TIMEOUT_MS,
        env("RMHB_NEIGHBOR_TIMEOUT_MS"),
        help = "Milliseconds a neighbor stays known without a fresh announcement"
    )]
    pub neighbor_timeout_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_MAX_NEIGHBORS,
        env("RMHB_MAX_NEIGHBORS"),
        help = "Neighbor table capacity"
    )]
    pub max_neighbors: usize,

    #[clap(
        long,
        env("RMHB_MAX_HOPS"),
        help = "Absorb data instead of relaying past this hop count (default: unlimited)"
    )]
    pub max_hops: Option<i32>,

    // Multicast either through an IP group or by fanning out to peers
    #[clap(
        long,
        env("RMHB_MULTICAST_GROUP"),
        help = "IP multicast group for announcements and beacons (e.g., 239.255.30.1)"
    )]
    pub multicast_group: Option<IpAddr>,

    #[clap(
        long,
        env("RMHB_PEERS"),
        value_delimiter = ',',
        help = "Peer UDP addresses used for multicast fan-out when no group is set (e.g., 127.0.0.1:30002,127.0.0.1:30003)"
    )]
    pub peers: Vec<SocketAddr>,

    #[clap(long, env("RMHB_RNG_SEED"), help = "Seed for random neighbor selection")]
    pub rng_seed: Option<u64>,

    // Scripted actions
    #[clap(
        long,
        env("RMHB_START_AFTER_MS"),
        help = "Begin dissemination once, this many milliseconds after start (source only)"
    )]
    pub start_after_ms: Option<u64>,

    #[clap(
        long,
        env("RMHB_START_VALUE"),
        help = "Token value to disseminate (default: current value + 1)"
    )]
    pub start_value: Option<i32>,

    #[clap(
        long,
        env("RMHB_RESTART_AFTER_MS"),
        help = "Simulate a power failure this many milliseconds after start"
    )]
    pub restart_after_ms: Option<u64>,

    #[clap(
        long,
        default_value = "5000",
        env("RMHB_RESTART_DELAY_MS"),
        help = "Milliseconds a simulated power failure lasts"
    )]
    pub restart_delay_ms: u64,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            role: self.role,
            announce_period_ms: self.announce_period_ms,
            initial_announce_delay_ms: self.initial_announce_delay_ms,
            beacon_period_ms: self.beacon_period_ms,
            neighbor_timeout_ms: self.neighbor_timeout_ms,
            max_neighbors: self.max_neighbors,
            max_hops: self.max_hops,
            multicast_group: self.multicast_group,
            peers: self.peers,
            rng_seed: self.rng_seed,
            start_after_ms: self.start_after_ms,
            start_value: self.start_value,
            restart_after_ms: self.restart_after_ms,
            restart_delay_ms: self.restart_delay_ms,
        }
    }
}
