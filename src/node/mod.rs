//! Node State Synchronization
//!
//! A `Node` owns everything one device knows: its neighbor table, its copy
//! of the token, its role and its power state. It performs no I/O. Callers
//! feed it timer expiries and inbound messages through [`Node::handle`] and
//! perform the [`Outbound`] sends it returns. The async
//! [`controller::NodeController`] does this over a real transport; the
//! [`crate::sim`] simulator does it for many nodes in virtual time.
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

pub mod commands;
pub mod controller;
pub mod dissemination;
pub mod messages;
pub mod neighbors;
pub mod reconciliation;
pub mod stats;
pub mod token;

use crate::error::{ProtocolError, Result};
use crate::settings::{NodeRole, ProtocolSettings};
pub use commands::{NodeCommand, NodeHandle};
pub use controller::NodeController;
pub use messages::Message;
pub use neighbors::{AnnounceOutcome, NeighborEntry, NeighborTable};
pub use stats::{NodeStats, NodeStatus};
pub use token::{Acceptance, Token, TokenStore};

/// Everything that can wake the node up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    AnnounceTimer,
    BeaconTimer,
    RestartTimer,
    Inbound { from: SocketAddr, message: Message },
}

/// A send the node wants performed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outbound {
    Unicast { to: SocketAddr, message: Message },
    Multicast(Message),
}

impl Outbound {
    pub fn message(&self) -> &Message {
        match self {
            Outbound::Unicast { message, .. } => message,
            Outbound::Multicast(message) => message,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PowerState {
    On,
    /// Radio off until the restart timer fires
    Down { restart_at: Instant },
}

pub struct Node {
    address: SocketAddr,
    settings: ProtocolSettings,
    role: NodeRole,
    neighbors: NeighborTable,
    token: TokenStore,
    rng: StdRng,
    power: PowerState,
    stats: NodeStats,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("role", &self.role)
            .field("token", &self.token.token())
            .field("neighbors", &self.neighbors.len())
            .field("power", &self.power)
            .finish()
    }
}

impl Node {
    pub fn new(address: SocketAddr, settings: ProtocolSettings) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut node = Self {
            address,
            role: settings.role,
            neighbors: NeighborTable::new(settings.max_neighbors, settings.neighbor_timeout),
            token: TokenStore::new(),
            rng,
            power: PowerState::On,
            stats: NodeStats::default(),
            settings,
        };
        node.cold_start();
        info!(
            "[{}] Node started as {} (announce {}ms, beacon {}ms, {} neighbor slots)",
            node.address,
            node.role,
            node.settings.announce_period.as_millis(),
            node.settings.beacon_period.as_millis(),
            node.settings.max_neighbors
        );
        node
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn token(&self) -> Token {
        self.token.token()
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn is_powered_down(&self) -> bool {
        matches!(self.power, PowerState::Down { .. })
    }

    /// When the pending restart fires, if one is scheduled
    pub fn restart_deadline(&self) -> Option<Instant> {
        match self.power {
            PowerState::Down { restart_at } => Some(restart_at),
            PowerState::On => None,
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            role: self.role,
            token: self.token.token(),
            neighbors: self.neighbors.addresses(),
            powered_down: self.is_powered_down(),
            stats: self.stats.clone(),
        }
    }

    pub fn set_role(&mut self, role: NodeRole) {
        if role != self.role {
            info!("[{}] Role changed {} -> {}", self.address, self.role, role);
            self.role = role;
        }
    }

    /// Simulate a power failure: the radio goes down now and the node
    /// cold-starts when the restart timer fires `delay` later.
    pub fn schedule_restart(&mut self, delay: Duration, now: Instant) -> Result<Instant> {
        if self.is_powered_down() {
            return Err(ProtocolError::RestartPending.into());
        }
        let restart_at = now + delay;
        self.power = PowerState::Down { restart_at };
        info!(
            "[{}] Powering down, restart in {}ms",
            self.address,
            delay.as_millis()
        );
        Ok(restart_at)
    }

    /// Process one event to completion, then sweep expired neighbors
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        match event {
            Event::AnnounceTimer => self.on_announce_timer(&mut outbound),
            Event::BeaconTimer => self.on_beacon_timer(&mut outbound),
            Event::RestartTimer => self.on_restart_timer(),
            Event::Inbound { from, message } => {
                self.on_message(from, message, now, &mut outbound)
            }
        }
        self.expire_neighbors(now);
        outbound
    }

    /// Decode a raw datagram and handle it. Undecodable datagrams are dropped.
    pub fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now: Instant) -> Vec<Outbound> {
        match Message::decode(data) {
            Ok(message) => self.handle(Event::Inbound { from, message }, now),
            Err(e) => {
                self.stats.malformed_dropped += 1;
                debug!(
                    "[{}] Dropping {}-byte datagram from {}: {}",
                    self.address,
                    data.len(),
                    from,
                    e
                );
                self.expire_neighbors(now);
                Vec::new()
            }
        }
    }

    fn cold_start(&mut self) {
        self.token.reset_on_restart();
        self.neighbors.clear();
        self.power = PowerState::On;
    }

    fn on_announce_timer(&mut self, outbound: &mut Vec<Outbound>) {
        if self.is_powered_down() {
            return;
        }
        debug!("[{}] Sending neighbor announce", self.address);
        self.stats.announces_sent += 1;
        outbound.push(Outbound::Multicast(Message::Announce));
    }

    fn on_beacon_timer(&mut self, outbound: &mut Vec<Outbound>) {
        if self.is_powered_down() {
            return;
        }
        let version = self.token.version();
        debug!("[{}] Sending version beacon (v: {})", self.address, version);
        self.stats.beacons_sent += 1;
        outbound.push(Outbound::Multicast(Message::VersionBeacon { version }));
    }

    fn on_restart_timer(&mut self) {
        if !self.is_powered_down() {
            debug!("[{}] Restart timer fired with no restart scheduled", self.address);
            return;
        }
        self.cold_start();
        self.stats.restarts += 1;
        info!(
            "[{}] Restarted with empty state (v: {})",
            self.address,
            self.token.version()
        );
    }

    fn on_message(
        &mut self,
        from: SocketAddr,
        message: Message,
        now: Instant,
        outbound: &mut Vec<Outbound>,
    ) {
        if self.is_powered_down() {
            self.stats.dropped_while_down += 1;
            return;
        }
        // Don't process our own multicast
        if from == self.address {
            return;
        }
        match message {
            Message::Announce => self.on_announce(from, now),
            Message::Data {
                value,
                version,
                hops,
            } => self.on_data_received(from, value, version, hops, outbound),
            Message::VersionBeacon { version } => self.on_version_beacon(from, version, outbound),
            Message::ControlRequest { version } => {
                self.on_control_request(from, version, outbound)
            }
            Message::Recover { value, version } => {
                self.on_recover(from, value, version);
            }
        }
    }

    fn on_announce(&mut self, from: SocketAddr, now: Instant) {
        match self.neighbors.on_announce(from, now) {
            AnnounceOutcome::Inserted => {
                self.stats.neighbors_added += 1;
                debug!("[{}] Added {} to the neighbor table", self.address, from);
            }
            AnnounceOutcome::Refreshed => {
                debug!("[{}] Refreshed neighbor {}", self.address, from);
            }
            AnnounceOutcome::Dropped => {
                self.stats.neighbors_dropped_full += 1;
                warn!(
                    "[{}] Neighbor table full ({}), ignoring announce from {}",
                    self.address,
                    self.neighbors.capacity(),
                    from
                );
            }
        }
    }

    /// Drop neighbors whose expiry has passed. Runs after every event; the
    /// controller also calls it for operator commands.
    pub fn expire_neighbors(&mut self, now: Instant) {
        for entry in self.neighbors.expire_due(now) {
            self.stats.neighbors_expired += 1;
            debug!(
                "[{}] Removing {} from the neighbor table",
                self.address, entry.address
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 30001))
    }

    fn get_settings(role: NodeRole) -> ProtocolSettings {
        ProtocolSettings::default().with_role(role).with_seed(1)
    }

    #[test]
    fn test_timers_multicast_announce_and_beacon() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));

        let out = node.handle(Event::AnnounceTimer, now);
        assert_eq!(out, vec![Outbound::Multicast(Message::Announce)]);

        let out = node.handle(Event::BeaconTimer, now);
        assert_eq!(
            out,
            vec![Outbound::Multicast(Message::VersionBeacon { version: 0 })]
        );
        assert_eq!(node.stats().messages_sent(), 2);
    }

    #[test]
    fn test_announce_populates_table_and_expires() {
        let start = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: Message::Announce,
            },
            start,
        );
        assert!(out.is_empty());
        assert!(node.neighbors().contains(&addr(2)));

        // Any later event sweeps the table
        let timeout = node.settings().neighbor_timeout;
        node.handle(Event::BeaconTimer, start + timeout + Duration::from_millis(1));
        assert!(node.neighbors().is_empty());
        assert_eq!(node.stats().neighbors_expired, 1);
    }

    #[test]
    fn test_ignores_own_messages() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));
        node.handle(
            Event::Inbound {
                from: addr(1),
                message: Message::Announce,
            },
            now,
        );
        assert!(node.neighbors().is_empty());
    }

    #[test]
    fn test_malformed_datagram_dropped() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));
        let out = node.handle_datagram(addr(2), &[0xff, 0xff], now);
        assert!(out.is_empty());
        assert_eq!(node.stats().malformed_dropped, 1);

        let announce = Message::Announce.encode().unwrap();
        node.handle_datagram(addr(2), &announce, now);
        assert!(node.neighbors().contains(&addr(2)));
    }

    #[test]
    fn test_powered_down_node_is_silent() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));
        let restart_at = node.schedule_restart(Duration::from_secs(5), now).unwrap();
        assert_eq!(node.restart_deadline(), Some(restart_at));

        assert!(node.handle(Event::AnnounceTimer, now).is_empty());
        assert!(node.handle(Event::BeaconTimer, now).is_empty());
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: Message::VersionBeacon { version: 3 },
            },
            now,
        );
        assert!(out.is_empty());
        assert_eq!(node.stats().dropped_while_down, 1);

        assert!(matches!(
            node.schedule_restart(Duration::from_secs(1), now),
            Err(crate::error::RmhbError::Protocol(
                ProtocolError::RestartPending
            ))
        ));
    }

    #[test]
    fn test_restart_clears_state() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));
        node.handle(
            Event::Inbound {
                from: addr(2),
                message: Message::Announce,
            },
            now,
        );
        node.handle(
            Event::Inbound {
                from: addr(2),
                message: Message::Recover {
                    value: 42,
                    version: 7,
                },
            },
            now,
        );
        assert_eq!(node.token().version, 7);

        node.schedule_restart(Duration::from_secs(5), now).unwrap();
        node.handle(Event::RestartTimer, now + Duration::from_secs(5));

        assert_eq!(node.token(), Token::default());
        assert!(node.neighbors().is_empty());
        assert!(!node.is_powered_down());
        assert_eq!(node.restart_deadline(), None);
        assert_eq!(node.stats().restarts, 1);
    }

    #[test]
    fn test_restart_timer_without_schedule_is_noop() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Relay));
        node.handle(
            Event::Inbound {
                from: addr(2),
                message: Message::Recover {
                    value: 1,
                    version: 1,
                },
            },
            now,
        );
        node.handle(Event::RestartTimer, now);
        assert_eq!(node.token().version, 1);
        assert_eq!(node.stats().restarts, 0);
    }

    #[test]
    fn test_status_snapshot() {
        let now = Instant::now();
        let mut node = Node::new(addr(1), get_settings(NodeRole::Sink));
        node.handle(
            Event::Inbound {
                from: addr(3),
                message: Message::Announce,
            },
            now,
        );
        let status = node.status();
        assert_eq!(status.role, NodeRole::Sink);
        assert_eq!(status.neighbors, vec![addr(3)]);
        assert!(!status.powered_down);
    }
}
