//! Discrete-event simulator
//!
//! Runs many [`Node`]s against a virtual clock and a [`Topology`] of radio
//! links. Every message goes through the wire codec, so a run exercises the
//! same code paths as the daemon. Runs are reproducible for a given seed.
pub mod event;
pub mod metrics;
pub mod topology;

use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::node::{Event, Node, Outbound};
use crate::settings::{NodeRole, ProtocolSettings, STANDARD_PORT_UDP};
pub use event::{NodeIndex, ScenarioAction, ScheduledEvent, SimEvent, TimerKind};
pub use metrics::{SimMetrics, SimulationResult};
pub use topology::{Link, Topology, TopologyKind};

/// How failure injection picks its victim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Any live relay
    #[default]
    Random,
    /// A live relay next to a node that is already down; any live relay
    /// when nothing is down
    Location,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Random => write!(f, "random"),
            FailureMode::Location => write!(f, "location"),
        }
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" => Ok(FailureMode::Random),
            "location" => Ok(FailureMode::Location),
            _ => Err(format!("Invalid failure mode: {}", s)),
        }
    }
}

/// Random crashes in the style of a testbed failure script
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailureConfig {
    pub mode: FailureMode,
    /// How often a crash is considered
    pub tick: Duration,
    /// A crash happens on a tick with probability `1 / probability`
    pub probability: u32,
    pub max_concurrent: usize,
    pub recovery_delay: Duration,
}

struct SimNode {
    node: Node,
    generation: u64,
}

pub struct Simulator {
    base: Instant,
    current_time: Duration,
    nodes: Vec<SimNode>,
    index_by_address: HashMap<SocketAddr, NodeIndex>,
    topology: Topology,
    settings: ProtocolSettings,
    event_queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    rng: StdRng,
    metrics: SimMetrics,
    failures: Option<FailureConfig>,
    last_begin: Option<Duration>,
    converged_at: Option<Duration>,
}

impl Simulator {
    /// One relay per topology node, all booting at time zero
    pub fn new(topology: Topology, settings: ProtocolSettings, seed: u64) -> Self {
        let base = Instant::now();
        let mut sim = Self {
            base,
            current_time: Duration::ZERO,
            nodes: Vec::with_capacity(topology.node_count()),
            index_by_address: HashMap::new(),
            topology,
            settings,
            event_queue: BinaryHeap::new(),
            next_seq: 0,
            rng: StdRng::seed_from_u64(seed),
            metrics: SimMetrics::default(),
            failures: None,
            last_begin: None,
            converged_at: None,
        };

        for index in 0..sim.topology.node_count() {
            let address = Self::node_address(index);
            let node_settings = sim
                .settings
                .clone()
                .with_role(NodeRole::Relay)
                .with_seed(seed.wrapping_add(index as u64 + 1));
            sim.nodes.push(SimNode {
                node: Node::new(address, node_settings),
                generation: 0,
            });
            sim.index_by_address.insert(address, index);
            sim.arm_boot_timers(index);
        }
        sim
    }

    pub fn with_failures(mut self, failures: FailureConfig) -> Self {
        if failures.tick.is_zero() {
            warn!("Failure tick of zero disables failure injection");
            return self;
        }
        self.failures = Some(failures);
        self.schedule(self.current_time + failures.tick, SimEvent::FailureTick);
        self
    }

    /// Simulated nodes live on 10.0.0.0/16, one address per index
    pub fn node_address(index: NodeIndex) -> SocketAddr {
        let host = index as u32 + 1;
        SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, (host >> 8) as u8, host as u8)),
            STANDARD_PORT_UDP,
        )
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index).map(|n| &n.node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Change a role immediately, before or between runs
    pub fn set_role(&mut self, index: NodeIndex, role: NodeRole) {
        if let Some(sim_node) = self.nodes.get_mut(index) {
            sim_node.node.set_role(role);
        }
    }

    pub fn schedule_action(&mut self, at: Duration, action: ScenarioAction) {
        self.schedule(at, SimEvent::Action(action));
    }

    pub fn run_until(&mut self, end_time: Duration) -> SimulationResult {
        while let Some(next) = self.event_queue.peek() {
            if next.time > end_time {
                break;
            }
            let Some(scheduled) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(scheduled.time);
            self.process_event(scheduled.event);
            self.check_convergence();
        }
        self.advance_time(end_time);
        self.result()
    }

    /// Highest version held by a live node
    pub fn highest_version(&self) -> i16 {
        self.nodes
            .iter()
            .filter(|n| !n.node.is_powered_down())
            .map(|n| n.node.token().version)
            .max()
            .unwrap_or_default()
    }

    /// Live nodes holding the highest version
    pub fn consistent_nodes(&self) -> usize {
        let highest = self.highest_version();
        self.nodes
            .iter()
            .filter(|n| !n.node.is_powered_down() && n.node.token().version == highest)
            .count()
    }

    /// Every live node holds the same token
    pub fn is_converged(&self) -> bool {
        let mut live = self
            .nodes
            .iter()
            .filter(|n| !n.node.is_powered_down())
            .map(|n| n.node.token());
        match live.next() {
            Some(first) => live.all(|token| token == first),
            None => true,
        }
    }

    pub fn result(&self) -> SimulationResult {
        SimulationResult {
            end_time_ms: self.current_time.as_millis() as u64,
            node_count: self.nodes.len(),
            highest_version: self.highest_version(),
            consistent_nodes: self.consistent_nodes(),
            converged: self.is_converged(),
            convergence_time_ms: self
                .last_begin
                .zip(self.converged_at)
                .map(|(begin, done)| done.saturating_sub(begin).as_millis() as u64),
            metrics: self.metrics.clone(),
            nodes: self.nodes.iter().map(|n| n.node.status()).collect(),
        }
    }

    fn schedule(&mut self, time: Duration, event: SimEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    fn schedule_timer(&mut self, node: NodeIndex, kind: TimerKind, after: Duration) {
        let generation = self.nodes[node].generation;
        self.schedule(
            self.current_time + after,
            SimEvent::Timer {
                node,
                kind,
                generation,
            },
        );
    }

    fn arm_boot_timers(&mut self, node: NodeIndex) {
        self.schedule_timer(node, TimerKind::Announce, self.settings.initial_announce_delay);
        self.schedule_timer(node, TimerKind::Beacon, self.settings.beacon_period);
    }

    fn advance_time(&mut self, time: Duration) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn now(&self) -> Instant {
        self.base + self.current_time
    }

    fn process_event(&mut self, event: SimEvent) {
        match event {
            SimEvent::Deliver { to, from, data } => {
                let now = self.now();
                let outbound = self.nodes[to].node.handle_datagram(from, &data, now);
                self.metrics.messages_delivered += 1;
                self.route(to, outbound);
            }
            SimEvent::Timer {
                node,
                kind,
                generation,
            } => self.fire_timer(node, kind, generation),
            SimEvent::FailureTick => self.failure_tick(),
            SimEvent::Action(action) => self.execute_action(action),
        }
    }

    fn fire_timer(&mut self, index: NodeIndex, kind: TimerKind, generation: u64) {
        if self.nodes[index].generation != generation {
            // Armed before a restart
            return;
        }
        let now = self.now();
        match kind {
            TimerKind::Announce => {
                let outbound = self.nodes[index].node.handle(Event::AnnounceTimer, now);
                self.route(index, outbound);
                self.schedule_timer(index, TimerKind::Announce, self.settings.announce_period);
            }
            TimerKind::Beacon => {
                let outbound = self.nodes[index].node.handle(Event::BeaconTimer, now);
                self.route(index, outbound);
                self.schedule_timer(index, TimerKind::Beacon, self.settings.beacon_period);
            }
            TimerKind::Restart => {
                let outbound = self.nodes[index].node.handle(Event::RestartTimer, now);
                self.route(index, outbound);
                self.nodes[index].generation += 1;
                self.arm_boot_timers(index);
            }
        }
    }

    /// Put a node's sends on the air
    fn route(&mut self, sender: NodeIndex, outbound: Vec<Outbound>) {
        let from = Self::node_address(sender);
        for out in outbound {
            let message = out.message();
            let data = match message.encode() {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to encode {} from {}: {}", message.kind(), from, e);
                    continue;
                }
            };
            self.metrics.record_sent(message.kind());

            match out {
                Outbound::Unicast { to, .. } => match self.index_by_address.get(&to).copied() {
                    Some(receiver) => self.transmit(sender, receiver, from, data),
                    None => self.metrics.messages_lost += 1,
                },
                Outbound::Multicast(_) => {
                    for receiver in self.topology.neighbors(sender) {
                        self.transmit(sender, receiver, from, data.clone());
                    }
                }
            }
        }
    }

    fn transmit(&mut self, sender: NodeIndex, receiver: NodeIndex, from: SocketAddr, data: Vec<u8>) {
        let loss_rate = match self.topology.get_link(sender, receiver) {
            Some(link) => link.loss_rate,
            None => {
                self.metrics.messages_lost += 1;
                return;
            }
        };
        if loss_rate > 0.0 && self.rng.random_bool(loss_rate) {
            self.metrics.messages_lost += 1;
            return;
        }
        let delivery_time = self.current_time + self.topology.delay();
        self.schedule(
            delivery_time,
            SimEvent::Deliver {
                to: receiver,
                from,
                data,
            },
        );
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Begin { node, value } => self.begin(node, value),
            ScenarioAction::Crash { node, recovery } => self.crash(node, recovery),
            ScenarioAction::SetRole { node, role } => self.set_role(node, role),
            ScenarioAction::SetLossRate { rate } => self.topology.set_loss_rate(rate),
        }
    }

    fn begin(&mut self, index: NodeIndex, value: Option<i32>) {
        let now = self.now();
        let Some(sim_node) = self.nodes.get_mut(index) else {
            warn!("No node {} to begin dissemination at", index);
            return;
        };
        match sim_node.node.begin_dissemination(value, now) {
            Ok((token, outbound)) => {
                info!(
                    "Node {} began dissemination of {} (v: {}) at {}ms",
                    index,
                    token.value,
                    token.version,
                    self.current_time.as_millis()
                );
                self.last_begin = Some(self.current_time);
                self.converged_at = None;
                self.route(index, outbound);
            }
            Err(e) => warn!("Node {} could not begin dissemination: {}", index, e),
        }
    }

    fn crash(&mut self, index: NodeIndex, recovery: Duration) {
        let now = self.now();
        let Some(sim_node) = self.nodes.get_mut(index) else {
            return;
        };
        match sim_node.node.schedule_restart(recovery, now) {
            Ok(_) => {
                self.metrics.crashes += 1;
                self.schedule_timer(index, TimerKind::Restart, recovery);
            }
            Err(e) => debug!("Node {} not crashed: {}", index, e),
        }
    }

    fn failure_tick(&mut self) {
        let Some(failures) = self.failures else {
            return;
        };
        self.schedule(self.current_time + failures.tick, SimEvent::FailureTick);

        let mut down: Vec<bool> = self
            .nodes
            .iter()
            .map(|n| n.node.is_powered_down())
            .collect();
        if down.iter().filter(|d| **d).count() >= failures.max_concurrent {
            return;
        }
        if failures.probability == 0 || self.rng.random_range(0..failures.probability) != 0 {
            return;
        }

        // Source and sink never fail
        let is_failable =
            |i: NodeIndex| !down[i] && self.nodes[i].node.role() == NodeRole::Relay;
        let failable: Vec<NodeIndex> = match failures.mode {
            FailureMode::Location if down.iter().any(|d| *d) => (0..self.nodes.len())
                .filter(|&i| down[i])
                .flat_map(|i| self.topology.neighbors(i))
                .filter(|&i| is_failable(i))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            _ => (0..self.nodes.len()).filter(|&i| is_failable(i)).collect(),
        };
        if failable.is_empty() {
            return;
        }
        let candidate = failable[self.rng.random_range(0..failable.len())];

        down[candidate] = true;
        if !self.topology.is_connected_without(&down) {
            self.metrics.failures_vetoed += 1;
            return;
        }
        debug!(
            "Failing node {} at {}ms",
            candidate,
            self.current_time.as_millis()
        );
        self.crash(candidate, failures.recovery_delay);
    }

    fn check_convergence(&mut self) {
        if self.last_begin.is_some() && self.converged_at.is_none() && self.is_converged() {
            self.converged_at = Some(self.current_time);
        }
    }
}
