//! Metrics collected over a simulation run.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::{NodeStatus, Token};

/// Network-wide counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimMetrics {
    /// Messages put on the air, keyed by message kind
    pub messages_sent: BTreeMap<String, u64>,
    /// Per-receiver deliveries; one multicast can deliver many times
    pub messages_delivered: u64,
    /// Deliveries lost to link loss or a missing link
    pub messages_lost: u64,
    pub crashes: u64,
    /// Failure ticks skipped because the crash would partition the network
    pub failures_vetoed: u64,
}

impl SimMetrics {
    pub fn record_sent(&mut self, kind: &str) {
        *self.messages_sent.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn sent(&self, kind: &str) -> u64 {
        self.messages_sent.get(kind).copied().unwrap_or(0)
    }

    pub fn total_sent(&self) -> u64 {
        self.messages_sent.values().sum()
    }
}

/// Outcome of a run, printed by the experiment runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub end_time_ms: u64,
    pub node_count: usize,
    pub highest_version: i16,
    pub consistent_nodes: usize,
    pub converged: bool,
    /// Time from the latest dissemination until every live node held it
    pub convergence_time_ms: Option<u64>,
    pub metrics: SimMetrics,
    pub nodes: Vec<NodeStatus>,
}

impl SimulationResult {
    pub fn tokens(&self) -> Vec<Token> {
        self.nodes.iter().map(|status| status.token).collect()
    }
}
