//! Radio connectivity between simulated nodes.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::event::NodeIndex;

/// Properties of the link between two nodes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Link {
    /// Packet loss rate (0.0 to 1.0)
    pub loss_rate: f64,
}

/// Shape of a generated topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    Line,
    Ring,
    Grid,
    Full,
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyKind::Line => write!(f, "line"),
            TopologyKind::Ring => write!(f, "ring"),
            TopologyKind::Grid => write!(f, "grid"),
            TopologyKind::Full => write!(f, "full"),
        }
    }
}

impl FromStr for TopologyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "line" => Ok(TopologyKind::Line),
            "ring" => Ok(TopologyKind::Ring),
            "grid" => Ok(TopologyKind::Grid),
            "full" => Ok(TopologyKind::Full),
            _ => Err(format!("Invalid topology: {}", s)),
        }
    }
}

/// Undirected links between nodes `0..node_count`
#[derive(Debug, Clone)]
pub struct Topology {
    node_count: usize,
    // Ordered so neighbor lists, and therefore runs, are reproducible
    links: BTreeMap<(NodeIndex, NodeIndex), Link>,
    delay: Duration,
}

impl Topology {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            links: BTreeMap::new(),
            delay: Duration::from_millis(5),
        }
    }

    pub fn build(kind: TopologyKind, node_count: usize) -> Self {
        match kind {
            TopologyKind::Line => Self::line(node_count),
            TopologyKind::Ring => Self::ring(node_count),
            TopologyKind::Grid => Self::grid(node_count),
            TopologyKind::Full => Self::full(node_count),
        }
    }

    /// Each node hears only its predecessor and successor
    pub fn line(node_count: usize) -> Self {
        let mut topo = Self::new(node_count);
        for i in 1..node_count {
            topo.add_link(i - 1, i);
        }
        topo
    }

    pub fn ring(node_count: usize) -> Self {
        let mut topo = Self::line(node_count);
        if node_count > 2 {
            topo.add_link(node_count - 1, 0);
        }
        topo
    }

    /// Nodes laid out row by row on the smallest square that fits them,
    /// linked to their horizontal and vertical neighbors
    pub fn grid(node_count: usize) -> Self {
        let mut topo = Self::new(node_count);
        let width = (1..).find(|w| w * w >= node_count).unwrap_or(1);
        for i in 0..node_count {
            if (i + 1) % width != 0 && i + 1 < node_count {
                topo.add_link(i, i + 1);
            }
            if i + width < node_count {
                topo.add_link(i, i + width);
            }
        }
        topo
    }

    pub fn full(node_count: usize) -> Self {
        let mut topo = Self::new(node_count);
        for a in 0..node_count {
            for b in (a + 1)..node_count {
                topo.add_link(a, b);
            }
        }
        topo
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.set_loss_rate(rate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn add_link(&mut self, a: NodeIndex, b: NodeIndex) {
        if a != b {
            self.links.insert(Self::canonical_pair(a, b), Link::default());
        }
    }

    pub fn get_link(&self, a: NodeIndex, b: NodeIndex) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn is_linked(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.links.contains_key(&Self::canonical_pair(a, b))
    }

    /// Nodes within radio range of `node`, in index order
    pub fn neighbors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut result: Vec<NodeIndex> = self
            .links
            .keys()
            .filter_map(|&(a, b)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    pub fn set_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    /// Whether every node not marked down can still reach every other
    pub fn is_connected_without(&self, down: &[bool]) -> bool {
        let is_down = |i: NodeIndex| down.get(i).copied().unwrap_or(false);
        let Some(start) = (0..self.node_count).find(|&i| !is_down(i)) else {
            return true;
        };
        let mut visited = vec![false; self.node_count];
        visited[start] = true;
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for next in self.neighbors(current) {
                if !visited[next] && !is_down(next) {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
        (0..self.node_count).all(|i| is_down(i) || visited[i])
    }

    fn canonical_pair(a: NodeIndex, b: NodeIndex) -> (NodeIndex, NodeIndex) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
