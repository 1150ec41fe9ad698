//! Simulation events and their priority queue ordering.
use std::cmp::Ordering;
use std::net::SocketAddr;
use std::time::Duration;

use crate::settings::NodeRole;

/// Position of a node in the simulator
pub type NodeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Announce,
    Beacon,
    Restart,
}

/// Things an experiment can make happen at a chosen time
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    /// Originate a token at a source node
    Begin { node: NodeIndex, value: Option<i32> },
    /// Power a node down; it cold-starts after `recovery`
    Crash { node: NodeIndex, recovery: Duration },
    SetRole { node: NodeIndex, role: NodeRole },
    /// Loss rate applied to every link from now on
    SetLossRate { rate: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Deliver {
        to: NodeIndex,
        from: SocketAddr,
        data: Vec<u8>,
    },
    /// Timers carry the generation they were armed in; a restart bumps it
    Timer {
        node: NodeIndex,
        kind: TimerKind,
        generation: u64,
    },
    FailureTick,
    Action(ScenarioAction),
}

/// An event with its firing time. `seq` breaks ties in scheduling order.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Duration,
    pub seq: u64,
    pub event: SimEvent,
}

impl ScheduledEvent {
    pub fn new(time: Duration, seq: u64, event: SimEvent) -> Self {
        Self { time, seq, event }
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so BinaryHeap pops the earliest event first
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    #[test]
    fn test_earliest_event_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(ScheduledEvent::new(
            Duration::from_secs(10),
            0,
            SimEvent::FailureTick,
        ));
        heap.push(ScheduledEvent::new(
            Duration::from_secs(5),
            1,
            SimEvent::FailureTick,
        ));
        assert_eq!(heap.pop().unwrap().time, Duration::from_secs(5));
    }

    #[test]
    fn test_same_time_keeps_scheduling_order() {
        let mut heap = BinaryHeap::new();
        for seq in [3, 1, 2] {
            heap.push(ScheduledEvent::new(
                Duration::from_secs(1),
                seq,
                SimEvent::FailureTick,
            ));
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
