//! Neighbor soft-state
//!
//! A bounded table of peers heard from recently. Entries are created and
//! refreshed by `Announce` messages and disappear once their expiry passes
//! without a refresh. The table never evicts to make room: when it is full
//! a new announcer is simply not recorded.
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

/// One known peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborEntry {
    pub address: SocketAddr,
    pub expiry: Instant,
}

/// What an announcement did to the table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnounceOutcome {
    Inserted,
    Refreshed,
    /// Table at capacity, announcer not recorded
    Dropped,
}

#[derive(Clone, Debug)]
pub struct NeighborTable {
    entries: Vec<NeighborEntry>,
    capacity: usize,
    timeout: Duration,
}

impl NeighborTable {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            timeout,
        }
    }

    /// Record an announcement from `sender` heard at `now`
    pub fn on_announce(&mut self, sender: SocketAddr, now: Instant) -> AnnounceOutcome {
        let expiry = now + self.timeout;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.address == sender) {
            entry.expiry = expiry;
            return AnnounceOutcome::Refreshed;
        }
        if self.entries.len() >= self.capacity {
            return AnnounceOutcome::Dropped;
        }
        self.entries.push(NeighborEntry {
            address: sender,
            expiry,
        });
        AnnounceOutcome::Inserted
    }

    /// Remove and return every entry whose expiry has passed
    pub fn expire_due(&mut self, now: Instant) -> Vec<NeighborEntry> {
        let mut expired = Vec::new();
        self.entries.retain(|entry| {
            if entry.expiry <= now {
                expired.push(*entry);
                false
            } else {
                true
            }
        });
        expired
    }

    /// Uniformly pick one live entry
    pub fn pick_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&NeighborEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        self.entries.get(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.entries.iter().any(|e| &e.address == address)
    }

    pub fn get(&self, address: &SocketAddr) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| &e.address == address)
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.entries.iter().map(|e| e.address).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
