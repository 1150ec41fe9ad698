//! rmhb: random multihop token dissemination with version beaconing.
//!
//! Nodes on a lossy mesh keep one shared `(value, version)` token in sync.
//! A source pushes new versions along a random walk of neighbors and
//! periodic version beacons let stragglers (including nodes that lost
//! power and restarted empty) pull the latest token back.
pub mod cli;
pub mod error;
pub mod node;
pub mod settings;
pub mod sim;
pub mod transport;
