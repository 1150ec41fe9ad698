//! UDP Transport
//!
//! One UDP socket per node carries everything: unicast replies and data
//! hops go straight to the peer, while announces and beacons go to every
//! radio neighbor. On a real link-local segment that means an IP multicast
//! group; without one, the "broadcast" fans out to a static peer list.
pub mod receiver;
pub mod stats;
pub mod udp;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::node::Message;
pub use receiver::UdpReceiver;
pub use stats::{FrozenReceiverStats, FrozenTransportStats, ReceiverStats, TransportStats};
pub use udp::UdpTransport;

/// A raw datagram as it came off the socket
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub from: SocketAddr,
    pub data: Bytes,
}

/// Sending half of a node's link layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send to exactly one peer
    async fn send_unicast(&self, to: SocketAddr, message: &Message) -> Result<()>;

    /// Send to every neighbor in radio range
    async fn send_multicast(&self, message: &Message) -> Result<()>;

    /// Address peers see this node as
    fn local_addr(&self) -> SocketAddr;
}
