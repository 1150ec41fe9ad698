//! UDP Transport Implementation
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{error, info};

use super::stats::{FrozenTransportStats, TransportStats};
use super::Transport;
use crate::error::{RmhbError, Result};
use crate::node::Message;
use crate::settings::TransportConfig;
use crate::transport_error;

/// Where "everyone in range" is
#[derive(Clone, Debug, PartialEq, Eq)]
enum BroadcastTarget {
    Group(SocketAddr),
    Peers(Vec<SocketAddr>),
}

#[derive(Clone, Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    broadcast: BroadcastTarget,
    stats: Arc<TransportStats>,
}

impl UdpTransport {
    /// Bind the node socket and join the multicast group, if one is configured
    pub async fn bind(config: &TransportConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen)
            .await
            .map_err(|e| transport_error!("Socket bind to {} failed: {}", config.listen, e))?;
        let local_addr = socket.local_addr()?;

        let broadcast = match config.multicast_group {
            Some(IpAddr::V4(group)) => {
                let interface = match config.listen.ip() {
                    IpAddr::V4(ip) => ip,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };
                socket
                    .join_multicast_v4(group, interface)
                    .map_err(|e| transport_error!("Failed to join {}: {}", group, e))?;
                socket.set_multicast_loop_v4(false)?;
                BroadcastTarget::Group(SocketAddr::new(IpAddr::V4(group), local_addr.port()))
            }
            Some(IpAddr::V6(group)) => {
                socket
                    .join_multicast_v6(&group, 0)
                    .map_err(|e| transport_error!("Failed to join {}: {}", group, e))?;
                socket.set_multicast_loop_v6(false)?;
                BroadcastTarget::Group(SocketAddr::new(IpAddr::V6(group), local_addr.port()))
            }
            None => BroadcastTarget::Peers(config.peers.clone()),
        };

        match &broadcast {
            BroadcastTarget::Group(group) => {
                info!("UDP transport on {} using multicast group {}", local_addr, group)
            }
            BroadcastTarget::Peers(peers) => info!(
                "UDP transport on {} fanning out to {} peers: {:?}",
                local_addr,
                peers.len(),
                peers
            ),
        }

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            broadcast,
            stats: Arc::new(TransportStats::default()),
        })
    }

    /// The bound socket, shared with the receiver task
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn stats(&self) -> FrozenTransportStats {
        self.stats.freeze()
    }

    async fn send_bytes(&self, data: &[u8], to: SocketAddr) -> Result<()> {
        match self.socket.send_to(data, to).await {
            Ok(written) => {
                self.stats
                    .bytes_sent
                    .fetch_add(written as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                error!("[{}] Failed to send UDP data to {}: {}", self.local_addr, to, e);
                Err(RmhbError::Io(e))
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_unicast(&self, to: SocketAddr, message: &Message) -> Result<()> {
        let data = message.encode()?;
        self.send_bytes(&data, to).await?;
        self.stats.unicasts_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn send_multicast(&self, message: &Message) -> Result<()> {
        let data = message.encode()?;
        match &self.broadcast {
            BroadcastTarget::Group(group) => self.send_bytes(&data, *group).await?,
            BroadcastTarget::Peers(peers) => {
                // One unreachable peer shouldn't starve the rest
                let mut last_error = None;
                for peer in peers {
                    if let Err(e) = self.send_bytes(&data, *peer).await {
                        last_error = Some(e);
                    }
                }
                if let Some(e) = last_error {
                    return Err(e);
                }
            }
        }
        self.stats.multicasts_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    async fn listener() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn recv_message(socket: &UdpSocket) -> (Message, SocketAddr) {
        let mut buf = [0u8; 64];
        let (len, from) = timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .expect("Timed out waiting for datagram")
            .unwrap();
        (Message::decode(&buf[..len]).unwrap(), from)
    }

    #[tokio::test]
    async fn test_unicast_reaches_peer() {
        let (peer, peer_addr) = listener().await;
        let config = TransportConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            multicast_group: None,
            peers: vec![],
        };
        let transport = UdpTransport::bind(&config).await.unwrap();

        let message = Message::ControlRequest { version: 3 };
        transport.send_unicast(peer_addr, &message).await.unwrap();

        let (received, from) = recv_message(&peer).await;
        assert_eq!(received, message);
        assert_eq!(from, transport.local_addr());

        let stats = transport.stats();
        assert_eq!(stats.unicasts_sent, 1);
        assert_eq!(stats.bytes_sent, 6);
    }

    #[tokio::test]
    async fn test_multicast_fans_out_to_peers() {
        let (peer_a, addr_a) = listener().await;
        let (peer_b, addr_b) = listener().await;
        let config = TransportConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            multicast_group: None,
            peers: vec![addr_a, addr_b],
        };
        let transport = UdpTransport::bind(&config).await.unwrap();

        transport.send_multicast(&Message::Announce).await.unwrap();

        assert_eq!(recv_message(&peer_a).await.0, Message::Announce);
        assert_eq!(recv_message(&peer_b).await.0, Message::Announce);
        assert_eq!(transport.stats().multicasts_sent, 1);
    }

    #[tokio::test]
    async fn test_bind_failure_is_transport_error() {
        let (_held, taken) = listener().await;
        let config = TransportConfig {
            listen: taken,
            multicast_group: None,
            peers: vec![],
        };
        let result = UdpTransport::bind(&config).await;
        assert!(matches!(result, Err(RmhbError::Transport(_))));
    }
}
