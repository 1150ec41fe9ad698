//! UDP Receiver
//!
//! Reads datagrams off the node socket and hands them to the controller
//! over a channel. Decoding happens in the node, not here.
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::stats::ReceiverStats;
use super::Datagram;

/// Anything longer than a protocol message is junk, but read enough of it
/// that the decoder sees it is too long rather than a truncated message.
const MAX_DATAGRAM_SIZE: usize = 512;

pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
    stats: Arc<ReceiverStats>,
}

impl UdpReceiver {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            stats: Arc::new(ReceiverStats::default()),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Shared counters; remain readable after `spawn` consumes the receiver
    pub fn stats_handle(&self) -> Arc<ReceiverStats> {
        Arc::clone(&self.stats)
    }

    /// Start the receive loop. It ends when the channel's receiver is dropped.
    pub fn spawn(self, datagram_tx: mpsc::Sender<Datagram>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match self.socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
                        let datagram = Datagram {
                            from,
                            data: Bytes::copy_from_slice(&buf[..len]),
                        };
                        if datagram_tx.send(datagram).await.is_err() {
                            info!("Datagram channel closed, stopping receiver");
                            break;
                        }
                    }
                    Err(e) => {
                        self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                        error!("UDP receive error: {}", e);
                    }
                }
            }
            debug!("UDP receiver exited");
        })
    }
}
