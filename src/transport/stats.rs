use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Send-side counters, shared with whoever holds the transport
#[derive(Debug, Default)]
pub struct TransportStats {
    pub unicasts_sent: AtomicU64,
    pub multicasts_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
}

impl TransportStats {
    pub fn freeze(&self) -> FrozenTransportStats {
        FrozenTransportStats {
            unicasts_sent: self.unicasts_sent.load(Ordering::Relaxed),
            multicasts_sent: self.multicasts_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenTransportStats {
    pub unicasts_sent: u64,
    pub multicasts_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub datagrams_received: AtomicU64,
    pub receive_errors: AtomicU64,
}

impl ReceiverStats {
    pub fn freeze(&self) -> FrozenReceiverStats {
        FrozenReceiverStats {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenReceiverStats {
    pub datagrams_received: u64,
    pub receive_errors: u64,
}
