//! Wire Message Protocol
//!
//! Every message is a fixed-size record: a 4-byte big-endian variant tag
//! followed by fixed-width big-endian fields. The tag is decoded first and
//! selects how the remaining bytes are read.
//!
//! | Tag | Variant          | Size |
//! |-----|------------------|------|
//! | 0   | `Announce`       | 4    |
//! | 1   | `Data`           | 14   |
//! | 2   | `VersionBeacon`  | 6    |
//! | 3   | `ControlRequest` | 6    |
//! | 4   | `Recover`        | 10   |
use bincode::config::Config;
use bincode::{Decode, Encode};

use crate::error::{CodecError, Result};

/// Largest encoded message; receive buffers are sized from this.
pub const MAX_MESSAGE_SIZE: usize = 14;

fn wire_config() -> impl Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Protocol messages exchanged between neighboring nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Decode, Encode)]
pub enum Message {
    /// Neighbor discovery beacon; the sender address is the payload
    Announce,

    /// Token relayed hop by hop
    Data { value: i32, version: i16, hops: i32 },

    /// Periodic advertisement of the sender's token version
    VersionBeacon { version: i16 },

    /// Pull request from a node that found itself behind
    ControlRequest { version: i16 },

    /// Full token pushed to a stale peer
    Recover { value: i32, version: i16 },
}

impl Message {
    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, wire_config())?)
    }

    /// Decode one datagram. The datagram must contain exactly one message.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (message, consumed): (Message, usize) =
            bincode::decode_from_slice(data, wire_config())?;
        if consumed != data.len() {
            return Err(CodecError::TrailingBytes {
                expected: consumed,
                actual: data.len(),
            }
            .into());
        }
        Ok(message)
    }

    /// Short name for logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Announce => "announce",
            Message::Data { .. } => "data",
            Message::VersionBeacon { .. } => "beacon",
            Message::ControlRequest { .. } => "control",
            Message::Recover { .. } => "recover",
        }
    }
}
