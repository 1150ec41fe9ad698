use std::fmt;

use crate::settings::NodeRole;

/// Main error type for an rmhb node
#[derive(Debug)]
pub enum RmhbError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Transport layer errors
    Transport(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Wire encoding/decoding errors
    Codec(CodecError),

    /// Operator actions the protocol refuses in its current state
    Protocol(ProtocolError),

    /// Controller channels closed or dropped
    Concurrency(String),
}

/// Wire codec errors
#[derive(Debug)]
pub enum CodecError {
    Encode(bincode::error::EncodeError),
    Decode(bincode::error::DecodeError),
    /// A datagram decoded cleanly but carried extra bytes after the message
    TrailingBytes { expected: usize, actual: usize },
}

/// Protocol-level refusals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Only a Source may originate a new token value
    NotSource(NodeRole),
    /// The version counter cannot advance without wrapping
    VersionExhausted,
    /// The radio is down while a restart is pending
    PoweredDown,
    /// A restart is already scheduled
    RestartPending,
}

impl fmt::Display for RmhbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RmhbError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RmhbError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RmhbError::Io(err) => write!(f, "I/O error: {}", err),
            RmhbError::Codec(err) => write!(f, "Codec error: {}", err),
            RmhbError::Protocol(err) => write!(f, "Protocol error: {}", err),
            RmhbError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(err) => write!(f, "encode: {}", err),
            CodecError::Decode(err) => write!(f, "decode: {}", err),
            CodecError::TrailingBytes { expected, actual } => write!(
                f,
                "trailing bytes: message is {} bytes, datagram is {}",
                expected, actual
            ),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NotSource(role) => {
                write!(f, "node is a {} and cannot originate data", role)
            }
            ProtocolError::VersionExhausted => write!(f, "token version counter exhausted"),
            ProtocolError::PoweredDown => write!(f, "node is powered down"),
            ProtocolError::RestartPending => write!(f, "a restart is already scheduled"),
        }
    }
}

impl std::error::Error for RmhbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RmhbError::Io(err) => Some(err),
            RmhbError::Codec(err) => Some(err),
            RmhbError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(err) => Some(err),
            CodecError::Decode(err) => Some(err),
            CodecError::TrailingBytes { .. } => None,
        }
    }
}

impl std::error::Error for ProtocolError {}

pub type Result<T> = std::result::Result<T, RmhbError>;

impl From<std::io::Error> for RmhbError {
    fn from(err: std::io::Error) -> Self {
        RmhbError::Io(err)
    }
}

impl From<CodecError> for RmhbError {
    fn from(err: CodecError) -> Self {
        RmhbError::Codec(err)
    }
}

impl From<bincode::error::EncodeError> for RmhbError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RmhbError::Codec(CodecError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for RmhbError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RmhbError::Codec(CodecError::Decode(err))
    }
}

impl From<ProtocolError> for RmhbError {
    fn from(err: ProtocolError) -> Self {
        RmhbError::Protocol(err)
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::RmhbError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RmhbError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::RmhbError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RmhbError::Transport(format!($fmt, $($arg)*))
    };
}
