use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Version a node holds before it has seen any data
pub const INITIAL_VERSION: i16 = 0;
pub const INITIAL_VALUE: i32 = 0;

/// The replicated datum and its logical clock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: i32,
    pub version: i16,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            value: INITIAL_VALUE,
            version: INITIAL_VERSION,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    /// Candidate version was not strictly newer; nothing changed
    Stale,
}

/// Volatile token storage with last-writer-wins updates
#[derive(Clone, Debug, Default)]
pub struct TokenStore {
    token: Token,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn value(&self) -> i32 {
        self.token.value
    }

    pub fn version(&self) -> i16 {
        self.token.version
    }

    /// Originate a new value one version ahead of the current one.
    /// Versions compare as plain signed integers, so the counter stops at
    /// `i16::MAX` rather than wrapping to a value every peer would reject.
    pub fn local_begin(&mut self, value: i32) -> Result<i16, ProtocolError> {
        let version = self
            .token
            .version
            .checked_add(1)
            .ok_or(ProtocolError::VersionExhausted)?;
        self.token = Token { value, version };
        Ok(version)
    }

    pub fn accept_if_newer(&mut self, value: i32, version: i16) -> Acceptance {
        if version > self.token.version {
            self.token = Token { value, version };
            Acceptance::Accepted
        } else {
            Acceptance::Stale
        }
    }

    /// Forget everything, as after a power loss
    pub fn reset_on_restart(&mut self) {
        self.token = Token::default();
    }
}
