//! Operator commands delivered to a running node controller.
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::stats::NodeStatus;
use super::token::Token;
use crate::error::{RmhbError, Result};
use crate::settings::NodeRole;

/// Requests handled on the controller's event loop, each with a reply channel
#[derive(Debug)]
pub enum NodeCommand {
    /// Originate a new token; `None` increments the current value
    BeginDissemination {
        value: Option<i32>,
        resp_chan: oneshot::Sender<Result<Token>>,
    },
    SetRole {
        role: NodeRole,
        resp_chan: oneshot::Sender<Result<()>>,
    },
    /// Power down now and cold-start after `delay`
    ScheduleRestart {
        delay: Duration,
        resp_chan: oneshot::Sender<Result<()>>,
    },
    GetStatus {
        resp_chan: oneshot::Sender<NodeStatus>,
    },
}

/// Cloneable handle for sending commands to a node controller
#[derive(Clone, Debug)]
pub struct NodeHandle {
    command_tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<NodeCommand>) {
        let (command_tx, command_rx) = mpsc::channel(buffer);
        (Self { command_tx }, command_rx)
    }

    pub async fn begin_dissemination(&self, value: Option<i32>) -> Result<Token> {
        let (resp_chan, rx) = oneshot::channel();
        self.send(NodeCommand::BeginDissemination { value, resp_chan })
            .await?;
        Self::receive(rx).await?
    }

    pub async fn set_role(&self, role: NodeRole) -> Result<()> {
        let (resp_chan, rx) = oneshot::channel();
        self.send(NodeCommand::SetRole { role, resp_chan }).await?;
        Self::receive(rx).await?
    }

    pub async fn schedule_restart(&self, delay: Duration) -> Result<()> {
        let (resp_chan, rx) = oneshot::channel();
        self.send(NodeCommand::ScheduleRestart { delay, resp_chan })
            .await?;
        Self::receive(rx).await?
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (resp_chan, rx) = oneshot::channel();
        self.send(NodeCommand::GetStatus { resp_chan }).await?;
        Self::receive(rx).await
    }

    async fn send(&self, command: NodeCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| RmhbError::Concurrency(format!("Node controller stopped: {}", e)))
    }

    async fn receive<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|e| RmhbError::Concurrency(format!("Response channel dropped: {}", e)))
    }
}
