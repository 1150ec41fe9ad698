//! Node controller: drives a [`Node`] from real sockets and real timers.
//!
//! All state changes happen on one task. Inbound datagrams, operator
//! commands and timer expiries are serialized by a biased `select!` so
//! each event runs to completion before the next is looked at.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::commands::NodeCommand;
use super::{Event, Node, Outbound};
use crate::transport::{Datagram, Transport};

pub struct NodeController<T: Transport> {
    node: Node,
    transport: Arc<T>,
}

impl<T: Transport> std::fmt::Debug for NodeController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeController")
            .field("node", &self.node)
            .field("local_addr", &self.transport.local_addr())
            .finish()
    }
}

impl<T: Transport> NodeController<T> {
    pub fn new(node: Node, transport: Arc<T>) -> Self {
        Self { node, transport }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Run the event loop until the datagram channel closes, then hand back
    /// the node's final state.
    pub async fn start(
        mut self,
        mut datagram_rx: mpsc::Receiver<Datagram>,
        mut command_rx: mpsc::Receiver<NodeCommand>,
    ) -> Node {
        let address = self.node.address();
        let settings = self.node.settings().clone();
        info!(
            "[{}] Starting event loop (first announce in {}ms)",
            address,
            settings.initial_announce_delay.as_millis()
        );

        let started = Instant::now();
        let mut announce_timer = time::interval_at(
            started + settings.initial_announce_delay,
            settings.announce_period,
        );
        let mut beacon_timer =
            time::interval_at(started + settings.beacon_period, settings.beacon_period);
        announce_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        beacon_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            let restart_at = self.node.restart_deadline().map(Instant::from_std);
            tokio::select! {
                biased;

                maybe_datagram = datagram_rx.recv() => match maybe_datagram {
                    Some(datagram) => {
                        let outbound =
                            self.node
                                .handle_datagram(datagram.from, &datagram.data, now());
                        self.dispatch(outbound).await;
                    }
                    None => {
                        info!("[{}] Datagram channel closed, exiting", address);
                        break;
                    }
                },

                maybe_cmd = command_rx.recv(), if commands_open => match maybe_cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("[{}] Command channel closed", address);
                        commands_open = false;
                    }
                },

                _ = announce_timer.tick() => {
                    let outbound = self.node.handle(Event::AnnounceTimer, now());
                    self.dispatch(outbound).await;
                }

                _ = beacon_timer.tick() => {
                    let outbound = self.node.handle(Event::BeaconTimer, now());
                    self.dispatch(outbound).await;
                }

                _ = time::sleep_until(restart_at.unwrap_or_else(Instant::now)), if restart_at.is_some() => {
                    let outbound = self.node.handle(Event::RestartTimer, now());
                    self.dispatch(outbound).await;
                    // A cold start runs the boot schedule again
                    let restarted = Instant::now();
                    announce_timer.reset_at(restarted + settings.initial_announce_delay);
                    beacon_timer.reset_at(restarted + settings.beacon_period);
                }
            }
        }
        self.node
    }

    /// Commands are loop iterations too: the neighbor sweep runs first so
    /// replies never show an expired neighbor.
    async fn handle_command(&mut self, cmd: NodeCommand) {
        let address = self.node.address();
        let now = now();
        self.node.expire_neighbors(now);
        match cmd {
            NodeCommand::BeginDissemination { value, resp_chan } => {
                let result = match self.node.begin_dissemination(value, now) {
                    Ok((token, outbound)) => {
                        self.dispatch(outbound).await;
                        Ok(token)
                    }
                    Err(e) => {
                        warn!("[{}] Refused to begin dissemination: {}", address, e);
                        Err(e)
                    }
                };
                if resp_chan.send(result).is_err() {
                    error!("[{}] Failed sending oneshot begin response", address);
                }
            }
            NodeCommand::SetRole { role, resp_chan } => {
                self.node.set_role(role);
                if resp_chan.send(Ok(())).is_err() {
                    error!("[{}] Failed sending oneshot set_role response", address);
                }
            }
            NodeCommand::ScheduleRestart { delay, resp_chan } => {
                let result = self.node.schedule_restart(delay, now).map(|_| ());
                if resp_chan.send(result).is_err() {
                    error!("[{}] Failed sending oneshot restart response", address);
                }
            }
            NodeCommand::GetStatus { resp_chan } => {
                if resp_chan.send(self.node.status()).is_err() {
                    error!("[{}] Failed sending oneshot status response", address);
                }
            }
        }
    }

    /// Perform sends in order. Failures are logged and otherwise ignored;
    /// the protocol recovers lost messages through beacons.
    async fn dispatch(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            let result = match &out {
                Outbound::Unicast { to, message } => {
                    self.transport.send_unicast(*to, message).await
                }
                Outbound::Multicast(message) => self.transport.send_multicast(message).await,
            };
            if let Err(e) = result {
                warn!(
                    "[{}] Failed to send {}: {}",
                    self.node.address(),
                    out.message().kind(),
                    e
                );
            }
        }
    }
}

/// Event timestamps come from tokio's clock so paused-time tests stay exact
fn now() -> std::time::Instant {
    Instant::now().into_std()
}
