//! Random-walk dissemination
//!
//! The source stamps a new version onto the token and hands it to one
//! random neighbor. Every non-sink node that receives `Data` keeps the
//! newer of the two tokens and passes its own copy to another random
//! neighbor. A sink absorbs the walk.
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info};

use super::messages::Message;
use super::token::{Acceptance, Token};
use super::{Node, Outbound};
use crate::error::{ProtocolError, Result};
use crate::settings::NodeRole;

impl Node {
    /// Originate a new token. With no explicit value the current value is
    /// incremented. Expired neighbors are swept before one is picked.
    pub fn begin_dissemination(
        &mut self,
        value: Option<i32>,
        now: Instant,
    ) -> Result<(Token, Vec<Outbound>)> {
        self.expire_neighbors(now);
        if self.is_powered_down() {
            return Err(ProtocolError::PoweredDown.into());
        }
        if self.role != NodeRole::Source {
            return Err(ProtocolError::NotSource(self.role).into());
        }
        let value = value.unwrap_or_else(|| self.token.value().wrapping_add(1));
        let version = self.token.local_begin(value)?;
        let token = self.token.token();
        info!(
            "[{}] Beginning dissemination of {} (v: {})",
            self.address, value, version
        );

        let mut outbound = Vec::new();
        let message = Message::Data {
            value,
            version,
            hops: 0,
        };
        match self.random_neighbor() {
            Some(to) => {
                self.stats.data_originated += 1;
                outbound.push(Outbound::Unicast { to, message });
            }
            None => {
                self.stats.forwards_without_neighbor += 1;
                info!("[{}] No neighbors yet, token kept locally", self.address);
            }
        }
        Ok((token, outbound))
    }

    pub(crate) fn on_data_received(
        &mut self,
        from: SocketAddr,
        value: i32,
        version: i16,
        hops: i32,
        outbound: &mut Vec<Outbound>,
    ) {
        self.stats.data_received += 1;
        let acceptance = self.token.accept_if_newer(value, version);
        debug!(
            "[{}] Data {} (v: {}, hops: {}) from {}: {:?}",
            self.address, value, version, hops, from, acceptance
        );
        if acceptance == Acceptance::Accepted && self.role == NodeRole::Sink {
            info!(
                "[{}] Sink received {} (v: {}) after {} hops",
                self.address, value, version, hops
            );
        }

        if !self.role.forwards_data() {
            self.stats.data_absorbed += 1;
            return;
        }
        let next_hops = hops.saturating_add(1);
        if self.settings.max_hops.is_some_and(|max| next_hops > max) {
            self.stats.data_absorbed += 1;
            debug!("[{}] Hop limit reached, walk ends here", self.address);
            return;
        }

        // Forward our own copy, which may be newer than what arrived
        let local = self.token.token();
        match self.random_neighbor() {
            Some(to) => {
                self.stats.data_forwarded += 1;
                outbound.push(Outbound::Unicast {
                    to,
                    message: Message::Data {
                        value: local.value,
                        version: local.version,
                        hops: next_hops,
                    },
                });
            }
            None => {
                self.stats.forwards_without_neighbor += 1;
                debug!("[{}] No neighbor to forward to", self.address);
            }
        }
    }

    fn random_neighbor(&mut self) -> Option<SocketAddr> {
        self.neighbors.pick_random(&mut self.rng).map(|e| e.address)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::RmhbError;
    use crate::node::Event;
    use crate::settings::ProtocolSettings;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 30001))
    }

    fn node_with_neighbors(role: NodeRole, neighbors: &[u8], now: Instant) -> Node {
        let settings = ProtocolSettings::default().with_role(role).with_seed(9);
        let mut node = Node::new(addr(1), settings);
        for n in neighbors {
            node.handle(
                Event::Inbound {
                    from: addr(*n),
                    message: Message::Announce,
                },
                now,
            );
        }
        node
    }

    fn data(value: i32, version: i16, hops: i32) -> Message {
        Message::Data {
            value,
            version,
            hops,
        }
    }

    #[test]
    fn test_source_begins_with_single_neighbor() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Source, &[2], now);
        let (token, out) = node.begin_dissemination(Some(42), now).unwrap();

        assert_eq!(token, Token { value: 42, version: 1 });
        assert_eq!(
            out,
            vec![Outbound::Unicast {
                to: addr(2),
                message: data(42, 1, 0)
            }]
        );
    }

    #[test]
    fn test_default_value_increments() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Source, &[2], now);
        node.begin_dissemination(Some(10), now).unwrap();
        let (token, _) = node.begin_dissemination(None, now).unwrap();
        assert_eq!(token, Token { value: 11, version: 2 });
    }

    #[test]
    fn test_begin_without_neighbors_keeps_token() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Source, &[], now);
        let (token, out) = node.begin_dissemination(Some(5), now).unwrap();
        assert!(out.is_empty());
        assert_eq!(token.version, 1);
        assert_eq!(node.stats().forwards_without_neighbor, 1);
    }

    #[test]
    fn test_only_source_may_begin() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Relay, &[2], now);
        let result = node.begin_dissemination(Some(1), now);
        assert!(matches!(
            result,
            Err(RmhbError::Protocol(ProtocolError::NotSource(NodeRole::Relay)))
        ));
        assert_eq!(node.token(), Token::default());
    }

    #[test]
    fn test_begin_skips_expired_neighbor() {
        let start = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Source, &[2], start);
        let later = start + node.settings().neighbor_timeout + Duration::from_millis(1);

        let (token, out) = node.begin_dissemination(Some(42), later).unwrap();
        assert_eq!(token, Token { value: 42, version: 1 });
        assert!(out.is_empty());
        assert!(node.neighbors().is_empty());
        assert_eq!(node.stats().neighbors_expired, 1);
        assert_eq!(node.stats().forwards_without_neighbor, 1);
    }

    #[test]
    fn test_begin_refused_while_down() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Source, &[2], now);
        node.schedule_restart(Duration::from_secs(1), now).unwrap();
        assert!(matches!(
            node.begin_dissemination(Some(1), now),
            Err(RmhbError::Protocol(ProtocolError::PoweredDown))
        ));
    }

    #[test]
    fn test_relay_accepts_and_forwards_with_hop() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Relay, &[3], now);
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(42, 1, 0),
            },
            now,
        );
        assert_eq!(node.token(), Token { value: 42, version: 1 });
        assert_eq!(
            out,
            vec![Outbound::Unicast {
                to: addr(3),
                message: data(42, 1, 1)
            }]
        );
    }

    #[test]
    fn test_relay_forwards_newer_local_copy() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Relay, &[3], now);
        node.handle(
            Event::Inbound {
                from: addr(2),
                message: Message::Recover {
                    value: 99,
                    version: 5,
                },
            },
            now,
        );
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(42, 1, 4),
            },
            now,
        );
        assert_eq!(node.token(), Token { value: 99, version: 5 });
        assert_eq!(out[0].message(), &data(99, 5, 5));
    }

    #[test]
    fn test_sink_absorbs() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Sink, &[2, 3], now);
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(42, 1, 3),
            },
            now,
        );
        assert!(out.is_empty());
        assert_eq!(node.token(), Token { value: 42, version: 1 });
        assert_eq!(node.stats().data_absorbed, 1);
    }

    #[test]
    fn test_relay_without_neighbors_drops_walk() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Relay, &[], now);
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(42, 1, 0),
            },
            now,
        );
        assert!(out.is_empty());
        assert_eq!(node.token().version, 1);
        assert_eq!(node.stats().forwards_without_neighbor, 1);
    }

    #[test]
    fn test_hop_counter_saturates() {
        let now = Instant::now();
        let mut node = node_with_neighbors(NodeRole::Relay, &[3], now);
        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(1, 1, i32::MAX),
            },
            now,
        );
        assert_eq!(out[0].message(), &data(1, 1, i32::MAX));
    }

    #[test]
    fn test_hop_limit_ends_walk() {
        let now = Instant::now();
        let mut settings = ProtocolSettings::default()
            .with_role(NodeRole::Relay)
            .with_seed(3);
        settings.max_hops = Some(4);
        let mut node = Node::new(addr(1), settings);
        node.handle(
            Event::Inbound {
                from: addr(3),
                message: Message::Announce,
            },
            now,
        );

        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(1, 1, 3),
            },
            now,
        );
        assert_eq!(out.len(), 1);

        let out = node.handle(
            Event::Inbound {
                from: addr(2),
                message: data(1, 2, 4),
            },
            now,
        );
        assert!(out.is_empty());
        assert_eq!(node.token().version, 2);
    }
}
