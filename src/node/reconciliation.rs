//! Version reconciliation
//!
//! Neighbors compare versions through periodic beacons. The side holding
//! the newer token pushes it with `Recover`; the side that is behind asks
//! for it with `ControlRequest`. Nothing happens when versions agree.
use std::cmp::Ordering;
use std::net::SocketAddr;

use tracing::debug;

use super::messages::Message;
use super::token::Acceptance;
use super::{Node, Outbound};

impl Node {
    pub(crate) fn on_version_beacon(
        &mut self,
        from: SocketAddr,
        version: i16,
        outbound: &mut Vec<Outbound>,
    ) {
        let local = self.token.token();
        match local.version.cmp(&version) {
            Ordering::Equal => {}
            Ordering::Greater => {
                debug!(
                    "[{}] {} is behind (v: {} < {}), pushing recover",
                    self.address, from, version, local.version
                );
                self.stats.recovers_sent += 1;
                outbound.push(Outbound::Unicast {
                    to: from,
                    message: Message::Recover {
                        value: local.value,
                        version: local.version,
                    },
                });
            }
            Ordering::Less => {
                debug!(
                    "[{}] Behind {} (v: {} < {}), requesting control",
                    self.address, from, local.version, version
                );
                self.stats.controls_sent += 1;
                outbound.push(Outbound::Unicast {
                    to: from,
                    message: Message::ControlRequest {
                        version: local.version,
                    },
                });
            }
        }
    }

    /// Always answer; the requester discards a reply that is not newer
    pub(crate) fn on_control_request(
        &mut self,
        from: SocketAddr,
        version: i16,
        outbound: &mut Vec<Outbound>,
    ) {
        let local = self.token.token();
        debug!(
            "[{}] Control request from {} (v: {}), answering with v: {}",
            self.address, from, version, local.version
        );
        self.stats.recovers_sent += 1;
        outbound.push(Outbound::Unicast {
            to: from,
            message: Message::Recover {
                value: local.value,
                version: local.version,
            },
        });
    }

    pub(crate) fn on_recover(&mut self, from: SocketAddr, value: i32, version: i16) -> Acceptance {
        let acceptance = self.token.accept_if_newer(value, version);
        match acceptance {
            Acceptance::Accepted => {
                self.stats.recovers_accepted += 1;
                debug!(
                    "[{}] Recovered {} (v: {}) from {}",
                    self.address, value, version, from
                );
            }
            Acceptance::Stale => {
                self.stats.recovers_rejected += 1;
            }
        }
        acceptance
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::node::{Event, Token};
    use crate::settings::{NodeRole, ProtocolSettings};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 30001))
    }

    fn node_at(version: i16, value: i32) -> Node {
        let settings = ProtocolSettings::default()
            .with_role(NodeRole::Relay)
            .with_seed(5);
        let mut node = Node::new(addr(1), settings);
        if version > 0 {
            node.on_recover(addr(9), value, version);
        }
        node
    }

    fn inbound(from: SocketAddr, message: Message) -> Event {
        Event::Inbound { from, message }
    }

    #[test]
    fn test_equal_versions_stay_quiet() {
        let mut node = node_at(3, 7);
        let out = node.handle(
            inbound(addr(2), Message::VersionBeacon { version: 3 }),
            Instant::now(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_newer_node_pushes_recover() {
        let mut node = node_at(5, 42);
        let out = node.handle(
            inbound(addr(2), Message::VersionBeacon { version: 3 }),
            Instant::now(),
        );
        assert_eq!(
            out,
            vec![Outbound::Unicast {
                to: addr(2),
                message: Message::Recover {
                    value: 42,
                    version: 5
                }
            }]
        );
    }

    #[test]
    fn test_stale_node_requests_control() {
        let mut node = node_at(3, 7);
        let out = node.handle(
            inbound(addr(2), Message::VersionBeacon { version: 5 }),
            Instant::now(),
        );
        assert_eq!(
            out,
            vec![Outbound::Unicast {
                to: addr(2),
                message: Message::ControlRequest { version: 3 }
            }]
        );
    }

    #[test]
    fn test_control_request_always_answered() {
        // Even when the requester claims to be newer
        let mut node = node_at(2, 11);
        let out = node.handle(
            inbound(addr(2), Message::ControlRequest { version: 8 }),
            Instant::now(),
        );
        assert_eq!(
            out,
            vec![Outbound::Unicast {
                to: addr(2),
                message: Message::Recover {
                    value: 11,
                    version: 2
                }
            }]
        );
    }

    #[test]
    fn test_recover_is_last_writer_wins() {
        let mut node = node_at(3, 7);
        assert_eq!(node.on_recover(addr(2), 8, 3), Acceptance::Stale);
        assert_eq!(node.on_recover(addr(2), 9, 4), Acceptance::Accepted);
        assert_eq!(node.on_recover(addr(2), 1, 1), Acceptance::Stale);
        assert_eq!(node.token(), Token { value: 9, version: 4 });
        assert_eq!(node.stats().recovers_accepted, 2);
        assert_eq!(node.stats().recovers_rejected, 2);
    }

    #[test]
    fn test_beacon_exchange_converges_pair() {
        let now = Instant::now();
        let mut ahead = node_at(6, 60);
        let mut behind = Node::new(
            addr(2),
            ProtocolSettings::default()
                .with_role(NodeRole::Relay)
                .with_seed(6),
        );

        // Behind hears the beacon and asks; ahead answers
        let beacon = ahead.handle(Event::BeaconTimer, now);
        let request = behind.handle(inbound(addr(1), *beacon[0].message()), now);
        let reply = ahead.handle(inbound(addr(2), *request[0].message()), now);
        behind.handle(inbound(addr(1), *reply[0].message()), now);

        assert_eq!(behind.token(), ahead.token());
    }
}
