// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::gossip::{Dissemination, FloodDissemination, RoutingTable, SeenCache, Transport};
use log::{debug, trace};
use peerlake_common::error::LakeError;
use peerlake_common::state::{GossipMessage, MessageBody, RouteAdvert, RoutingEntry};
use peerlake_common::utils::LocalTime;
use peerlake_common::LakeResult;

/// What the node should do with a received message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Duplicate,
    // Addressed to another node and passed on.
    Forwarded,
    // Fully handled by the router.
    Consumed,
    Local(GossipMessage),
}

/// Message dedup, relaying and the routing table of one node.
pub struct GossipRouter {
    local_id: String,
    seen: SeenCache,
    routes: RoutingTable,
    dissemination: Box<dyn Dissemination>,
}

impl GossipRouter {
    pub fn new(local_id: impl Into<String>, cache_size: usize) -> Self {
        Self::with_dissemination(local_id, cache_size, Box::new(FloodDissemination))
    }

    pub fn with_dissemination(
        local_id: impl Into<String>,
        cache_size: usize,
        dissemination: Box<dyn Dissemination>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            seen: SeenCache::new(cache_size),
            routes: RoutingTable::new(),
            dissemination,
        }
    }

    pub fn receive(
        &mut self,
        transport: &mut dyn Transport,
        msg: GossipMessage,
        from: &str,
    ) -> Delivery {
        if let Some(id) = &msg.message_id {
            if !self.seen.insert(id, LocalTime::mills()) {
                trace!("drop duplicate message {}", msg);
                return Delivery::Duplicate;
            }
        }

        if let Some(destination) = msg.destination.as_deref() {
            if destination != self.local_id {
                self.forward(transport, &msg, from);
                return Delivery::Forwarded;
            }
        } else if msg.relay && msg.message_id.is_some() {
            self.dissemination
                .disseminate(transport, &msg, Some(from));
        }

        if let MessageBody::RouteDiscovery { routes } = &msg.body {
            self.handle_route_discovery(from, routes, LocalTime::mills());
            return Delivery::Consumed;
        }

        Delivery::Local(msg)
    }

    fn forward(&mut self, transport: &mut dyn Transport, msg: &GossipMessage, from: &str) {
        let destination = msg.destination.as_deref().unwrap_or("");
        match self.routes.next_hop(destination) {
            Some(hop) if hop != from => {
                let hop = hop.to_string();
                if transport.send_to(&hop, msg).is_ok() {
                    return;
                }
            }
            _ => (),
        }

        let sent = self.dissemination.disseminate(transport, msg, Some(from));
        debug!("flooded {} towards {} to {} peers", msg, destination, sent);
    }

    /// Learns the routes advertised by `from`.
    pub fn handle_route_discovery(&mut self, from: &str, routes: &[RouteAdvert], now: u64) {
        for advert in routes {
            if advert.node_id == self.local_id || from == self.local_id {
                continue;
            }
            self.routes.upsert(RoutingEntry {
                destination: advert.node_id.clone(),
                next_hop: from.to_string(),
                hop_count: advert.hop_count.max(1),
                last_updated_at: now,
            });
        }
    }

    /// Registers `peer` as a direct neighbour and advertises our routes to it.
    pub fn update_route(&mut self, transport: &mut dyn Transport, peer: &str) {
        self.routes.set_direct(peer, LocalTime::mills());
        let routes = self.routes.adverts_for(peer);
        let msg = GossipMessage::new(&self.local_id, MessageBody::RouteDiscovery { routes });
        if let Err(e) = transport.send_to(peer, &msg) {
            debug!("route discovery to {} failed: {}", peer, e);
        }
    }

    pub fn remove_routes(&mut self, peer: &str) -> Vec<String> {
        self.routes.remove_via(peer)
    }

    /// Sends `msg` to `node` through its recorded next hop.
    pub fn send_directed(
        &mut self,
        transport: &mut dyn Transport,
        node: &str,
        msg: GossipMessage,
    ) -> LakeResult<()> {
        let hop = match self.routes.next_hop(node) {
            Some(v) => v.to_string(),
            None => return Err(LakeError::RouteNotFound(node.to_string())),
        };

        let mut msg = msg.with_id();
        if msg.destination.is_none() {
            msg.destination = Some(node.to_string());
        }
        if let Some(id) = &msg.message_id {
            self.seen.insert(id, LocalTime::mills());
        }
        transport.send_to(&hop, &msg)
    }

    /// Floods `msg` to every direct peer but `exclude`, returns the number of peers reached.
    pub fn broadcast(
        &mut self,
        transport: &mut dyn Transport,
        msg: GossipMessage,
        exclude: Option<&str>,
    ) -> usize {
        let msg = msg.with_id();
        if let Some(id) = &msg.message_id {
            self.seen.insert(id, LocalTime::mills());
        }
        self.dissemination.disseminate(transport, &msg, exclude)
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlake_common::state::DatasetAnnouncement;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockTransport {
        peers: Vec<String>,
        sent: HashMap<String, Vec<GossipMessage>>,
    }

    impl MockTransport {
        fn with_peers(peers: &[&str]) -> Self {
            Self {
                peers: peers.iter().map(|v| v.to_string()).collect(),
                sent: HashMap::new(),
            }
        }

        fn count(&self, peer: &str) -> usize {
            self.sent.get(peer).map(|v| v.len()).unwrap_or(0)
        }
    }

    impl Transport for MockTransport {
        fn send_to(&mut self, peer: &str, msg: &GossipMessage) -> LakeResult<()> {
            if !self.peers.iter().any(|v| v == peer) {
                return Err(LakeError::Connection(peer.to_string()));
            }
            self.sent.entry(peer.to_string()).or_default().push(msg.clone());
            Ok(())
        }

        fn connected_peers(&self) -> Vec<String> {
            self.peers.clone()
        }
    }

    fn announcement(source: &str) -> GossipMessage {
        GossipMessage::new(
            source,
            MessageBody::DataAnnouncement {
                dataset: DatasetAnnouncement {
                    id: "d1".to_string(),
                    filename: "sales.csv".to_string(),
                    metadata: Default::default(),
                    node_id: source.to_string(),
                },
            },
        )
        .with_id()
    }

    #[test]
    fn same_message_is_handled_once() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b"]);
        let msg = announcement("b");

        assert!(matches!(
            router.receive(&mut transport, msg.clone(), "b"),
            Delivery::Local(_)
        ));
        assert_eq!(
            router.receive(&mut transport, msg, "b"),
            Delivery::Duplicate
        );
    }

    #[test]
    fn relayed_message_is_reflooded_except_sender() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b", "c", "d"]);
        let msg = announcement("b").with_relay();

        router.receive(&mut transport, msg.clone(), "b");
        router.receive(&mut transport, msg, "c");
        assert_eq!(transport.count("b"), 0);
        assert_eq!(transport.count("c"), 1);
        assert_eq!(transport.count("d"), 1);
    }

    #[test]
    fn message_for_other_node_is_forwarded() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b", "c"]);
        router.handle_route_discovery(
            "c",
            &[RouteAdvert {
                node_id: "z".to_string(),
                hop_count: 2,
            }],
            1,
        );

        let msg = announcement("b").with_destination("z");
        assert_eq!(
            router.receive(&mut transport, msg, "b"),
            Delivery::Forwarded
        );
        assert_eq!(transport.count("c"), 1);
        assert_eq!(transport.count("b"), 0);
    }

    #[test]
    fn route_discovery_skips_self() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b"]);
        let msg = GossipMessage::new(
            "b",
            MessageBody::RouteDiscovery {
                routes: vec![
                    RouteAdvert {
                        node_id: "a".to_string(),
                        hop_count: 2,
                    },
                    RouteAdvert {
                        node_id: "c".to_string(),
                        hop_count: 2,
                    },
                ],
            },
        );
        assert_eq!(
            router.receive(&mut transport, msg, "b"),
            Delivery::Consumed
        );
        assert!(router.routes().get("a").is_none());
        let entry = router.routes().get("c").unwrap();
        assert_eq!(entry.next_hop, "b");
        assert_eq!(entry.hop_count, 2);
    }

    #[test]
    fn update_route_advertises_table() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b", "c"]);
        router.update_route(&mut transport, "b");
        router.update_route(&mut transport, "c");

        let sent = &transport.sent["c"][0];
        match &sent.body {
            MessageBody::RouteDiscovery { routes } => {
                assert_eq!(routes.len(), 1);
                assert_eq!(routes[0].node_id, "b");
                assert_eq!(routes[0].hop_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn disconnect_removes_routes_through_peer() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b"]);
        router.update_route(&mut transport, "b");
        router.handle_route_discovery(
            "b",
            &[RouteAdvert {
                node_id: "c".to_string(),
                hop_count: 2,
            }],
            1,
        );
        assert_eq!(router.routes().len(), 2);

        router.remove_routes("b");
        assert!(router.routes().is_empty());
        assert!(matches!(
            router.send_directed(&mut transport, "c", announcement("a")),
            Err(LakeError::RouteNotFound(_))
        ));
    }

    #[test]
    fn broadcast_marks_own_message_seen() {
        let mut router = GossipRouter::new("a", 10);
        let mut transport = MockTransport::with_peers(&["b", "c"]);
        let msg = GossipMessage::new("a", MessageBody::SyncRequest { source_node: "a".into() });
        assert_eq!(router.broadcast(&mut transport, msg, Some("c")), 1);

        let echoed = transport.sent["b"][0].clone();
        assert_eq!(
            router.receive(&mut transport, echoed, "b"),
            Delivery::Duplicate
        );
    }
}
