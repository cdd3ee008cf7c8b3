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

use crate::gossip::Transport;
use crate::network::{ConnId, Connection, Direction};
use log::{debug, info, warn};
use peerlake_common::error::LakeError;
use peerlake_common::state::{GossipMessage, PeerEntry, PeerInfo, PeerStatus};
use peerlake_common::LakeResult;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct PeerRecord {
    node_id: String,
    // Listen address announced in the handshake.
    addr: Option<String>,
    conn: Connection,
    status: PeerStatus,
    last_seen_at: u64,
}

impl PeerRecord {
    fn info(&self) -> PeerInfo {
        PeerInfo {
            node_id: self.node_id.clone(),
            addr: self.addr.clone(),
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    // `displaced` is the node this connection was bound to before, now gone.
    Connected {
        replaced: bool,
        displaced: Option<String>,
    },
    // Repeated handshake on the connection already bound to this node.
    Refreshed,
    // A second connection to an already connected node lost the tie break and was closed.
    Duplicate,
    // The remote claims our own node id, the connection was closed.
    SelfConnection,
    UnknownConnection,
}

/// Directly connected peers keyed by node id, plus connections still waiting for a handshake.
///
/// Time is passed in by the caller so that staleness can be driven deterministically.
pub struct PeerTable {
    local_id: String,
    peers: HashMap<String, PeerRecord>,
    conns: HashMap<ConnId, Connection>,
    conn_peers: HashMap<ConnId, String>,
}

impl PeerTable {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            peers: HashMap::new(),
            conns: HashMap::new(),
            conn_peers: HashMap::new(),
        }
    }

    pub fn add_connection(&mut self, conn: Connection) {
        self.conns.insert(conn.id(), conn);
    }

    /// Binds `conn_id` to `node_id`. When the node already has another connection, both ends
    /// keep the same one: the connection dialed by the lower node id. Connections dialed in the
    /// same direction are a reconnect and the later one wins.
    pub fn handle_handshake(
        &mut self,
        conn_id: ConnId,
        node_id: &str,
        addr: Option<String>,
        now: u64,
    ) -> HandshakeOutcome {
        let conn = match self.conns.get(&conn_id) {
            Some(v) => v.clone(),
            None => return HandshakeOutcome::UnknownConnection,
        };

        if node_id == self.local_id {
            warn!("connection {} handshakes with our own node id, closing", conn);
            self.conns.remove(&conn_id);
            conn.close();
            return HandshakeOutcome::SelfConnection;
        }

        if let Some(existing) = self.peers.get_mut(node_id) {
            if existing.conn.id() == conn_id {
                existing.last_seen_at = now;
                if addr.is_some() {
                    existing.addr = addr;
                }
                return HandshakeOutcome::Refreshed;
            }
        }

        if let Some(existing) = self.peers.get(node_id) {
            if !self.prefers(node_id, &conn, &existing.conn) {
                info!(
                    "peer {} already connected on {}, closing duplicate connection {}",
                    node_id, existing.conn, conn
                );
                self.conns.remove(&conn_id);
                conn.close();
                return HandshakeOutcome::Duplicate;
            }
        }

        let replaced = match self.peers.remove(node_id) {
            Some(old) => {
                info!(
                    "peer {} reconnected on {}, closing previous connection {}",
                    node_id, conn, old.conn
                );
                self.conn_peers.remove(&old.conn.id());
                self.conns.remove(&old.conn.id());
                old.conn.close();
                true
            }
            None => false,
        };

        // A connection re-handshaking as another node drops its previous binding.
        let displaced = match self.conn_peers.insert(conn_id, node_id.to_string()) {
            Some(previous) if previous != node_id => {
                warn!(
                    "connection {} switched from node {} to {}",
                    conn, previous, node_id
                );
                match self.peers.get(&previous) {
                    Some(record) if record.conn.id() == conn_id => {
                        self.peers.remove(&previous);
                        Some(previous)
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        self.peers.insert(
            node_id.to_string(),
            PeerRecord {
                node_id: node_id.to_string(),
                addr,
                conn,
                status: PeerStatus::Connected,
                last_seen_at: now,
            },
        );
        HandshakeOutcome::Connected {
            replaced,
            displaced,
        }
    }

    // Whether `new` should replace `old` as the connection to `remote`.
    fn prefers(&self, remote: &str, new: &Connection, old: &Connection) -> bool {
        if new.direction() == old.direction() {
            return true;
        }
        let dialer = match new.direction() {
            Direction::Outbound => self.local_id.as_str(),
            Direction::Inbound => remote,
        };
        dialer == self.local_id.as_str().min(remote)
    }

    /// Refreshes the peer bound to `conn_id`, returns its node id.
    pub fn touch(&mut self, conn_id: ConnId, now: u64) -> Option<String> {
        let node_id = self.conn_peers.get(&conn_id)?;
        if let Some(record) = self.peers.get_mut(node_id) {
            record.last_seen_at = now;
        }
        Some(node_id.clone())
    }

    /// Forgets a closed connection. Returns the node id when it was the live connection of a
    /// peer; a connection superseded by a newer handshake returns `None`.
    pub fn remove_connection(&mut self, conn_id: ConnId) -> Option<String> {
        self.conns.remove(&conn_id);
        let node_id = self.conn_peers.remove(&conn_id)?;
        match self.peers.get(&node_id) {
            Some(record) if record.conn.id() == conn_id => {
                self.peers.remove(&node_id);
                Some(node_id)
            }
            _ => None,
        }
    }

    /// Drops and closes the record of `node_id`.
    pub fn disconnect(&mut self, node_id: &str) -> bool {
        match self.peers.remove(node_id) {
            Some(record) => {
                self.conn_peers.remove(&record.conn.id());
                self.conns.remove(&record.conn.id());
                record.conn.close();
                true
            }
            None => false,
        }
    }

    /// Removes every peer silent for longer than `stale_timeout`. Each evicted peer is
    /// returned exactly once: its connection is unbound before being closed.
    pub fn evict_stale(&mut self, now: u64, stale_timeout: Duration) -> Vec<String> {
        let limit = stale_timeout.as_millis() as u64;
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|v| now.saturating_sub(v.last_seen_at) > limit)
            .map(|v| v.node_id.clone())
            .collect();

        for node_id in &stale {
            debug!("peer {} is stale", node_id);
            self.disconnect(node_id);
        }
        stale
    }

    /// Node whose announced listen address is `addr`.
    pub fn node_at(&self, addr: &str) -> Option<&str> {
        self.peers
            .values()
            .find(|v| v.addr.as_deref() == Some(addr))
            .map(|v| v.node_id.as_str())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn infos(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self.peers.values().map(|v| v.info()).collect();
        infos.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        infos
    }

    /// Peer-list entries of every known peer except `exclude`.
    pub fn entries(&self, exclude: &str) -> Vec<PeerEntry> {
        self.infos()
            .into_iter()
            .filter(|v| v.node_id != exclude)
            .map(|v| PeerEntry {
                node_id: v.node_id,
                addr: v.addr,
            })
            .collect()
    }

    pub fn send_conn(&self, conn_id: ConnId, msg: GossipMessage) -> LakeResult<()> {
        match self.conns.get(&conn_id) {
            Some(conn) => conn.send(msg),
            None => Err(LakeError::Connection(format!(
                "connection {} not found",
                conn_id
            ))),
        }
    }

    /// Drops every connection handle without cutting it, so queued frames are still written.
    /// The returned tokens close the connections for good.
    pub fn release(&mut self) -> Vec<CancellationToken> {
        let mut closers: Vec<CancellationToken> =
            self.conns.drain().map(|(_, v)| v.closer()).collect();
        closers.extend(self.peers.drain().map(|(_, v)| v.conn.closer()));
        self.conn_peers.clear();
        closers
    }
}

impl Transport for PeerTable {
    fn send_to(&mut self, peer: &str, msg: &GossipMessage) -> LakeResult<()> {
        match self.peers.get(peer) {
            Some(record) => record.conn.send(msg.clone()),
            None => Err(LakeError::Connection(format!("peer {} not connected", peer))),
        }
    }

    fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.keys().cloned().collect();
        peers.sort();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use peerlake_common::state::MessageBody;

    fn conn(id: ConnId) -> (Connection, tokio::sync::mpsc::Receiver<Bytes>) {
        dialed(id, Direction::Inbound)
    }

    fn dialed(
        id: ConnId,
        direction: Direction,
    ) -> (Connection, tokio::sync::mpsc::Receiver<Bytes>) {
        let addr = format!("127.0.0.1:{}", 10000 + id).parse().unwrap();
        Connection::in_memory(id, addr, direction, 8, 1024 * 1024)
    }

    #[test]
    fn later_handshake_replaces_record() {
        let mut table = PeerTable::new("local");
        let (c1, _r1) = conn(1);
        let (c2, _r2) = conn(2);
        table.add_connection(c1.clone());
        table.add_connection(c2.clone());

        let outcome = table.handle_handshake(1, "b", Some("127.0.0.1:9101".into()), 10);
        assert_eq!(
            outcome,
            HandshakeOutcome::Connected {
                replaced: false,
                displaced: None
            }
        );
        assert_eq!(table.node_at("127.0.0.1:9101"), Some("b"));
        let outcome = table.handle_handshake(2, "b", None, 20);
        assert_eq!(
            outcome,
            HandshakeOutcome::Connected {
                replaced: true,
                displaced: None
            }
        );
        assert!(c1.is_closed());
        assert_eq!(table.len(), 1);

        // The superseded connection closing later must not evict the new record.
        assert_eq!(table.remove_connection(1), None);
        assert!(table.contains("b"));
        assert_eq!(table.remove_connection(2), Some("b".to_string()));
        assert!(table.is_empty());
    }

    #[test]
    fn crossed_dials_keep_connection_of_lower_id() {
        // Local "a" dials "b" while "b" dials "a": both ends keep a's outbound connection,
        // whichever handshake completes first.
        for outbound_first in [true, false] {
            let mut table = PeerTable::new("a");
            let (out, _r1) = dialed(1, Direction::Outbound);
            let (inb, _r2) = dialed(2, Direction::Inbound);
            table.add_connection(out.clone());
            table.add_connection(inb.clone());

            let order = if outbound_first { [1, 2] } else { [2, 1] };
            table.handle_handshake(order[0], "b", None, 1);
            let second = table.handle_handshake(order[1], "b", None, 2);
            if outbound_first {
                assert_eq!(second, HandshakeOutcome::Duplicate);
            } else {
                assert!(matches!(
                    second,
                    HandshakeOutcome::Connected { replaced: true, .. }
                ));
            }
            assert!(!out.is_closed());
            assert!(inb.is_closed());
            assert_eq!(table.remove_connection(2), None);
            assert_eq!(table.connected_peers(), vec!["b".to_string()]);
        }

        // Seen from "b" the surviving connection is the inbound one.
        let mut table = PeerTable::new("b");
        let (out, _r1) = dialed(1, Direction::Outbound);
        let (inb, _r2) = dialed(2, Direction::Inbound);
        table.add_connection(out.clone());
        table.add_connection(inb.clone());
        table.handle_handshake(2, "a", None, 1);
        assert_eq!(
            table.handle_handshake(1, "a", None, 2),
            HandshakeOutcome::Duplicate
        );
        assert!(out.is_closed());
        assert!(!inb.is_closed());
    }

    #[test]
    fn rebound_connection_displaces_previous_node() {
        let mut table = PeerTable::new("local");
        let (c1, _r1) = conn(1);
        table.add_connection(c1.clone());
        table.handle_handshake(1, "x", None, 1);

        let outcome = table.handle_handshake(1, "y", None, 2);
        assert_eq!(
            outcome,
            HandshakeOutcome::Connected {
                replaced: false,
                displaced: Some("x".to_string())
            }
        );
        assert!(!c1.is_closed());
        assert_eq!(table.connected_peers(), vec!["y".to_string()]);
        assert_eq!(table.remove_connection(1), Some("y".to_string()));
    }

    #[test]
    fn own_node_id_is_rejected() {
        let mut table = PeerTable::new("local");
        let (c1, _r1) = conn(1);
        table.add_connection(c1.clone());
        assert_eq!(
            table.handle_handshake(1, "local", None, 1),
            HandshakeOutcome::SelfConnection
        );
        assert!(c1.is_closed());
        assert!(table.is_empty());
        assert_eq!(
            table.handle_handshake(9, "x", None, 1),
            HandshakeOutcome::UnknownConnection
        );
    }

    #[test]
    fn stale_peers_are_evicted_once() {
        let mut table = PeerTable::new("local");
        for (id, node) in [(1, "b"), (2, "c")] {
            let (c, _r) = conn(id);
            table.add_connection(c);
            table.handle_handshake(id, node, None, 1_000);
        }
        table.touch(2, 50_000);

        let evicted = table.evict_stale(61_500, Duration::from_secs(60));
        assert_eq!(evicted, vec!["b".to_string()]);
        assert!(table.evict_stale(61_500, Duration::from_secs(60)).is_empty());
        // The close event of the evicted connection arrives afterwards.
        assert_eq!(table.remove_connection(1), None);
        assert_eq!(table.connected_peers(), vec!["c".to_string()]);
    }

    #[test]
    fn entries_exclude_remote() {
        let mut table = PeerTable::new("local");
        for (id, node) in [(1, "b"), (2, "c")] {
            let (c, _r) = conn(id);
            table.add_connection(c);
            table.handle_handshake(id, node, Some(format!("10.0.0.{}:9100", id)), 1);
        }
        let entries = table.entries("b");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].node_id, "c");
        assert_eq!(entries[0].addr.as_deref(), Some("10.0.0.2:9100"));
    }

    #[test]
    fn release_keeps_connections_open() {
        let mut table = PeerTable::new("local");
        let (c1, _r1) = conn(1);
        table.add_connection(c1.clone());
        table.handle_handshake(1, "b", None, 1);

        let closers = table.release();
        assert!(table.is_empty());
        assert!(!c1.is_closed());
        closers.iter().for_each(|v| v.cancel());
        assert!(c1.is_closed());
    }

    #[test]
    fn transport_sends_to_bound_connection() {
        let mut table = PeerTable::new("local");
        let (c1, mut r1) = conn(1);
        table.add_connection(c1);
        table.handle_handshake(1, "b", None, 1);

        let msg = GossipMessage::new(
            "local",
            MessageBody::Heartbeat {
                node_id: "local".into(),
            },
        );
        table.send_to("b", &msg).unwrap();
        let frame = r1.try_recv().unwrap();
        assert_eq!(GossipMessage::decode(&frame).unwrap().kind(), "heartbeat");
        assert!(table.send_to("z", &msg).is_err());
    }
}
