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

use crate::gossip::{Delivery, GossipRouter, Transport};
use crate::network::{ConnId, DialReply, HandshakeOutcome, NetworkEvent, PeerManager, PeerTable};
use crate::node::command::QueryReply;
use crate::node::{NodeCommand, NodeEvent};
use crate::query::{PendingQuery, QueryExecutor, UNREACHABLE_ERROR};
use log::{debug, info, warn};
use peerlake_common::conf::NodeConf;
use peerlake_common::error::LakeError;
use peerlake_common::state::{
    DatasetAnnouncement, GossipMessage, MessageBody, PeerEntry, QueryOutput, Topology,
};
use peerlake_common::utils::{LocalTime, Utils};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, MissedTickBehavior};

// Time given to queued frames, peer-leaving included, before connections are cut at stop.
const STOP_GRACE: Duration = Duration::from_millis(500);

// Room left in a reply frame for the relay flag added by forwarding hops.
const FRAME_HEADROOM: usize = 64;

/// Overlay state of one node. Only the loop task touches it.
pub(crate) struct NodeLoop {
    pub conf: NodeConf,
    pub node_id: String,
    pub advertise_addr: Option<String>,
    pub manager: Arc<PeerManager>,
    pub peers: PeerTable,
    pub router: GossipRouter,
    pub executor: Arc<dyn QueryExecutor>,
    pub events: broadcast::Sender<NodeEvent>,
    pub reply_tx: mpsc::UnboundedSender<QueryReply>,
    pub pending: HashMap<String, oneshot::Sender<Result<QueryOutput, String>>>,
    pub remote_datasets: HashMap<String, DatasetAnnouncement>,
    pub dialing: HashSet<String>,
    pub awaiting: HashMap<ConnId, DialReply>,
}

impl NodeLoop {
    pub fn new(
        conf: NodeConf,
        advertise_addr: Option<String>,
        manager: Arc<PeerManager>,
        executor: Arc<dyn QueryExecutor>,
        events: broadcast::Sender<NodeEvent>,
        reply_tx: mpsc::UnboundedSender<QueryReply>,
    ) -> Self {
        let node_id = conf.node_id.clone();
        Self {
            peers: PeerTable::new(&node_id),
            router: GossipRouter::new(&node_id, conf.network.dedup_cache_size),
            node_id,
            conf,
            advertise_addr,
            manager,
            executor,
            events,
            reply_tx,
            pending: HashMap::new(),
            remote_datasets: HashMap::new(),
            dialing: HashSet::new(),
            awaiting: HashMap::new(),
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<NodeCommand>,
        mut net_events: mpsc::Receiver<NetworkEvent>,
        mut replies: mpsc::UnboundedReceiver<QueryReply>,
    ) {
        for addr in self.conf.network.bootstrap_peers.clone() {
            self.dial(addr, None);
        }

        let mut ticker = tokio::time::interval(self.conf.network.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.send_heartbeat();
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }

                event = net_events.recv() => {
                    if let Some(event) = event {
                        self.handle_network_event(event);
                    }
                }

                reply = replies.recv() => {
                    if let Some(reply) = reply {
                        self.send_query_reply(reply);
                    }
                }
            }
        }
        info!("node {} loop exited", self.node_id);
    }

    fn emit(&self, event: NodeEvent) {
        debug!("node {} event {}", self.node_id, event.name());
        let _ = self.events.send(event);
    }

    fn msg(&self, body: MessageBody) -> GossipMessage {
        GossipMessage::new(&self.node_id, body)
    }

    fn dial(&mut self, addr: String, reply: Option<DialReply>) {
        if self.advertise_addr.as_deref() == Some(addr.as_str()) {
            if let Some(reply) = reply {
                let _ = reply.send(Err(LakeError::InvalidArgument(format!(
                    "{} is this node",
                    addr
                ))));
            }
            return;
        }
        if let Some(node_id) = self.peers.node_at(&addr) {
            debug!("{} is already connected as {}", addr, node_id);
            if let Some(reply) = reply {
                let _ = reply.send(Ok(node_id.to_string()));
            }
            return;
        }
        self.dialing.insert(addr.clone());
        self.manager.connect_to(addr, reply);
    }

    fn handle_command(&mut self, command: NodeCommand) -> bool {
        match command {
            NodeCommand::Connect { addr, reply } => self.dial(addr, Some(reply)),

            NodeCommand::Announce { dataset } => {
                let msg = self
                    .msg(MessageBody::DataAnnouncement { dataset })
                    .with_relay();
                let sent = self.router.broadcast(&mut self.peers, msg, None);
                debug!("dataset announcement sent to {} peers", sent);
            }

            NodeCommand::DispatchQuery { peer, query, reply } => {
                let res = self.dispatch_query(peer, query);
                let _ = reply.send(res);
            }

            NodeCommand::CancelQuery { id } => {
                if self.pending.remove(&id).is_some() {
                    debug!("query {} cancelled", id);
                }
            }

            NodeCommand::Peers { reply } => {
                let _ = reply.send(self.peers.infos());
            }

            NodeCommand::Topology { reply } => {
                let routing_table = self.router.routes().entries();
                let topology = Topology {
                    node_id: self.node_id.clone(),
                    connected_peers: self.peers.infos(),
                    total_nodes: routing_table.len() + 1,
                    routing_table,
                };
                let _ = reply.send(topology);
            }

            NodeCommand::RemoteDatasets { reply } => {
                let mut list: Vec<DatasetAnnouncement> =
                    self.remote_datasets.values().cloned().collect();
                list.sort_by(|a, b| a.node_id.cmp(&b.node_id).then(a.id.cmp(&b.id)));
                let _ = reply.send(list);
            }

            NodeCommand::RequestSync { reply } => {
                let msg = self
                    .msg(MessageBody::SyncRequest {
                        source_node: self.node_id.clone(),
                    })
                    .with_relay();
                let _ = reply.send(self.router.broadcast(&mut self.peers, msg, None));
            }

            NodeCommand::Publish {
                kind,
                payload,
                reply,
            } => {
                if MessageBody::is_known(&kind) || kind.trim().is_empty() {
                    let _ = reply.send(Err(LakeError::InvalidArgument(format!(
                        "{} is not a custom message type",
                        kind
                    ))));
                } else {
                    let msg = self
                        .msg(MessageBody::Custom { kind, payload })
                        .with_relay();
                    let _ = reply.send(Ok(self.router.broadcast(&mut self.peers, msg, None)));
                }
            }

            NodeCommand::Stop { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn dispatch_query(&mut self, peer: String, query: String) -> Result<PendingQuery, LakeError> {
        let id = Utils::uuid();
        let msg = self
            .msg(MessageBody::DataQuery {
                id: id.clone(),
                query,
                source_node: self.node_id.clone(),
            })
            .with_destination(&peer);

        if let Err(e) = self
            .router
            .send_directed(&mut self.peers, &peer, msg.clone())
        {
            debug!("no direct path to {} ({}), flooding query {}", peer, e, id);
            let sent = self
                .router
                .broadcast(&mut self.peers, msg.with_relay(), None);
            if sent == 0 {
                return Err(LakeError::Connection(UNREACHABLE_ERROR.to_string()));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        Ok(PendingQuery { id, response: rx })
    }

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Opened { conn, dial } => {
                let conn_id = conn.id();
                if let Some(dial) = dial {
                    self.dialing.remove(&dial.addr);
                    if let Some(reply) = dial.reply {
                        self.awaiting.insert(conn_id, reply);
                    }
                }
                self.peers.add_connection(conn);

                let handshake = self.msg(MessageBody::Handshake {
                    node_id: self.node_id.clone(),
                    listen_addr: self.advertise_addr.clone(),
                });
                if let Err(e) = self.peers.send_conn(conn_id, handshake) {
                    warn!("handshake on connection {} failed: {}", conn_id, e);
                }
            }

            NetworkEvent::Frame { conn_id, msg } => self.handle_frame(conn_id, msg),

            NetworkEvent::Closed { conn_id } => {
                if let Some(reply) = self.awaiting.remove(&conn_id) {
                    let _ = reply.send(Err(LakeError::Connection(
                        "connection closed before handshake".to_string(),
                    )));
                }
                if let Some(node_id) = self.peers.remove_connection(conn_id) {
                    info!("peer {} disconnected", node_id);
                    self.on_peer_lost(&node_id);
                }
            }

            NetworkEvent::ConnectFailed { addr, error, reply } => {
                self.dialing.remove(&addr);
                self.emit(NodeEvent::ConnectFailed {
                    addr,
                    error: error.to_string(),
                });
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error));
                }
            }
        }
    }

    fn handle_frame(&mut self, conn_id: ConnId, msg: GossipMessage) {
        if let MessageBody::Handshake {
            node_id,
            listen_addr,
        } = msg.body
        {
            self.handle_handshake(conn_id, node_id, listen_addr);
            return;
        }

        let from = match self.peers.touch(conn_id, LocalTime::mills()) {
            Some(v) => v,
            None => {
                debug!("drop {} received before handshake on {}", msg, conn_id);
                return;
            }
        };

        match &msg.body {
            MessageBody::Heartbeat { .. } => return,
            MessageBody::PeerList { peers } => {
                self.discover(peers);
                return;
            }
            _ => (),
        }

        if let Delivery::Local(msg) = self.router.receive(&mut self.peers, msg, &from) {
            self.deliver(msg);
        }
    }

    fn handle_handshake(&mut self, conn_id: ConnId, node_id: String, listen_addr: Option<String>) {
        let outcome =
            self.peers
                .handle_handshake(conn_id, &node_id, listen_addr.clone(), LocalTime::mills());

        match outcome {
            HandshakeOutcome::Connected {
                replaced,
                displaced,
            } => {
                if let Some(previous) = displaced {
                    self.on_peer_lost(&previous);
                }
                info!(
                    "peer {} connected on {}, listen address {:?}",
                    node_id, conn_id, listen_addr
                );
                if let Some(reply) = self.awaiting.remove(&conn_id) {
                    let _ = reply.send(Ok(node_id.clone()));
                }

                let peers = self.peers.entries(&node_id);
                let list = self.msg(MessageBody::PeerList { peers });
                if let Err(e) = self.peers.send_conn(conn_id, list) {
                    debug!("peer list to {} failed: {}", node_id, e);
                }
                self.router.update_route(&mut self.peers, &node_id);

                if !replaced {
                    self.emit(NodeEvent::PeerConnected {
                        node_id,
                        addr: listen_addr,
                    });
                }
            }

            HandshakeOutcome::SelfConnection => {
                if let Some(reply) = self.awaiting.remove(&conn_id) {
                    let _ = reply.send(Err(LakeError::InvalidArgument(
                        "connected to this node".to_string(),
                    )));
                }
            }

            HandshakeOutcome::Duplicate => {
                if let Some(reply) = self.awaiting.remove(&conn_id) {
                    let _ = reply.send(Ok(node_id));
                }
            }

            HandshakeOutcome::Refreshed => (),

            HandshakeOutcome::UnknownConnection => {
                debug!("handshake of {} on unknown connection {}", node_id, conn_id)
            }
        }
    }

    fn discover(&mut self, entries: &[PeerEntry]) {
        if !self.conf.network.auto_connect {
            return;
        }

        for entry in entries {
            if entry.node_id == self.node_id || self.peers.contains(&entry.node_id) {
                continue;
            }
            let Some(addr) = &entry.addr else {
                continue;
            };
            if self.dialing.contains(addr) {
                continue;
            }
            info!("discovered peer {} at {}", entry.node_id, addr);
            self.dial(addr.clone(), None);
        }
    }

    fn deliver(&mut self, msg: GossipMessage) {
        let source = msg.source().to_string();
        match msg.body {
            MessageBody::DataAnnouncement { dataset } => {
                if dataset.node_id == self.node_id {
                    return;
                }
                info!(
                    "dataset {} ({}) announced by {}",
                    dataset.id, dataset.filename, dataset.node_id
                );
                self.remote_datasets
                    .insert(dataset.id.clone(), dataset.clone());
                self.emit(NodeEvent::DatasetAnnounced(dataset));
            }

            MessageBody::DataQuery {
                id,
                query,
                source_node,
            } => {
                let executor = self.executor.clone();
                let replies = self.reply_tx.clone();
                tokio::spawn(async move {
                    let result = executor.execute(&query).await;
                    let _ = replies.send(QueryReply {
                        to: source_node,
                        id,
                        result,
                    });
                });
            }

            MessageBody::DataResponse { id, result, error } => match self.pending.remove(&id) {
                Some(tx) => {
                    let res = match (result, error) {
                        (_, Some(e)) => Err(e),
                        (Some(output), None) => Ok(output),
                        (None, None) => Err("empty response".to_string()),
                    };
                    let _ = tx.send(res);
                }
                None => debug!("drop late response of query {} from {}", id, source),
            },

            MessageBody::SyncRequest { source_node } => {
                info!("sync requested by {}", source_node);
                self.emit(NodeEvent::SyncRequested { source_node });
            }

            MessageBody::PeerLeaving { node_id } => {
                info!("peer {} is leaving", node_id);
                if self.peers.disconnect(&node_id) {
                    self.on_peer_lost(&node_id);
                } else {
                    self.router.remove_routes(&node_id);
                }
                self.remote_datasets.retain(|_, v| v.node_id != node_id);
                self.emit(NodeEvent::PeerLeft { node_id });
            }

            MessageBody::Custom { kind, payload } => {
                self.emit(NodeEvent::CustomMessage {
                    kind,
                    source,
                    payload,
                });
            }

            MessageBody::Handshake { .. }
            | MessageBody::Heartbeat { .. }
            | MessageBody::PeerList { .. }
            | MessageBody::RouteDiscovery { .. } => (),
        }
    }

    fn send_query_reply(&mut self, reply: QueryReply) {
        let id = reply.id.clone();
        let body = match reply.result {
            Ok(output) => MessageBody::DataResponse {
                id: reply.id,
                result: Some(output),
                error: None,
            },
            Err(e) => MessageBody::DataResponse {
                id: reply.id,
                result: None,
                error: Some(e),
            },
        };
        let mut msg = self.msg(body).with_destination(&reply.to).with_id();

        // A frame over the limit would be refused by the connection, answer with an error.
        let limit = self.conf.network.max_frame_size as usize;
        let size = msg.encode().map(|v| v.len()).unwrap_or(usize::MAX);
        if size.saturating_add(FRAME_HEADROOM) > limit {
            warn!(
                "result of query {} is {} bytes, over the frame limit of {} bytes",
                id, size, limit
            );
            msg.body = MessageBody::DataResponse {
                id,
                result: None,
                error: Some(format!(
                    "result of {} bytes exceeds the frame limit of {} bytes",
                    size, limit
                )),
            };
        }

        if let Err(e) = self
            .router
            .send_directed(&mut self.peers, &reply.to, msg.clone())
        {
            debug!("no direct path to {} ({}), flooding response", reply.to, e);
            let sent = self
                .router
                .broadcast(&mut self.peers, msg.with_relay(), None);
            if sent == 0 {
                warn!("query response to {} could not be delivered", reply.to);
            }
        }
    }

    fn on_peer_lost(&mut self, node_id: &str) {
        let removed = self.router.remove_routes(node_id);
        debug!("routes removed with peer {}: {:?}", node_id, removed);
        self.emit(NodeEvent::PeerDisconnected {
            node_id: node_id.to_string(),
        });
    }

    fn send_heartbeat(&mut self) {
        let msg = self.msg(MessageBody::Heartbeat {
            node_id: self.node_id.clone(),
        });
        for peer in self.peers.connected_peers() {
            if let Err(e) = self.peers.send_to(&peer, &msg) {
                debug!("heartbeat to {} failed: {}", peer, e);
            }
        }

        let stale = self
            .peers
            .evict_stale(LocalTime::mills(), self.conf.network.stale_timeout);
        for node_id in stale {
            warn!("peer {} evicted, silent for over {:?}", node_id, self.conf.network.stale_timeout);
            self.on_peer_lost(&node_id);
        }

        // Queries whose caller went away without a cancel reaching the loop.
        self.pending.retain(|_, v| !v.is_closed());
    }

    fn shutdown(&mut self) {
        let msg = self
            .msg(MessageBody::PeerLeaving {
                node_id: self.node_id.clone(),
            })
            .with_relay();
        let sent = self.router.broadcast(&mut self.peers, msg, None);
        info!("node {} stopping, peer-leaving sent to {} peers", self.node_id, sent);

        self.manager.shutdown();
        self.pending.clear();
        let closers = self.peers.release();
        tokio::spawn(async move {
            sleep(STOP_GRACE).await;
            for closer in closers {
                closer.cancel();
            }
        });
    }
}
