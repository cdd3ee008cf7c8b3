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

use crate::node::{NodeCommand, NodeEvent};
use crate::query::{PendingQuery, QueryCoordinator, QueryDispatcher, QueryExecutor};
use crate::storage::ChunkStore;
use async_trait::async_trait;
use log::{debug, warn};
use peerlake_common::error::LakeError;
use peerlake_common::state::{
    Dataset, DatasetAnnouncement, DatasetData, DatasetMetadata, DatasetSummary, PeerInfo,
    QueryFanoutResponse, QueryOutput, StorageStats, Topology,
};
use peerlake_common::LakeResult;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

/// Cloneable access to a running node. Overlay operations go through the node loop,
/// storage and local queries are served directly.
#[derive(Clone)]
pub struct NodeHandle {
    node_id: String,
    listen_addr: Option<SocketAddr>,
    advertise_addr: Option<String>,
    commands: mpsc::Sender<NodeCommand>,
    events: broadcast::Sender<NodeEvent>,
    store: Arc<ChunkStore>,
    executor: Arc<dyn QueryExecutor>,
    peer_timeout: Duration,
}

impl NodeHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_id: String,
        listen_addr: Option<SocketAddr>,
        advertise_addr: Option<String>,
        commands: mpsc::Sender<NodeCommand>,
        events: broadcast::Sender<NodeEvent>,
        store: Arc<ChunkStore>,
        executor: Arc<dyn QueryExecutor>,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            listen_addr,
            advertise_addr,
            commands,
            events,
            store,
            executor,
            peer_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Address other peers dial, `None` when the listener could not be bound.
    pub fn advertise_addr(&self) -> Option<&str> {
        self.advertise_addr.as_deref()
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, f: impl FnOnce(oneshot::Sender<T>) -> NodeCommand) -> LakeResult<T> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(f(tx)).await.is_err() {
            return Err(LakeError::Closed(self.node_id.clone()));
        }
        rx.await
            .map_err(|_| LakeError::Closed(self.node_id.clone()))
    }

    /// Dials `addr` and waits for the remote handshake, returns the remote node id.
    pub async fn connect(&self, addr: impl Into<String>) -> LakeResult<String> {
        let addr = addr.into();
        self.call(|reply| NodeCommand::Connect { addr, reply })
            .await?
    }

    /// Stores a dataset, makes it queryable and announces it to the overlay.
    pub async fn ingest(
        &self,
        filename: &str,
        data: &[u8],
        metadata: DatasetMetadata,
    ) -> LakeResult<String> {
        let id = self.store.store(filename, data, metadata).await?;
        let dataset = self.store.info(&id)?;

        if let Err(e) = self.executor.register_dataset(&dataset, data).await {
            warn!("dataset {} ({}) is stored but not queryable: {}", id, filename, e);
        }

        let announcement = DatasetAnnouncement {
            id: dataset.id.clone(),
            filename: dataset.filename.clone(),
            metadata: dataset.metadata.clone(),
            node_id: self.node_id.clone(),
        };
        if self
            .commands
            .send(NodeCommand::Announce {
                dataset: announcement,
            })
            .await
            .is_err()
        {
            warn!("dataset {} stored while node {} is stopped", id, self.node_id);
        }
        Ok(id)
    }

    /// Verified payload of a local dataset together with its record.
    pub async fn retrieve(&self, dataset_id: &str) -> LakeResult<DatasetData> {
        self.store.retrieve(dataset_id).await
    }

    pub async fn delete(&self, dataset_id: &str) -> LakeResult<()> {
        let dataset = self.store.delete(dataset_id).await?;
        self.executor.unregister_dataset(&dataset).await
    }

    pub fn dataset(&self, dataset_id: &str) -> LakeResult<Dataset> {
        self.store.info(dataset_id)
    }

    pub fn datasets(&self) -> Vec<DatasetSummary> {
        self.store.list()
    }

    pub fn search(&self, text: &str) -> Vec<DatasetSummary> {
        self.store.search(text)
    }

    pub fn stats(&self) -> StorageStats {
        self.store.stats()
    }

    pub async fn remote_datasets(&self) -> LakeResult<Vec<DatasetAnnouncement>> {
        self.call(|reply| NodeCommand::RemoteDatasets { reply })
            .await
    }

    pub async fn query_local(&self, sql: &str) -> LakeResult<QueryOutput> {
        self.executor.execute(sql).await.map_err(LakeError::Common)
    }

    /// Runs `sql` on every peer of `peers` and merges the results.
    pub async fn query(&self, sql: &str, peers: &[String]) -> LakeResult<QueryFanoutResponse> {
        self.coordinator().execute(sql, peers).await
    }

    pub async fn query_with_deadline(
        &self,
        sql: &str,
        peers: &[String],
        deadline: Instant,
    ) -> LakeResult<QueryFanoutResponse> {
        self.coordinator()
            .execute_with_deadline(sql, peers, deadline)
            .await
    }

    fn coordinator(&self) -> QueryCoordinator<NodeHandle> {
        QueryCoordinator::new(
            self.node_id.clone(),
            self.executor.clone(),
            self.clone(),
            self.peer_timeout,
        )
    }

    pub async fn peers(&self) -> LakeResult<Vec<PeerInfo>> {
        self.call(|reply| NodeCommand::Peers { reply }).await
    }

    pub async fn topology(&self) -> LakeResult<Topology> {
        self.call(|reply| NodeCommand::Topology { reply }).await
    }

    /// Floods a sync-request, returns the number of direct peers it was sent to.
    pub async fn request_sync(&self) -> LakeResult<usize> {
        self.call(|reply| NodeCommand::RequestSync { reply })
            .await
    }

    /// Floods an application defined message of type `kind` through the overlay.
    pub async fn publish(&self, kind: impl Into<String>, payload: Value) -> LakeResult<usize> {
        let kind = kind.into();
        self.call(|reply| NodeCommand::Publish {
            kind,
            payload,
            reply,
        })
        .await?
    }

    /// Announces departure to the overlay and stops the node loop.
    pub async fn stop(&self) -> LakeResult<()> {
        self.call(|reply| NodeCommand::Stop { reply }).await
    }
}

#[async_trait]
impl QueryDispatcher for NodeHandle {
    async fn dispatch(&self, peer: &str, query: &str) -> LakeResult<PendingQuery> {
        let peer = peer.to_string();
        let query = query.to_string();
        self.call(|reply| NodeCommand::DispatchQuery { peer, query, reply })
            .await?
    }

    fn cancel(&self, query_id: &str) {
        let id = query_id.to_string();
        if let Err(e) = self.commands.try_send(NodeCommand::CancelQuery { id }) {
            debug!("cancel of query {} not queued: {}", query_id, e);
        }
    }
}
