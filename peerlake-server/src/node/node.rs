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

use crate::network::PeerManager;
use crate::node::node_loop::NodeLoop;
use crate::node::NodeHandle;
use crate::query::QueryExecutor;
use crate::storage::ChunkStore;
use log::{error, info, warn};
use peerlake_common::conf::NodeConf;
use peerlake_common::state::DataFormat;
use peerlake_common::LakeResult;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const EVENT_BUS_SIZE: usize = 256;

/// Per-process context of a peerlake node: configuration, chunk store and query executor.
/// `start` binds the listener and spawns the node loop.
pub struct Node {
    conf: NodeConf,
    store: Arc<ChunkStore>,
    executor: Arc<dyn QueryExecutor>,
}

impl Node {
    pub async fn new(conf: NodeConf, executor: Arc<dyn QueryExecutor>) -> LakeResult<Self> {
        let store = ChunkStore::open(&conf.storage).await?;
        Ok(Self {
            conf,
            store: Arc::new(store),
            executor,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.conf.node_id
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    // Stored csv datasets become queryable again after a restart.
    async fn load_datasets(&self) {
        for dataset in self.store.datasets() {
            if dataset.format != DataFormat::Csv {
                continue;
            }

            let read = match self.store.retrieve(&dataset.id).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("dataset {} not loaded: {}", dataset.id, e);
                    continue;
                }
            };
            if let Err(e) = self.executor.register_dataset(&read.dataset, &read.data).await {
                warn!("dataset {} not loaded: {}", dataset.id, e);
            }
        }
    }

    pub async fn start(self) -> LakeResult<NodeHandle> {
        let conf = self.conf.clone();
        let channel_size = conf.network.channel_size.max(1);

        let (net_tx, net_rx) = mpsc::channel(channel_size);
        let manager = PeerManager::new(conf.network.clone(), net_tx);

        // A node that cannot listen still dials out.
        let listen_addr = match manager.start_listening().await {
            Ok(v) => Some(v),
            Err(e) => {
                error!("node {} runs without listener: {}", conf.node_id, e);
                None
            }
        };
        let advertise_addr =
            listen_addr.map(|v| format!("{}:{}", conf.network.advertise_host, v.port()));

        self.load_datasets().await;

        let (command_tx, command_rx) = mpsc::channel(channel_size);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_BUS_SIZE);

        let node_loop = NodeLoop::new(
            conf.clone(),
            advertise_addr.clone(),
            manager,
            self.executor.clone(),
            event_tx.clone(),
            reply_tx,
        );
        tokio::spawn(node_loop.run(command_rx, net_rx, reply_rx));

        info!(
            "node {} started, listen = {:?}, advertise = {:?}, datasets = {}",
            conf.node_id,
            listen_addr,
            advertise_addr,
            self.store.list().len()
        );

        Ok(NodeHandle::new(
            conf.node_id.clone(),
            listen_addr,
            advertise_addr,
            command_tx,
            event_tx,
            self.store.clone(),
            self.executor.clone(),
            conf.query.peer_timeout,
        ))
    }
}
