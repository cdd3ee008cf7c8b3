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

use crate::network::DialReply;
use crate::query::PendingQuery;
use peerlake_common::state::{DatasetAnnouncement, PeerInfo, QueryOutput, Topology};
use peerlake_common::LakeResult;
use serde_json::Value;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<T>;

/// Requests served by the node loop. Every command that expects an answer carries a
/// oneshot sender.
#[derive(Debug)]
pub enum NodeCommand {
    Connect {
        addr: String,
        reply: DialReply,
    },

    Announce {
        dataset: DatasetAnnouncement,
    },

    DispatchQuery {
        peer: String,
        query: String,
        reply: Reply<LakeResult<PendingQuery>>,
    },

    CancelQuery {
        id: String,
    },

    Peers {
        reply: Reply<Vec<PeerInfo>>,
    },

    Topology {
        reply: Reply<Topology>,
    },

    RemoteDatasets {
        reply: Reply<Vec<DatasetAnnouncement>>,
    },

    RequestSync {
        reply: Reply<usize>,
    },

    Publish {
        kind: String,
        payload: Value,
        reply: Reply<LakeResult<usize>>,
    },

    Stop {
        reply: Reply<()>,
    },
}

/// Result of a query executed for a remote peer, sent back by the loop.
#[derive(Debug)]
pub(crate) struct QueryReply {
    pub to: String,
    pub id: String,
    pub result: Result<QueryOutput, String>,
}
