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

use peerlake_common::state::DatasetAnnouncement;
use serde_json::Value;

/// Notifications published on the node event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    PeerConnected {
        node_id: String,
        addr: Option<String>,
    },

    // Emitted once per lost peer: closed connection, staleness or peer-leaving.
    PeerDisconnected {
        node_id: String,
    },

    ConnectFailed {
        addr: String,
        error: String,
    },

    DatasetAnnounced(DatasetAnnouncement),

    SyncRequested {
        source_node: String,
    },

    PeerLeft {
        node_id: String,
    },

    CustomMessage {
        kind: String,
        source: String,
        payload: Value,
    },
}

impl NodeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::PeerConnected { .. } => "peer-connected",
            NodeEvent::PeerDisconnected { .. } => "peer-disconnected",
            NodeEvent::ConnectFailed { .. } => "connect-failed",
            NodeEvent::DatasetAnnounced(_) => "dataset-announced",
            NodeEvent::SyncRequested { .. } => "sync-requested",
            NodeEvent::PeerLeft { .. } => "peer-left",
            NodeEvent::CustomMessage { .. } => "custom-message",
        }
    }
}
