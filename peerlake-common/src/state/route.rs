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

use crate::state::PeerInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingEntry {
    pub destination: String,
    pub next_hop: String,
    pub hop_count: u32,
    pub last_updated_at: u64,
}

impl RoutingEntry {
    pub fn is_direct(&self) -> bool {
        self.hop_count == 1 && self.destination == self.next_hop
    }
}

/// Reachability advertised in a route-discovery message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAdvert {
    pub node_id: String,
    pub hop_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub node_id: String,
    pub connected_peers: Vec<PeerInfo>,
    pub routing_table: Vec<RoutingEntry>,
    // Routing entries plus this node.
    pub total_nodes: usize,
}
