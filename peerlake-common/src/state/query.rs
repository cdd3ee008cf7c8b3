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

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result contract of a query executor: ordered rows of ordered values plus column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub columns: Vec<String>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            row_count: rows.len(),
            rows,
            columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFanoutRequest {
    pub query: String,
    pub peers: Vec<String>,
}

/// Outcome of one peer inside a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerQueryResult {
    pub peer_id: String,
    pub success: bool,
    pub rows: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PeerQueryResult {
    pub fn success(peer_id: impl Into<String>, output: QueryOutput) -> Self {
        Self {
            peer_id: peer_id.into(),
            success: true,
            rows: output.rows,
            columns: output.columns,
            row_count: output.row_count,
            error: None,
        }
    }

    pub fn failure(peer_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            success: false,
            rows: vec![],
            columns: vec![],
            row_count: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFanoutResponse {
    pub success: bool,
    // Same order as the requested peers.
    pub results: Vec<PeerQueryResult>,
    pub rows: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub total_rows: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryFanoutResponse {
    pub fn failed_peers(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|v| !v.success)
            .map(|v| v.peer_id.as_str())
            .collect()
    }
}
