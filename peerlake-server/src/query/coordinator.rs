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

use crate::query::QueryExecutor;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info};
use peerlake_common::error::LakeError;
use peerlake_common::state::{PeerQueryResult, QueryFanoutResponse, QueryOutput};
use peerlake_common::LakeResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

pub const TIMEOUT_ERROR: &str = "timeout";
pub const UNREACHABLE_ERROR: &str = "unreachable";

/// A query sent to a remote peer, resolved when its response arrives.
#[derive(Debug)]
pub struct PendingQuery {
    pub id: String,
    pub response: oneshot::Receiver<Result<QueryOutput, String>>,
}

/// Delivery of queries to remote peers.
#[async_trait]
pub trait QueryDispatcher: Send + Sync {
    async fn dispatch(&self, peer: &str, query: &str) -> LakeResult<PendingQuery>;

    /// Forgets a pending query, a response arriving later is dropped. Called from `Drop`,
    /// so it must not block.
    fn cancel(&self, query_id: &str);
}

// Cancels the pending query unless a response came back, also when the fan-out is dropped.
struct CancelGuard<'a, D: QueryDispatcher> {
    dispatcher: &'a D,
    query_id: Option<String>,
}

impl<D: QueryDispatcher> CancelGuard<'_, D> {
    fn disarm(&mut self) {
        self.query_id = None;
    }
}

impl<D: QueryDispatcher> Drop for CancelGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(id) = self.query_id.take() {
            debug!("cancel pending query {}", id);
            self.dispatcher.cancel(&id);
        }
    }
}

/// Fans one query out to a set of peers and merges what comes back.
pub struct QueryCoordinator<D> {
    local_id: String,
    executor: Arc<dyn QueryExecutor>,
    dispatcher: D,
    peer_timeout: Duration,
}

impl<D: QueryDispatcher> QueryCoordinator<D> {
    pub fn new(
        local_id: impl Into<String>,
        executor: Arc<dyn QueryExecutor>,
        dispatcher: D,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            executor,
            dispatcher,
            peer_timeout,
        }
    }

    pub async fn execute(
        &self,
        query: &str,
        peers: &[String],
    ) -> LakeResult<QueryFanoutResponse> {
        let deadline = Instant::now() + self.peer_timeout;
        self.execute_with_deadline(query, peers, deadline).await
    }

    /// Every peer gets its own slot in the response, in request order. A peer that has not
    /// answered at `deadline` is reported as timed out.
    pub async fn execute_with_deadline(
        &self,
        query: &str,
        peers: &[String],
        deadline: Instant,
    ) -> LakeResult<QueryFanoutResponse> {
        let query = Self::normalize(query);
        if query.is_empty() {
            return Err(LakeError::InvalidArgument("query is empty".to_string()));
        }

        let mut targets: Vec<&str> = Vec::with_capacity(peers.len());
        for peer in peers.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
            if !targets.contains(&peer) {
                targets.push(peer);
            }
        }
        if targets.is_empty() {
            return Err(LakeError::InvalidArgument(
                "at least one peer is required".to_string(),
            ));
        }

        info!("fan out query to {:?}: {}", targets, query);
        let results = join_all(
            targets
                .iter()
                .map(|peer| self.query_peer(peer, query, deadline)),
        )
        .await;

        Ok(Self::merge(results))
    }

    fn normalize(query: &str) -> &str {
        let query = query.trim();
        query.strip_suffix(';').unwrap_or(query).trim_end()
    }

    async fn query_peer(&self, peer: &str, query: &str, deadline: Instant) -> PeerQueryResult {
        if peer == self.local_id {
            return match timeout_at(deadline, self.executor.execute(query)).await {
                Ok(Ok(output)) => PeerQueryResult::success(peer, output),
                Ok(Err(e)) => PeerQueryResult::failure(peer, e),
                Err(_) => PeerQueryResult::failure(peer, TIMEOUT_ERROR),
            };
        }

        let pending = match self.dispatcher.dispatch(peer, query).await {
            Ok(v) => v,
            Err(LakeError::Connection(msg)) | Err(LakeError::RouteNotFound(msg)) => {
                debug!("peer {} not reachable: {}", peer, msg);
                return PeerQueryResult::failure(peer, UNREACHABLE_ERROR);
            }
            Err(e) => return PeerQueryResult::failure(peer, e.to_string()),
        };

        let mut guard = CancelGuard {
            dispatcher: &self.dispatcher,
            query_id: Some(pending.id),
        };
        match timeout_at(deadline, pending.response).await {
            Ok(Ok(Ok(output))) => {
                guard.disarm();
                PeerQueryResult::success(peer, output)
            }
            Ok(Ok(Err(e))) => {
                guard.disarm();
                PeerQueryResult::failure(peer, e)
            }
            Ok(Err(_)) => {
                guard.disarm();
                PeerQueryResult::failure(peer, "query cancelled")
            }
            Err(_) => PeerQueryResult::failure(peer, TIMEOUT_ERROR),
        }
    }

    /// Concatenates the rows of successful peers. Columns come from the first success, a
    /// success with other columns is reported in `warnings`.
    pub fn merge(results: Vec<PeerQueryResult>) -> QueryFanoutResponse {
        let mut response = QueryFanoutResponse::default();

        for result in results.iter().filter(|v| v.success) {
            if !response.success {
                response.success = true;
                response.columns = result.columns.clone();
            } else if result.columns != response.columns {
                response.warnings.push(format!(
                    "peer {} returned columns [{}], expected [{}]",
                    result.peer_id,
                    result.columns.join(", "),
                    response.columns.join(", ")
                ));
            }
            response.rows.extend(result.rows.iter().cloned());
            response.total_rows += result.row_count;
        }

        if !response.success {
            response.error = Some("no peer answered the query".to_string());
        }
        response.results = results;
        response
    }
}
