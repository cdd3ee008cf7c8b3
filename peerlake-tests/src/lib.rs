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

use futures::{SinkExt, StreamExt};
use peerlake_common::conf::NodeConf;
use peerlake_common::error::LakeError;
use peerlake_common::state::{GossipMessage, MessageBody};
use peerlake_common::utils::Logger;
use peerlake_common::LakeResult;
use peerlake_server::network::GossipCodec;
use peerlake_server::node::{Node, NodeEvent, NodeHandle};
use peerlake_server::query::MemTableExecutor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Helpers starting in-process nodes on ephemeral localhost ports.
pub struct Testing;

impl Testing {
    pub fn conf(node_id: &str) -> LakeResult<NodeConf> {
        Logger::default();
        let mut conf = NodeConf::with_test(node_id);
        conf.init()?;
        Ok(conf)
    }

    pub async fn start_node(node_id: &str) -> LakeResult<NodeHandle> {
        Self::start_with_conf(Self::conf(node_id)?).await
    }

    pub async fn start_with_conf(conf: NodeConf) -> LakeResult<NodeHandle> {
        let node = Node::new(conf, Arc::new(MemTableExecutor::new())).await?;
        node.start().await
    }

    /// Dials `to` from `from` and waits until both sides list each other.
    pub async fn link(from: &NodeHandle, to: &NodeHandle) -> LakeResult<()> {
        let addr = Self::addr(to)?;
        let remote = from.connect(addr).await?;
        assert_eq!(remote, to.node_id());

        let from_id = from.node_id();
        let linked = Self::wait_until(|| async move {
            to.peers()
                .await
                .map(|v| v.iter().any(|p| p.node_id == from_id))
                .unwrap_or(false)
        })
        .await;
        if linked {
            Ok(())
        } else {
            Err(LakeError::Timeout(format!(
                "{} never saw {}",
                to.node_id(),
                from_id
            )))
        }
    }

    pub fn addr(node: &NodeHandle) -> LakeResult<String> {
        node.advertise_addr()
            .map(|v| v.to_string())
            .ok_or_else(|| LakeError::Connection(format!("{} has no listener", node.node_id())))
    }

    /// Polls `f` until it returns true or `WAIT_TIMEOUT` elapses.
    pub async fn wait_until<F, Fut>(mut f: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if f().await {
                return true;
            }
            sleep(Duration::from_millis(25)).await;
        }
        false
    }

    /// Collects the events published during `window`.
    pub async fn collect_events(
        rx: &mut broadcast::Receiver<NodeEvent>,
        window: Duration,
    ) -> Vec<NodeEvent> {
        let deadline = Instant::now() + window;
        let mut events = vec![];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            match timeout(left, rx.recv()).await {
                Ok(Ok(event)) => events.push(event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }
        events
    }

    pub fn csv(rows: &[(&str, i64)]) -> Vec<u8> {
        let mut data = String::from("region,amount\n");
        for (region, amount) in rows {
            data.push_str(&format!("{},{}\n", region, amount));
        }
        data.into_bytes()
    }
}

/// A hand driven peer speaking the wire protocol over a plain socket.
pub struct RawPeer {
    pub node_id: String,
    framed: Framed<TcpStream, GossipCodec>,
}

impl RawPeer {
    pub async fn connect(addr: &str, node_id: &str) -> LakeResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut peer = Self {
            node_id: node_id.to_string(),
            framed: Framed::new(stream, GossipCodec::new(64 * 1024 * 1024)),
        };
        peer.send(GossipMessage::new(
            node_id,
            MessageBody::Handshake {
                node_id: node_id.to_string(),
                listen_addr: None,
            },
        ))
        .await?;
        Ok(peer)
    }

    pub async fn send(&mut self, msg: GossipMessage) -> LakeResult<()> {
        self.framed.send(msg).await
    }

    /// Next frame of type `kind`, skipping others.
    pub async fn recv_kind(&mut self, kind: &str) -> LakeResult<GossipMessage> {
        let wait = async {
            while let Some(frame) = self.framed.next().await {
                let msg = GossipMessage::decode(&frame?)?;
                if msg.kind() == kind {
                    return Ok(msg);
                }
            }
            Err(LakeError::Connection("stream closed".to_string()))
        };
        timeout(WAIT_TIMEOUT, wait).await?
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> LakeResult<()> {
        use tokio::io::AsyncWriteExt;
        let stream = self.framed.get_mut();
        stream.write_u32(bytes.len() as u32).await?;
        stream.write_all(bytes).await?;
        Ok(())
    }
}
