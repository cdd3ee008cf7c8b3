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

use crate::network::{ConnId, Connection, Dial, DialReply, Direction, GossipCodec, NetworkEvent};
use log::{error, info, warn};
use peerlake_common::conf::NetworkConf;
use peerlake_common::error::LakeError;
use peerlake_common::LakeResult;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Owns the listener and outbound dials. Every socket it produces is handed to the node loop
/// through `NetworkEvent`s, nothing here keeps per-peer state.
pub struct PeerManager {
    conf: NetworkConf,
    next_id: AtomicU64,
    events: mpsc::Sender<NetworkEvent>,
    shutdown: CancellationToken,
}

impl PeerManager {
    pub fn new(conf: NetworkConf, events: mpsc::Sender<NetworkEvent>) -> Arc<Self> {
        Arc::new(Self {
            conf,
            next_id: AtomicU64::new(1),
            events,
            shutdown: CancellationToken::new(),
        })
    }

    fn next_conn_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn codec(&self) -> GossipCodec {
        GossipCodec::new(self.conf.max_frame_size)
    }

    /// Binds the listener and spawns the accept loop, returns the bound address.
    pub async fn start_listening(self: &Arc<Self>) -> LakeResult<SocketAddr> {
        let listener = TcpListener::bind(self.conf.bind_addr())
            .await
            .map_err(|e| {
                LakeError::Connection(format!("bind {} failed: {}", self.conf.bind_addr(), e))
            })?;
        let local_addr = listener.local_addr()?;
        info!("peer listener started on {}", local_addr);

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            info!("accepted connection from {}", addr);
                            manager.spawn_connection(stream, Direction::Inbound, None).await;
                        }
                        Err(e) => error!("accept on {} failed: {}", local_addr, e),
                    }
                }
            }
            info!("peer listener on {} stopped", local_addr);
        });

        Ok(local_addr)
    }

    /// Dials `addr` in the background. The outcome arrives as `Opened` or `ConnectFailed`.
    pub fn connect_to(self: &Arc<Self>, addr: impl Into<String>, reply: Option<DialReply>) {
        let addr = addr.into();
        let manager = self.clone();
        tokio::spawn(async move {
            let dialed = timeout(manager.conf.connect_timeout, TcpStream::connect(&addr)).await;
            let error = match dialed {
                Ok(Ok(stream)) => {
                    let dial = Dial { addr, reply };
                    manager
                        .spawn_connection(stream, Direction::Outbound, Some(dial))
                        .await;
                    return;
                }
                Ok(Err(e)) => LakeError::Connection(format!("connect to {} failed: {}", addr, e)),
                Err(_) => LakeError::Timeout(format!(
                    "connect to {} exceeded {:?}",
                    addr, manager.conf.connect_timeout
                )),
            };

            warn!("{}", error);
            let _ = manager
                .events
                .send(NetworkEvent::ConnectFailed { addr, error, reply })
                .await;
        });
    }

    async fn spawn_connection(&self, stream: TcpStream, direction: Direction, dial: Option<Dial>) {
        let id = self.next_conn_id();
        let res = Connection::spawn(
            id,
            stream,
            direction,
            dial,
            self.codec(),
            self.conf.channel_size,
            self.events.clone(),
        )
        .await;

        if let Err(e) = res {
            warn!("connection {} setup failed: {}", id, e);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
