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

use crate::network::GossipCodec;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use peerlake_common::error::LakeError;
use peerlake_common::state::GossipMessage;
use peerlake_common::LakeResult;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

pub type ConnId = u64;

/// Completion of an explicit `connect`, resolved with the remote node id once it handshakes.
pub type DialReply = oneshot::Sender<LakeResult<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// An outbound dial that produced a connection.
#[derive(Debug)]
pub struct Dial {
    pub addr: String,
    pub reply: Option<DialReply>,
}

#[derive(Debug)]
pub enum NetworkEvent {
    Opened {
        conn: Connection,
        dial: Option<Dial>,
    },

    Frame {
        conn_id: ConnId,
        msg: GossipMessage,
    },

    Closed {
        conn_id: ConnId,
    },

    ConnectFailed {
        addr: String,
        error: LakeError,
        reply: Option<DialReply>,
    },
}

/// Handle of one TCP connection. Frames are queued to a writer task, received frames are
/// delivered to the node loop as `NetworkEvent::Frame`.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnId,
    remote_addr: SocketAddr,
    direction: Direction,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    max_frame_size: usize,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    // Never blocks, the caller is the node loop. A frame over the size limit is refused here
    // and the connection stays usable.
    pub fn send(&self, msg: GossipMessage) -> LakeResult<()> {
        let frame = Bytes::from(msg.encode()?);
        if frame.len() > self.max_frame_size {
            return Err(LakeError::InvalidArgument(format!(
                "{} frame of {} bytes exceeds the limit of {} bytes",
                msg.kind(),
                frame.len(),
                self.max_frame_size
            )));
        }

        match self.sender.try_send(frame) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(_)) => Err(LakeError::Connection(format!(
                "outbound queue of connection {} is full",
                self
            ))),
            Err(TrySendError::Closed(_)) => Err(LakeError::Connection(format!(
                "connection {} is closed",
                self
            ))),
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Token cutting both tasks of this connection, usable after the handle is dropped.
    pub fn closer(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// A connection backed only by its outbound queue, encoded frames are read from the
    /// returned receiver.
    pub fn in_memory(
        id: ConnId,
        remote_addr: SocketAddr,
        direction: Direction,
        queue_size: usize,
        max_frame_size: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let conn = Connection {
            id,
            remote_addr,
            direction,
            sender,
            cancel: CancellationToken::new(),
            max_frame_size,
        };
        (conn, receiver)
    }

    /// Splits `stream` into a reader and a writer task. The `Opened` event is delivered
    /// before any frame of this connection.
    pub async fn spawn(
        id: ConnId,
        stream: TcpStream,
        direction: Direction,
        dial: Option<Dial>,
        codec: GossipCodec,
        queue_size: usize,
        events: mpsc::Sender<NetworkEvent>,
    ) -> LakeResult<ConnId> {
        let remote_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (sender, mut receiver) = mpsc::channel::<Bytes>(queue_size.max(1));
        let cancel = CancellationToken::new();

        let conn = Connection {
            id,
            remote_addr,
            direction,
            sender,
            cancel: cancel.clone(),
            max_frame_size: codec.max_frame_size(),
        };
        if events
            .send(NetworkEvent::Opened {
                conn: conn.clone(),
                dial,
            })
            .await
            .is_err()
        {
            return Err(LakeError::Closed("network event channel".to_string()));
        }

        let mut writer = FramedWrite::new(write_half, codec.clone());
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = receiver.recv() => {
                        let Some(frame) = frame else { break; };
                        if let Err(e) = writer.send(frame).await {
                            warn!("connection {} write failed: {}", id, e);
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
            let _ = SinkExt::<Bytes>::close(&mut writer).await;
        });

        let mut reader = FramedRead::new(read_half, codec);
        tokio::spawn(async move {
            // The writer keeps draining its queue when only the node loop went away.
            let mut close_writer = true;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = reader.next() => {
                        let frame = match frame {
                            Some(Ok(v)) => v,
                            Some(Err(e)) => {
                                warn!("connection {} read failed: {}", id, e);
                                break;
                            }
                            None => break,
                        };

                        match GossipMessage::decode(&frame) {
                            Ok(msg) => {
                                if events.send(NetworkEvent::Frame { conn_id: id, msg }).await.is_err() {
                                    close_writer = false;
                                    break;
                                }
                            }
                            Err(e) => warn!("connection {} dropped malformed frame: {}", id, e),
                        }
                    }
                }
            }

            if close_writer {
                cancel.cancel();
            }
            debug!("connection {} from {} closed", id, remote_addr);
            let _ = events.send(NetworkEvent::Closed { conn_id: id }).await;
        });

        Ok(id)
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.id, self.remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlake_common::state::MessageBody;
    use serde_json::json;

    fn custom(size: usize) -> GossipMessage {
        GossipMessage::new(
            "a",
            MessageBody::Custom {
                kind: "blob".to_string(),
                payload: json!("x".repeat(size)),
            },
        )
    }

    #[test]
    fn oversized_frame_is_refused_without_closing() {
        let addr = "127.0.0.1:9100".parse().unwrap();
        let (conn, mut rx) = Connection::in_memory(1, addr, Direction::Outbound, 4, 256);

        let err = conn.send(custom(1024)).unwrap_err();
        assert!(matches!(err, LakeError::InvalidArgument(_)));
        assert!(!conn.is_closed());

        conn.send(custom(8)).unwrap();
        let frame = rx.try_recv().unwrap();
        assert_eq!(GossipMessage::decode(&frame).unwrap().kind(), "blob");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_is_an_error() {
        let addr = "127.0.0.1:9100".parse().unwrap();
        let (conn, _rx) = Connection::in_memory(1, addr, Direction::Inbound, 1, 1024);
        conn.send(custom(1)).unwrap();
        assert!(conn.send(custom(1)).is_err());
        assert_eq!(conn.direction(), Direction::Inbound);
    }
}
