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

use crate::error::{LakeError, LakeResult};
use crate::state::{DatasetAnnouncement, PeerEntry, QueryOutput, RouteAdvert};
use crate::utils::{LocalTime, Utils};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum MessageBody {
    Handshake {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        listen_addr: Option<String>,
    },

    PeerList {
        peers: Vec<PeerEntry>,
    },

    RouteDiscovery {
        routes: Vec<RouteAdvert>,
    },

    DataAnnouncement {
        dataset: DatasetAnnouncement,
    },

    #[serde(alias = "query-request")]
    DataQuery {
        id: String,
        #[serde(alias = "sql")]
        query: String,
        source_node: String,
    },

    #[serde(alias = "query-result")]
    DataResponse {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<QueryOutput>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Heartbeat {
        node_id: String,
    },

    SyncRequest {
        source_node: String,
    },

    PeerLeaving {
        node_id: String,
    },

    // Any type this node does not understand, kept as raw json and relayed untouched.
    #[serde(skip)]
    Custom {
        kind: String,
        payload: Value,
    },
}

impl MessageBody {
    pub const KNOWN_TYPES: [&'static str; 11] = [
        "handshake",
        "peer-list",
        "route-discovery",
        "data-announcement",
        "data-query",
        "query-request",
        "data-response",
        "query-result",
        "heartbeat",
        "sync-request",
        "peer-leaving",
    ];

    pub fn is_known(kind: &str) -> bool {
        Self::KNOWN_TYPES.contains(&kind)
    }

    pub fn kind(&self) -> &str {
        match self {
            MessageBody::Handshake { .. } => "handshake",
            MessageBody::PeerList { .. } => "peer-list",
            MessageBody::RouteDiscovery { .. } => "route-discovery",
            MessageBody::DataAnnouncement { .. } => "data-announcement",
            MessageBody::DataQuery { .. } => "data-query",
            MessageBody::DataResponse { .. } => "data-response",
            MessageBody::Heartbeat { .. } => "heartbeat",
            MessageBody::SyncRequest { .. } => "sync-request",
            MessageBody::PeerLeaving { .. } => "peer-leaving",
            MessageBody::Custom { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    relay: bool,
    #[serde(default)]
    timestamp: u64,
}

const ENVELOPE_KEYS: [&str; 6] = [
    "type",
    "messageId",
    "sourceNodeId",
    "destination",
    "relay",
    "timestamp",
];

fn is_false(v: &bool) -> bool {
    !*v
}

/// One wire frame of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub relay: bool,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl GossipMessage {
    pub fn new(source: impl Into<String>, body: MessageBody) -> Self {
        Self {
            message_id: None,
            source_node_id: Some(source.into()),
            destination: None,
            relay: false,
            timestamp: LocalTime::mills(),
            body,
        }
    }

    pub fn with_id(mut self) -> Self {
        if self.message_id.is_none() {
            self.message_id = Some(Utils::uuid());
        }
        self
    }

    pub fn with_relay(mut self) -> Self {
        self.relay = true;
        self
    }

    pub fn with_destination(mut self, node_id: impl Into<String>) -> Self {
        self.destination = Some(node_id.into());
        self
    }

    pub fn kind(&self) -> &str {
        self.body.kind()
    }

    pub fn source(&self) -> &str {
        self.source_node_id.as_deref().unwrap_or("")
    }

    pub fn encode(&self) -> LakeResult<Vec<u8>> {
        match &self.body {
            MessageBody::Custom { kind, payload } => {
                let mut map = match serde_json::to_value(self.envelope())? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                map.insert("type".to_string(), Value::String(kind.clone()));
                match payload {
                    Value::Object(fields) => {
                        for (k, v) in fields {
                            if !ENVELOPE_KEYS.contains(&k.as_str()) {
                                map.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    Value::Null => (),
                    other => {
                        map.insert("payload".to_string(), other.clone());
                    }
                }
                Ok(serde_json::to_vec(&Value::Object(map))?)
            }

            _ => Ok(serde_json::to_vec(self)?),
        }
    }

    pub fn decode(bytes: &[u8]) -> LakeResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let kind = match value.get("type").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                return Err(LakeError::InvalidArgument(
                    "message without type".to_string(),
                ))
            }
        };

        if MessageBody::is_known(&kind) {
            return Ok(serde_json::from_value(value)?);
        }

        let envelope: Envelope = serde_json::from_value(value.clone())?;
        let payload = match value {
            Value::Object(mut map) => {
                for key in ENVELOPE_KEYS {
                    map.remove(key);
                }
                Value::Object(map)
            }
            _ => Value::Null,
        };

        Ok(Self {
            message_id: envelope.message_id,
            source_node_id: envelope.source_node_id,
            destination: envelope.destination,
            relay: envelope.relay,
            timestamp: envelope.timestamp,
            body: MessageBody::Custom { kind, payload },
        })
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            message_id: self.message_id.clone(),
            source_node_id: self.source_node_id.clone(),
            destination: self.destination.clone(),
            relay: self.relay,
            timestamp: self.timestamp,
        }
    }
}

impl Display for GossipMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type = {}, id = {}, source = {}",
            self.kind(),
            self.message_id.as_deref().unwrap_or("-"),
            self.source()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_legacy_query_names() {
        let raw = json!({
            "type": "query-request",
            "messageId": "m1",
            "sourceNodeId": "a",
            "timestamp": 1,
            "id": "q1",
            "sql": "SELECT * FROM t",
            "sourceNode": "a"
        });
        let msg = GossipMessage::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(msg.kind(), "data-query");
        assert!(!msg.relay);
        match msg.body {
            MessageBody::DataQuery { id, query, .. } => {
                assert_eq!(id, "q1");
                assert_eq!(query, "SELECT * FROM t");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn envelope_fields_are_camel_case() {
        let msg = GossipMessage::new(
            "a",
            MessageBody::Heartbeat {
                node_id: "a".to_string(),
            },
        );
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["sourceNodeId"], "a");
        assert_eq!(value["nodeId"], "a");
        assert!(value.get("messageId").is_none());
        assert!(value.get("relay").is_none());
    }

    #[test]
    fn unknown_type_passes_through() {
        let raw = json!({
            "type": "metrics-report",
            "messageId": "m9",
            "sourceNodeId": "b",
            "relay": true,
            "timestamp": 5,
            "cpu": 0.5
        });
        let msg = GossipMessage::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(msg.kind(), "metrics-report");
        assert!(msg.relay);
        assert_eq!(msg.message_id.as_deref(), Some("m9"));

        let back: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn reject_frames_without_type() {
        let err = GossipMessage::decode(br#"{"nodeId":"a"}"#).unwrap_err();
        assert!(matches!(err, LakeError::InvalidArgument(_)));
        assert!(GossipMessage::decode(b"not json").is_err());
    }
}
