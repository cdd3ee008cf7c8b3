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

use crate::utils::{ByteUnit, DurationUnit};
use crate::LakeResult;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Peer overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConf {
    // Address the listener binds to.
    pub hostname: String,

    // Host other peers should dial, sent in the handshake.
    pub advertise_host: String,

    pub port: u16,

    // Peers dialled at start, "host:port".
    pub bootstrap_peers: Vec<String>,

    // Dial peers learned from peer-list messages.
    pub auto_connect: bool,

    #[serde(skip)]
    pub heartbeat_interval: Duration,
    #[serde(alias = "heartbeat_interval")]
    pub heartbeat_interval_str: String,

    // A peer silent for longer than this is evicted.
    #[serde(skip)]
    pub stale_timeout: Duration,
    #[serde(alias = "stale_timeout")]
    pub stale_timeout_str: String,

    #[serde(skip)]
    pub connect_timeout: Duration,
    #[serde(alias = "connect_timeout")]
    pub connect_timeout_str: String,

    // Capacity of the gossip message id cache.
    pub dedup_cache_size: usize,

    #[serde(skip)]
    pub max_frame_size: u64,
    #[serde(alias = "max_frame_size")]
    pub max_frame_size_str: String,

    // Outbound queue per connection and node command queue.
    pub channel_size: usize,
}

impl NetworkConf {
    pub fn init(&mut self) -> LakeResult<()> {
        self.heartbeat_interval =
            DurationUnit::from_str(&self.heartbeat_interval_str)?.as_duration();
        self.stale_timeout = DurationUnit::from_str(&self.stale_timeout_str)?.as_duration();
        self.connect_timeout = DurationUnit::from_str(&self.connect_timeout_str)?.as_duration();
        self.max_frame_size = ByteUnit::from_str(&self.max_frame_size_str)?.as_byte();
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn advertise_addr(&self) -> String {
        format!("{}:{}", self.advertise_host, self.port)
    }
}

impl Default for NetworkConf {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            port: 9100,
            bootstrap_peers: vec![],
            auto_connect: true,

            heartbeat_interval: Duration::from_secs(30),
            heartbeat_interval_str: "30s".to_string(),

            stale_timeout: Duration::from_secs(60),
            stale_timeout_str: "60s".to_string(),

            connect_timeout: Duration::from_secs(5),
            connect_timeout_str: "5s".to_string(),

            dedup_cache_size: 1000,

            max_frame_size: 64 * ByteUnit::MB,
            max_frame_size_str: "64MB".to_string(),

            channel_size: 1024,
        }
    }
}
