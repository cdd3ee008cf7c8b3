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

use crate::conf::{LogConf, NetworkConf, QueryConf, StorageConf};
use crate::utils::Utils;
use crate::{err_box, LakeResult};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Configuration of a single peerlake node, loaded from a TOML file.
///
/// ```toml
/// node_id = "node-a"
///
/// [network]
/// port = 9100
/// bootstrap_peers = ["10.0.0.2:9100"]
/// heartbeat_interval = "30s"
///
/// [storage]
/// data_dir = "/data/peerlake/chunks"
/// chunk_size = "1MB"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConf {
    // Generated at init when empty.
    pub node_id: String,

    pub network: NetworkConf,

    pub storage: StorageConf,

    pub query: QueryConf,

    pub log: LogConf,
}

impl NodeConf {
    pub const ENV_CONF_FILE: &'static str = "PEERLAKE_CONF_FILE";

    /// Reads `path` (when given) and overlays `args`, a JSON document with the same layout
    /// as the file. Null values in `args` leave the file value untouched.
    pub fn from<T: AsRef<Path>>(path: Option<T>, args: Option<&str>) -> LakeResult<Self> {
        let mut value = match path {
            Some(path) => {
                let path = path.as_ref();
                if !path.exists() {
                    return err_box!("configuration file {} does not exist", path.display());
                }
                let content = fs::read_to_string(path)?;
                let table: toml::Value = toml::from_str(&content)?;
                serde_json::to_value(table)?
            }
            None => Value::Object(Default::default()),
        };

        if let Some(args) = args {
            let overlay: Value = serde_json::from_str(args)?;
            Self::merge(&mut value, overlay);
        }

        let mut conf: NodeConf = serde_json::from_value(value)?;
        conf.init()?;
        Ok(conf)
    }

    pub fn init(&mut self) -> LakeResult<()> {
        if self.node_id.trim().is_empty() {
            self.node_id = Utils::uuid();
        }
        self.network.init()?;
        self.storage.init()?;
        self.query.init()?;
        Ok(())
    }

    /// Configuration for tests: ephemeral port, private directories and short timers.
    pub fn with_test(name: impl AsRef<str>) -> Self {
        let mut conf = NodeConf {
            node_id: name.as_ref().to_string(),
            storage: StorageConf::with_root(Utils::test_dir(name.as_ref())),
            ..Default::default()
        };
        conf.network.hostname = "127.0.0.1".to_string();
        conf.network.port = 0;
        conf.network.heartbeat_interval_str = "200ms".to_string();
        conf.network.stale_timeout_str = "2s".to_string();
        conf.network.connect_timeout_str = "1s".to_string();
        conf.query.peer_timeout_str = "2s".to_string();
        conf
    }

    pub fn print(&self) {
        match toml::to_string_pretty(self) {
            Ok(v) => info!("node configuration:\n{}", v),
            Err(e) => info!("node configuration {:?}, format error: {}", self, e),
        }
    }

    fn merge(base: &mut Value, overlay: Value) {
        match (base, overlay) {
            (Value::Object(base), Value::Object(overlay)) => {
                for (k, v) in overlay {
                    if v.is_null() {
                        continue;
                    }
                    match base.get_mut(&k) {
                        Some(existing) => Self::merge(existing, v),
                        None => {
                            let mut value = Value::Object(Default::default());
                            Self::merge(&mut value, v);
                            base.insert(k, value);
                        }
                    }
                }
            }
            (base, overlay) => {
                if !overlay.is_null() {
                    *base = overlay;
                }
            }
        }
    }
}

impl Default for NodeConf {
    fn default() -> Self {
        Self {
            node_id: "".to_string(),
            network: NetworkConf::default(),
            storage: StorageConf::default(),
            query: QueryConf::default(),
            log: LogConf::default(),
        }
    }
}
