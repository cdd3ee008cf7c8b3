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

use clap::Parser;
use log::{error, info};
use peerlake_common::conf::NodeConf;
use peerlake_common::utils::Logger;
use peerlake_common::version;
use peerlake_common::LakeResult;
use peerlake_server::node::Node;
use peerlake_server::query::MemTableExecutor;
use serde::Serialize;
use serde_json::{json, Map, Value};
use serde_with::skip_serializing_none;
use std::sync::Arc;

// Start a node:
// cargo run --bin peerlake-server -- --conf etc/peerlake.toml --port 9101 --bootstrap 127.0.0.1:9100
#[tokio::main]
async fn main() -> LakeResult<()> {
    let args = ServerArgs::parse();
    println!("server args {:?}", args);

    let conf = args.get_conf()?;
    Logger::init(conf.log.clone());
    conf.print();

    let node = Node::new(conf, Arc::new(MemTableExecutor::new())).await?;
    let handle = node.start().await?;
    info!(
        "peerlake node {} is running, advertise address {:?}",
        handle.node_id(),
        handle.advertise_addr()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("wait for shutdown signal failed: {}", e);
    }
    handle.stop().await
}

#[skip_serializing_none]
#[derive(Debug, Parser, Clone, Serialize)]
#[command(version = version::VERSION)]
pub struct ServerArgs {
    // Configuration file, falls back to $PEERLAKE_CONF_FILE.
    #[arg(short, long, help = "Configuration file path (optional)")]
    pub conf: Option<String>,

    #[arg(long, help = "Node id, generated when absent (optional)")]
    pub node_id: Option<String>,

    #[arg(long, help = "Listen hostname (optional)")]
    pub hostname: Option<String>,

    #[arg(short, long, help = "Listen port (optional)")]
    pub port: Option<u16>,

    #[arg(long, help = "Bootstrap peers, e.g. '10.0.0.1:9100,10.0.0.2:9100' (optional)")]
    pub bootstrap: Option<String>,

    #[arg(long, help = "Root directory of chunks and metadata (optional)")]
    pub data_dir: Option<String>,

    #[arg(long, help = "Log level, e.g. 'debug' (optional)")]
    pub log_level: Option<String>,
}

impl ServerArgs {
    fn overrides(&self) -> Value {
        let mut network = Map::new();
        if let Some(hostname) = &self.hostname {
            network.insert("hostname".to_string(), json!(hostname));
        }
        if let Some(port) = self.port {
            network.insert("port".to_string(), json!(port));
        }
        if let Some(bootstrap) = &self.bootstrap {
            let peers: Vec<&str> = bootstrap
                .split(',')
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .collect();
            network.insert("bootstrap_peers".to_string(), json!(peers));
        }

        let storage = match &self.data_dir {
            Some(dir) => {
                let dir = dir.trim_end_matches('/');
                json!({
                    "data_dir": format!("{}/chunks", dir),
                    "meta_dir": format!("{}/metadata", dir),
                })
            }
            None => json!({}),
        };

        json!({
            "node_id": self.node_id,
            "network": network,
            "storage": storage,
            "log": { "level": self.log_level },
        })
    }

    pub fn get_conf(&self) -> LakeResult<NodeConf> {
        let path = match &self.conf {
            Some(v) => Some(v.clone()),
            None => std::env::var(NodeConf::ENV_CONF_FILE).ok(),
        };
        let args = self.overrides().to_string();
        NodeConf::from(path, Some(&args))
    }
}
