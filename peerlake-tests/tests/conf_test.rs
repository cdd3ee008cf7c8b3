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

use peerlake_common::conf::NodeConf;
use peerlake_common::utils::ByteUnit;
use peerlake_common::LakeResult;
use std::path::PathBuf;
use std::time::Duration;

fn sample_conf() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("etc")
        .join("peerlake.toml")
}

#[test]
fn sample_file_parses() -> LakeResult<()> {
    let conf = NodeConf::from(Some(sample_conf()), None)?;
    assert_eq!(conf.node_id, "node-a");
    assert_eq!(conf.network.port, 9100);
    assert_eq!(conf.network.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(conf.network.stale_timeout, Duration::from_secs(60));
    assert_eq!(conf.network.max_frame_size, 64 * ByteUnit::MB);
    assert_eq!(conf.storage.chunk_size, ByteUnit::MB);
    assert_eq!(conf.query.peer_timeout, Duration::from_secs(10));
    Ok(())
}

#[test]
fn command_line_overrides_file() -> LakeResult<()> {
    let args = r#"{"node_id": "node-b", "network": {"port": 9200, "bootstrap_peers": ["127.0.0.1:9100"]}, "log": {"level": null}}"#;
    let conf = NodeConf::from(Some(sample_conf()), Some(args))?;
    assert_eq!(conf.node_id, "node-b");
    assert_eq!(conf.network.port, 9200);
    assert_eq!(conf.network.bootstrap_peers, vec!["127.0.0.1:9100"]);
    assert_eq!(conf.network.hostname, "0.0.0.0");
    assert_eq!(conf.log.level, "info");
    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    assert!(NodeConf::from(Some("/nonexistent/peerlake.toml"), None).is_err());
}
