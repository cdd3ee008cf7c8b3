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

use crate::utils::ByteUnit;
use crate::{err_box, LakeResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConf {
    // One file per chunk.
    pub data_dir: String,

    // Chunk and dataset metadata records.
    pub meta_dir: String,

    #[serde(skip)]
    pub chunk_size: u64,
    #[serde(alias = "chunk_size")]
    pub chunk_size_str: String,

    pub replication_factor: u32,
}

impl StorageConf {
    pub fn init(&mut self) -> LakeResult<()> {
        self.chunk_size = ByteUnit::from_str(&self.chunk_size_str)?.as_byte();
        if self.chunk_size == 0 {
            return err_box!("chunk_size must be greater than 0");
        }
        Ok(())
    }

    pub fn with_root(root: impl AsRef<str>) -> Self {
        let root = root.as_ref().trim_end_matches('/');
        Self {
            data_dir: format!("{}/chunks", root),
            meta_dir: format!("{}/metadata", root),
            ..Default::default()
        }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            data_dir: "data/chunks".to_string(),
            meta_dir: "data/metadata".to_string(),
            chunk_size: ByteUnit::MB,
            chunk_size_str: "1MB".to_string(),
            replication_factor: 3,
        }
    }
}
