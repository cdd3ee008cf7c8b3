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

use crate::utils::DurationUnit;
use crate::LakeResult;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConf {
    // Deadline for a single peer inside a fan-out.
    #[serde(skip)]
    pub peer_timeout: Duration,
    #[serde(alias = "peer_timeout")]
    pub peer_timeout_str: String,
}

impl QueryConf {
    pub fn init(&mut self) -> LakeResult<()> {
        self.peer_timeout = DurationUnit::from_str(&self.peer_timeout_str)?.as_duration();
        Ok(())
    }
}

impl Default for QueryConf {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(10),
            peer_timeout_str: "10s".to_string(),
        }
    }
}
