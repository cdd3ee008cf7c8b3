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

use std::io;
use thiserror::Error;
use tokio::time::error::Elapsed;

pub type LakeResult<T> = Result<T, LakeError>;

#[derive(Debug, Error)]
pub enum LakeError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("no route to node {0}")]
    RouteNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node is not running: {0}")]
    Closed(String),

    #[error("configuration error: {0}")]
    Conf(String),

    #[error(transparent)]
    IO(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Common(String),
}

impl LakeError {
    // Network level failures may succeed on a later attempt, storage failures never do.
    pub fn should_retry(&self) -> bool {
        matches!(self, LakeError::Connection(_) | LakeError::Timeout(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, LakeError::Integrity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LakeError::DatasetNotFound(_)
                | LakeError::ChunkNotFound(_)
                | LakeError::RouteNotFound(_)
        )
    }
}

impl From<String> for LakeError {
    fn from(value: String) -> Self {
        LakeError::Common(value)
    }
}

impl From<&str> for LakeError {
    fn from(value: &str) -> Self {
        LakeError::Common(value.to_string())
    }
}

impl From<Elapsed> for LakeError {
    fn from(value: Elapsed) -> Self {
        LakeError::Timeout(value.to_string())
    }
}

impl From<toml::de::Error> for LakeError {
    fn from(value: toml::de::Error) -> Self {
        LakeError::Conf(value.to_string())
    }
}

#[macro_export]
macro_rules! err_msg {
    ($($arg:tt)*) => {
        $crate::error::LakeError::Common(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! err_box {
    ($($arg:tt)*) => {
        Err($crate::err_msg!($($arg)*))
    };
}
