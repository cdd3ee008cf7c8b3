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

use async_trait::async_trait;
use peerlake_common::state::{Dataset, QueryOutput};
use peerlake_common::LakeResult;

/// SQL engine of a node. Failures are reported as a plain message which is returned to the
/// querying peer unchanged.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, String>;

    /// Makes a stored dataset queryable. Engines that cannot read the format ignore it.
    async fn register_dataset(&self, _dataset: &Dataset, _data: &[u8]) -> LakeResult<()> {
        Ok(())
    }

    async fn unregister_dataset(&self, _dataset: &Dataset) -> LakeResult<()> {
        Ok(())
    }
}
