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
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub type DatasetMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Json,
    Parquet,
    Text,
    Xml,
    Unknown,
}

impl DataFormat {
    /// Maps a file extension onto the closed set of known formats.
    pub fn detect(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => DataFormat::Csv,
            Some("json") => DataFormat::Json,
            Some("parquet") => DataFormat::Parquet,
            Some("txt") => DataFormat::Text,
            Some("xml") => DataFormat::Xml,
            _ => DataFormat::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Parquet => "parquet",
            DataFormat::Text => "text",
            DataFormat::Xml => "xml",
            DataFormat::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != DataFormat::Unknown
    }
}

impl Display for DataFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Active,
    Deleting,
}

/// Persisted dataset record, `<id>.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub filename: String,
    pub format: DataFormat,
    pub original_size: u64,
    pub checksum: String,
    // Ordered by chunk index, never changed after creation.
    pub chunk_ids: Vec<String>,
    pub replication_factor: u32,
    pub status: DatasetStatus,
    #[serde(default)]
    pub metadata: DatasetMetadata,
    pub created_at: u64,
}

impl Dataset {
    pub fn is_active(&self) -> bool {
        self.status == DatasetStatus::Active
    }

    /// File stem used as the table name by query executors.
    pub fn table_name(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|v| v.to_str())
            .unwrap_or(&self.filename)
            .to_string()
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            id: self.id.clone(),
            filename: self.filename.clone(),
            format: self.format,
            size: self.original_size,
            chunks: self.chunk_ids.len(),
            status: self.status,
            created_at: self.created_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// A verified dataset payload with the record it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetData {
    pub dataset: Dataset,
    pub data: Vec<u8>,
}

/// Persisted chunk record, `<id>.chunk.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub id: String,
    pub dataset_id: String,
    pub index: u32,
    pub size: u64,
    pub checksum: String,
    pub path: String,
    pub created_at: u64,
}

/// Listing projection of a dataset, never carries chunk bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub id: String,
    pub filename: String,
    pub format: DataFormat,
    pub size: u64,
    pub chunks: usize,
    pub status: DatasetStatus,
    pub created_at: u64,
    pub metadata: DatasetMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_datasets: usize,
    pub total_chunks: usize,
    pub total_size: u64,
}

impl StorageStats {
    pub fn formatted_size(&self) -> String {
        ByteUnit::byte_to_string(self.total_size)
    }
}

/// Dataset advertised to the overlay by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetAnnouncement {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub metadata: DatasetMetadata,
    pub node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(DataFormat::detect("sales.csv"), DataFormat::Csv);
        assert_eq!(DataFormat::detect("SALES.CSV"), DataFormat::Csv);
        assert_eq!(DataFormat::detect("events.json"), DataFormat::Json);
        assert_eq!(DataFormat::detect("part-0.parquet"), DataFormat::Parquet);
        assert_eq!(DataFormat::detect("notes.txt"), DataFormat::Text);
        assert_eq!(DataFormat::detect("feed.xml"), DataFormat::Xml);
        assert_eq!(DataFormat::detect("archive.tar.gz"), DataFormat::Unknown);
        assert_eq!(DataFormat::detect("README"), DataFormat::Unknown);
        assert!(!DataFormat::detect("README").is_known());
    }

    #[test]
    fn table_name_strips_extension() {
        let dataset = Dataset {
            id: "d1".to_string(),
            filename: "sales_2024.csv".to_string(),
            format: DataFormat::Csv,
            original_size: 0,
            checksum: "".to_string(),
            chunk_ids: vec![],
            replication_factor: 3,
            status: DatasetStatus::Active,
            metadata: Default::default(),
            created_at: 0,
        };
        assert_eq!(dataset.table_name(), "sales_2024");
        assert_eq!(dataset.summary().chunks, 0);
    }
}
