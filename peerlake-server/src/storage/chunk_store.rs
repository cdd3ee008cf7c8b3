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

use log::{debug, info, warn};
use peerlake_common::conf::StorageConf;
use peerlake_common::error::LakeError;
use peerlake_common::state::{
    ChunkMeta, DataFormat, Dataset, DatasetData, DatasetMetadata, DatasetStatus, DatasetSummary,
    StorageStats,
};
use peerlake_common::sync::FastDashMap;
use peerlake_common::utils::{ByteUnit, LocalTime, Utils};
use peerlake_common::LakeResult;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const CHUNK_SUFFIX: &str = ".chunk";
const CHUNK_META_SUFFIX: &str = ".chunk.meta.json";
const DATASET_META_SUFFIX: &str = ".meta.json";

/// Content checked dataset storage. A dataset is split into fixed size chunks, every chunk and
/// the whole payload carry a SHA-256 digest that is verified on each read.
///
/// Layout:
/// - `<data_dir>/<chunk_id>.chunk`
/// - `<meta_dir>/<chunk_id>.chunk.meta.json`
/// - `<meta_dir>/<dataset_id>.meta.json`
pub struct ChunkStore {
    data_dir: PathBuf,
    meta_dir: PathBuf,
    chunk_size: usize,
    replication_factor: u32,
    datasets: FastDashMap<String, Dataset>,
    chunks: FastDashMap<String, ChunkMeta>,
}

impl ChunkStore {
    /// Creates the directories and reloads every persisted record.
    pub async fn open(conf: &StorageConf) -> LakeResult<Self> {
        if conf.chunk_size == 0 {
            return Err(LakeError::Conf("chunk size must be positive".to_string()));
        }

        let store = Self {
            data_dir: PathBuf::from(&conf.data_dir),
            meta_dir: PathBuf::from(&conf.meta_dir),
            chunk_size: conf.chunk_size as usize,
            replication_factor: conf.replication_factor,
            datasets: FastDashMap::default(),
            chunks: FastDashMap::default(),
        };
        fs::create_dir_all(&store.data_dir).await?;
        fs::create_dir_all(&store.meta_dir).await?;
        store.reload().await?;

        info!(
            "chunk store opened, data_dir = {}, meta_dir = {}, datasets = {}, chunks = {}",
            store.data_dir.display(),
            store.meta_dir.display(),
            store.datasets.len(),
            store.chunks.len()
        );
        Ok(store)
    }

    async fn reload(&self) -> LakeResult<()> {
        let mut dir = fs::read_dir(&self.meta_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();

            if name.ends_with(CHUNK_META_SUFFIX) {
                match Self::read_json::<ChunkMeta>(&path).await {
                    Ok(meta) => {
                        self.chunks.insert(meta.id.clone(), meta);
                    }
                    Err(e) => warn!("skip chunk record {}: {}", path.display(), e),
                }
            } else if name.ends_with(DATASET_META_SUFFIX) {
                match Self::read_json::<Dataset>(&path).await {
                    Ok(dataset) if dataset.is_active() => {
                        self.datasets.insert(dataset.id.clone(), dataset);
                    }
                    Ok(dataset) => warn!("skip dataset {} left in deleting state", dataset.id),
                    Err(e) => warn!("skip dataset record {}: {}", path.display(), e),
                }
            }
        }
        Ok(())
    }

    pub fn chunk_path(&self, chunk_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", chunk_id, CHUNK_SUFFIX))
    }

    fn chunk_meta_path(&self, chunk_id: &str) -> PathBuf {
        self.meta_dir
            .join(format!("{}{}", chunk_id, CHUNK_META_SUFFIX))
    }

    fn dataset_meta_path(&self, dataset_id: &str) -> PathBuf {
        self.meta_dir
            .join(format!("{}{}", dataset_id, DATASET_META_SUFFIX))
    }

    pub fn detect_format(filename: &str) -> DataFormat {
        DataFormat::detect(filename)
    }

    /// Persists `data` as a new dataset and returns its id.
    pub async fn store(
        &self,
        filename: &str,
        data: &[u8],
        metadata: DatasetMetadata,
    ) -> LakeResult<String> {
        if filename.trim().is_empty() {
            return Err(LakeError::InvalidArgument(
                "filename must not be empty".to_string(),
            ));
        }

        let dataset_id = Utils::uuid();
        let now = LocalTime::mills();
        let mut chunk_ids = Vec::with_capacity(data.len().div_ceil(self.chunk_size));

        for (index, piece) in data.chunks(self.chunk_size).enumerate() {
            let chunk_id = Utils::uuid();
            let path = self.chunk_path(&chunk_id);
            let meta = ChunkMeta {
                id: chunk_id.clone(),
                dataset_id: dataset_id.clone(),
                index: index as u32,
                size: piece.len() as u64,
                checksum: Utils::sha256_hex(piece),
                path: path.to_string_lossy().to_string(),
                created_at: now,
            };

            chunk_ids.push(chunk_id.clone());
            let written = match fs::write(&path, piece).await {
                Ok(_) => Self::write_json(&self.chunk_meta_path(&chunk_id), &meta).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                warn!("store {} failed at chunk {}: {}", filename, index, e);
                self.remove_chunk_files(&chunk_ids).await;
                return Err(e);
            }
            self.chunks.insert(chunk_id, meta);
        }

        let dataset = Dataset {
            id: dataset_id.clone(),
            filename: filename.to_string(),
            format: Self::detect_format(filename),
            original_size: data.len() as u64,
            checksum: Utils::sha256_hex(data),
            chunk_ids,
            replication_factor: self.replication_factor,
            status: DatasetStatus::Active,
            metadata,
            created_at: now,
        };

        if let Err(e) = Self::write_json(&self.dataset_meta_path(&dataset_id), &dataset).await {
            self.remove_chunk_files(&dataset.chunk_ids).await;
            return Err(e);
        }

        info!(
            "stored dataset {} ({}), {} in {} chunks",
            dataset_id,
            filename,
            ByteUnit::byte_to_string(dataset.original_size),
            dataset.chunk_ids.len()
        );
        self.datasets.insert(dataset_id.clone(), dataset);
        Ok(dataset_id)
    }

    /// Reassembles a dataset, every chunk and the full payload are verified before any byte
    /// is returned. The record is the snapshot the chunks were read from.
    pub async fn retrieve(&self, dataset_id: &str) -> LakeResult<DatasetData> {
        let dataset = self.info(dataset_id)?;

        let mut pieces = Vec::with_capacity(dataset.chunk_ids.len());
        for chunk_id in &dataset.chunk_ids {
            let meta = match self.chunks.get(chunk_id) {
                Some(v) => v.clone(),
                None => return Err(LakeError::ChunkNotFound(chunk_id.clone())),
            };

            let bytes = match fs::read(self.chunk_path(chunk_id)).await {
                Ok(v) => v,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(LakeError::ChunkNotFound(chunk_id.clone()))
                }
                Err(e) => return Err(e.into()),
            };

            if bytes.len() as u64 != meta.size {
                return Err(LakeError::Integrity(format!(
                    "chunk {} has {} bytes, expected {}",
                    chunk_id,
                    bytes.len(),
                    meta.size
                )));
            }
            if Utils::sha256_hex(&bytes) != meta.checksum {
                return Err(LakeError::Integrity(format!(
                    "chunk {} checksum mismatch",
                    chunk_id
                )));
            }
            pieces.push((meta.index, bytes));
        }

        pieces.sort_by_key(|(index, _)| *index);
        let mut data = Vec::with_capacity(dataset.original_size as usize);
        for (_, bytes) in pieces {
            data.extend_from_slice(&bytes);
        }

        if Utils::sha256_hex(&data) != dataset.checksum {
            return Err(LakeError::Integrity(format!(
                "dataset {} checksum mismatch",
                dataset_id
            )));
        }
        Ok(DatasetData { dataset, data })
    }

    pub fn info(&self, dataset_id: &str) -> LakeResult<Dataset> {
        match self.datasets.get(dataset_id) {
            Some(v) if v.is_active() => Ok(v.clone()),
            _ => Err(LakeError::DatasetNotFound(dataset_id.to_string())),
        }
    }

    /// Chunk records of a dataset ordered by index.
    pub fn chunks(&self, dataset_id: &str) -> LakeResult<Vec<ChunkMeta>> {
        let dataset = self.info(dataset_id)?;
        let mut chunks: Vec<ChunkMeta> = dataset
            .chunk_ids
            .iter()
            .filter_map(|id| self.chunks.get(id).map(|v| v.clone()))
            .collect();
        chunks.sort_by_key(|v| v.index);
        Ok(chunks)
    }

    pub fn list(&self) -> Vec<DatasetSummary> {
        let mut list: Vec<DatasetSummary> = self
            .datasets
            .iter()
            .filter(|v| v.is_active())
            .map(|v| v.summary())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Active datasets, for loading into a query executor.
    pub fn datasets(&self) -> Vec<Dataset> {
        let mut list: Vec<Dataset> = self
            .datasets
            .iter()
            .filter(|v| v.is_active())
            .map(|v| v.clone())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Case-insensitive match over filename and metadata keys and values.
    pub fn search(&self, text: &str) -> Vec<DatasetSummary> {
        let needle = text.to_lowercase();
        self.list()
            .into_iter()
            .filter(|v| {
                v.filename.to_lowercase().contains(&needle)
                    || v.metadata.iter().any(|(k, val)| {
                        k.to_lowercase().contains(&needle) || val.to_lowercase().contains(&needle)
                    })
            })
            .collect()
    }

    pub fn stats(&self) -> StorageStats {
        let mut stats = StorageStats::default();
        for dataset in self.datasets.iter().filter(|v| v.is_active()) {
            stats.total_datasets += 1;
            stats.total_chunks += dataset.chunk_ids.len();
            stats.total_size += dataset.original_size;
        }
        stats
    }

    /// Removes the chunks, then the dataset record. Chunk removal is best effort.
    pub async fn delete(&self, dataset_id: &str) -> LakeResult<Dataset> {
        let dataset = match self.datasets.get_mut(dataset_id) {
            Some(mut v) if v.is_active() => {
                v.status = DatasetStatus::Deleting;
                v.clone()
            }
            _ => return Err(LakeError::DatasetNotFound(dataset_id.to_string())),
        };

        self.remove_chunk_files(&dataset.chunk_ids).await;
        Self::remove_file(&self.dataset_meta_path(dataset_id)).await;
        self.datasets.remove(dataset_id);

        info!("deleted dataset {} ({})", dataset_id, dataset.filename);
        Ok(dataset)
    }

    async fn remove_chunk_files(&self, chunk_ids: &[String]) {
        for chunk_id in chunk_ids {
            Self::remove_file(&self.chunk_path(chunk_id)).await;
            Self::remove_file(&self.chunk_meta_path(chunk_id)).await;
            self.chunks.remove(chunk_id);
        }
    }

    async fn remove_file(path: &Path) {
        match fs::remove_file(path).await {
            Ok(_) => debug!("removed {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => warn!("remove {} failed: {}", path.display(), e),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> LakeResult<T> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // Written to a temporary file first so a crash never leaves a truncated record.
    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> LakeResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(chunk_size: &str) -> (ChunkStore, String) {
        let root = Utils::test_dir("store");
        let mut conf = StorageConf::with_root(&root);
        conf.chunk_size_str = chunk_size.to_string();
        conf.init().unwrap();
        (ChunkStore::open(&conf).await.unwrap(), root)
    }

    #[tokio::test]
    async fn store_splits_into_ordered_chunks() {
        let (store, root) = open_store("4B").await;
        let id = store
            .store("notes.txt", b"0123456789", Default::default())
            .await
            .unwrap();

        let chunks = store.chunks(&id).unwrap();
        let sizes: Vec<u64> = chunks.iter().map(|v| v.size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let read = store.retrieve(&id).await.unwrap();
        assert_eq!(read.data, b"0123456789");
        assert_eq!(read.dataset.filename, "notes.txt");
        assert_eq!(read.dataset.chunk_ids.len(), 3);
        assert_eq!(store.info(&id).unwrap().format, DataFormat::Text);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn reopen_restores_datasets() {
        let (store, root) = open_store("8B").await;
        let mut metadata = DatasetMetadata::new();
        metadata.insert("owner".to_string(), "Finance".to_string());
        let id = store
            .store("sales.csv", b"region,amount\nnorth,10\n", metadata)
            .await
            .unwrap();
        drop(store);

        let mut conf = StorageConf::with_root(&root);
        conf.chunk_size_str = "8B".to_string();
        conf.init().unwrap();
        let store = ChunkStore::open(&conf).await.unwrap();
        assert_eq!(store.list().len(), 1);
        let read = store.retrieve(&id).await.unwrap();
        assert_eq!(read.data, b"region,amount\nnorth,10\n");
        assert_eq!(read.dataset.metadata.get("owner").unwrap(), "Finance");
        assert_eq!(store.search("finance").len(), 1);
        assert_eq!(store.search("SALES").len(), 1);
        assert!(store.search("inventory").is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn delete_removes_files() {
        let (store, root) = open_store("4B").await;
        let id = store
            .store("a.json", b"{\"k\": 1}", Default::default())
            .await
            .unwrap();
        let chunk_paths: Vec<PathBuf> = store
            .chunks(&id)
            .unwrap()
            .iter()
            .map(|v| store.chunk_path(&v.id))
            .collect();

        store.delete(&id).await.unwrap();
        assert!(chunk_paths.iter().all(|v| !v.exists()));
        assert!(store.list().is_empty());
        assert_eq!(store.stats(), StorageStats::default());
        assert!(matches!(
            store.retrieve(&id).await,
            Err(LakeError::DatasetNotFound(_))
        ));
        assert!(store.delete(&id).await.is_err());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn missing_chunk_file_is_reported() {
        let (store, root) = open_store("4B").await;
        let id = store
            .store("a.txt", b"abcdefgh", Default::default())
            .await
            .unwrap();
        let chunk = store.chunks(&id).unwrap().remove(1);
        std::fs::remove_file(store.chunk_path(&chunk.id)).unwrap();

        match store.retrieve(&id).await {
            Err(LakeError::ChunkNotFound(v)) => assert_eq!(v, chunk.id),
            other => panic!("unexpected {:?}", other.map(|v| v.data.len())),
        }
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn empty_payload_has_no_chunks() {
        let (store, root) = open_store("1MB").await;
        let id = store.store("empty.csv", b"", Default::default()).await.unwrap();
        assert_eq!(store.info(&id).unwrap().chunk_ids.len(), 0);
        assert!(store.retrieve(&id).await.unwrap().data.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }
}
