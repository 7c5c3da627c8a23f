//! Where epoch payloads come from.
//!
//! A content directory holds one training run:
//!
//! ```text
//! <content>/
//!   meta.json          DatasetMeta (optional)
//!   ttv.toml           configuration (optional)
//!   epochs/
//!     1.json           RawEpochPayload for epoch 1
//!     2.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use ttv_core::{DatasetMeta, EpochId, RawEpochPayload};

use crate::error::{Result, SourceError};

pub const META_FILE: &str = "meta.json";
pub const EPOCHS_DIR: &str = "epochs";

/// Synchronous access to one training run's data.
pub trait EpochSource {
    fn meta(&self) -> Result<DatasetMeta>;
    fn epoch(&self, epoch: EpochId) -> Result<RawEpochPayload>;
}

/// Reads a content directory from disk.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SourceError::InvalidData(format!(
                "content directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn epoch_path(&self, epoch: EpochId) -> PathBuf {
        self.root.join(EPOCHS_DIR).join(format!("{epoch}.json"))
    }

    /// Epochs with a payload file, ascending. Non-numeric file names are ignored.
    pub fn scan_epochs(&self) -> Result<Vec<EpochId>> {
        let dir = self.root.join(EPOCHS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| SourceError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut epochs: Vec<EpochId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()?.to_str()?.parse().ok()
            })
            .collect();
        epochs.sort_unstable();
        Ok(epochs)
    }
}

impl EpochSource for DirSource {
    /// `meta.json` when present. An empty or missing epoch list is filled
    /// from the payload files on disk.
    fn meta(&self) -> Result<DatasetMeta> {
        let path = self.root.join(META_FILE);
        let mut meta: DatasetMeta = if path.is_file() {
            read_json(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no meta file, scanning epochs");
            DatasetMeta::default()
        };
        if meta.available_epochs.is_empty() {
            meta.available_epochs = self.scan_epochs()?;
        }
        Ok(meta)
    }

    fn epoch(&self, epoch: EpochId) -> Result<RawEpochPayload> {
        let path = self.epoch_path(epoch);
        if !path.is_file() {
            return Err(SourceError::EpochNotFound(epoch));
        }
        let payload: RawEpochPayload = read_json(&path)?;
        let n = payload.sample_count();
        if payload.has_probabilities() && payload.prediction_probabilities.len() != n {
            tracing::warn!(
                epoch,
                samples = n,
                probabilities = payload.prediction_probabilities.len(),
                "probability rows do not match sample count"
            );
        }
        Ok(payload)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(SourceError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, value: serde_json::Value) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    fn epoch_json() -> serde_json::Value {
        json!({
            "proj": [[0.0, 0.0], [1.0, 1.0]],
            "labels": [0, 1],
            "predProbability": [[0.9, 0.1], [0.2, 0.8]],
            "originalNeighbors": [[1], [0]],
            "projectionNeighbors": [[1], []]
        })
    }

    #[test]
    fn test_open_missing_dir() {
        let dir = TempDir::new().unwrap();
        let err = DirSource::open(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SourceError::InvalidData(_)));
    }

    #[test]
    fn test_meta_falls_back_to_scanned_epochs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "epochs/10.json", epoch_json());
        write(dir.path(), "epochs/2.json", epoch_json());
        write(dir.path(), "epochs/notes.json", json!({}));
        fs::write(dir.path().join("epochs/3.txt"), "x").unwrap();

        let source = DirSource::open(dir.path()).unwrap();
        let meta = source.meta().unwrap();
        assert_eq!(meta.available_epochs, vec![2, 10]);
        assert!(meta.texts.is_empty());
    }

    #[test]
    fn test_meta_file_wins() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            META_FILE,
            json!({
                "availableEpochs": [1, 2],
                "texts": ["cat", "dog"],
                "labels": {"names": {"0": "cat", "1": "dog"}},
                "indexSets": {"train": [0], "test": [1]}
            }),
        );
        write(dir.path(), "epochs/7.json", epoch_json());

        let meta = DirSource::open(dir.path()).unwrap().meta().unwrap();
        assert_eq!(meta.available_epochs, vec![1, 2]);
        assert_eq!(meta.labels.name(1), "dog");
        assert_eq!(meta.index_sets["test"], vec![1]);
    }

    #[test]
    fn test_epoch_reads_backend_aliases() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "epochs/1.json", epoch_json());
        let source = DirSource::open(dir.path()).unwrap();

        let payload = source.epoch(1).unwrap();
        assert_eq!(payload.sample_count(), 2);
        assert_eq!(payload.original_space_neighbors, vec![vec![1], vec![0]]);
        assert!(payload.has_probabilities());

        assert!(matches!(source.epoch(2), Err(SourceError::EpochNotFound(2))));
    }

    #[test]
    fn test_epoch_with_null_neighbors_loads() {
        let dir = TempDir::new().unwrap();
        let mut epoch = epoch_json();
        epoch["originalNeighbors"] = serde_json::Value::Null;
        epoch["projectionNeighbors"] = serde_json::Value::Null;
        write(dir.path(), "epochs/1.json", epoch);

        let payload = DirSource::open(dir.path()).unwrap().epoch(1).unwrap();
        assert_eq!(payload.sample_count(), 2);
        assert!(payload.original_space_neighbors.is_empty());
        assert!(payload.projection_space_neighbors.is_empty());
    }

    #[test]
    fn test_corrupt_epoch_is_json_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(EPOCHS_DIR)).unwrap();
        fs::write(dir.path().join("epochs/1.json"), "{not json").unwrap();
        let err = DirSource::open(dir.path()).unwrap().epoch(1).unwrap_err();
        assert!(matches!(err, SourceError::Json(_)));
    }
}
