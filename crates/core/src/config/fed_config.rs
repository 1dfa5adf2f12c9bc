// SPDX-FileCopyrightText: 2025 fedrec contributors
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/fed_config.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::collate::CollateKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FedConfig {
    pub model: Option<Model>,
    pub workflow: Option<Workflow>,    // generate_data/train/checkpoint/publish/fetch toggles
    pub dataset: DatasetConfig,        // shard folder, bucketing, feature geometry
    pub loader: LoaderSection,         // batch_size, shuffle, encoding...
    pub devices: Option<DeviceConfig>, // per-host accelerator utilization table
    pub storage: Option<StorageConfig>,
    pub checkpoint: Option<CheckpointConfig>, // optional; used during training
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: Option<String>,
    pub embedding_dim: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Workflow {
    pub generate_data: Option<bool>,
    pub train: Option<bool>,
    pub checkpoint: Option<bool>,
    pub publish: Option<bool>,
    pub fetch: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub data_folder: String, // directory of NPZ shards; plain path or file:// URI
    pub max_ind_range: Option<i64>, // > 0 buckets categorical indices modulo this range
    pub num_dense_features: Option<usize>,
    pub sparse_cardinalities: Option<Vec<i64>>, // per-slot index ranges
    pub num_shards: Option<usize>,
    pub examples_per_shard: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoaderSection {
    pub batch_size: Option<usize>,
    pub shuffle: Option<bool>,
    pub drop_last: Option<bool>,
    pub seed: Option<u64>,
    pub encoding: Option<String>, // "offset" | "length"
    pub epochs: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub cuda_available: Option<bool>,
    pub worker_index: Option<usize>,
    pub world_size: Option<usize>,
    pub hosts: Vec<HostDevices>,
}

/// One host's accelerators: `slots[i]` is the number of worker processes
/// scheduled on accelerator `i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostDevices {
    pub host: String,
    pub slots: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uri: String, // s3://  or file:///path/to/root
    pub group: String,
    pub model_path: Option<String>, // object path for published state
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub allow_http: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub enabled: Option<bool>,

    // Accept legacy aliases: folder/path/dir
    #[serde(alias = "folder", alias = "path", alias = "dir", alias = "checkpoint_folder")]
    pub uri: Option<String>, // where to write checkpoint files

    pub rounds_between_checkpoints: Option<u32>,
    pub compression: Option<String>, // e.g. "zstd"
    pub compression_level: Option<i32>, // e.g. 3
}

/// Resolve a plain path or `file://` URI to a local path.
pub fn local_path(uri: &str) -> PathBuf {
    let stripped = uri.strip_prefix("file://").unwrap_or(uri);
    Path::new(stripped).to_path_buf()
}

impl FedConfig {
    /// Parse config from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON config: {}", e))
    }

    /// Parse config from a YAML string by converting to JSON first.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse YAML: {}", e))?;

        let json_str = serde_json::to_string(&yaml_value)
            .map_err(|e| anyhow::anyhow!("Failed to convert YAML to JSON: {}", e))?;

        Self::from_json(&json_str)
    }

    /// Load config from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_yaml(&text)
    }

    /// Determine the storage backend from the configured URI.
    pub fn storage_backend(&self) -> Option<StorageBackendKind> {
        let storage = self.storage.as_ref()?;
        if storage.uri.starts_with("s3://") {
            Some(StorageBackendKind::S3)
        } else {
            Some(StorageBackendKind::File)
        }
    }

    pub fn data_folder_path(&self) -> PathBuf {
        local_path(&self.dataset.data_folder)
    }

    pub fn collate_kind(&self) -> Result<CollateKind> {
        match self.loader.encoding.as_deref() {
            None | Some("offset") => Ok(CollateKind::Offset),
            Some("length") => Ok(CollateKind::Length),
            Some(other) => anyhow::bail!("Unknown batch encoding: {}", other),
        }
    }

    /// Check if data generation should run.
    pub fn should_generate_data(&self) -> bool {
        self.workflow
            .as_ref()
            .map_or(false, |w| w.generate_data.unwrap_or(false))
    }

    /// Check if training should run.
    pub fn should_train(&self) -> bool {
        self.workflow
            .as_ref()
            .map_or(true, |w| w.train.unwrap_or(true))
    }

    /// Check if checkpointing should run.
    pub fn should_checkpoint(&self) -> bool {
        self.workflow
            .as_ref()
            .map_or(false, |w| w.checkpoint.unwrap_or(false))
    }

    /// Check if trained state should be pushed to remote storage.
    pub fn should_publish(&self) -> bool {
        self.workflow
            .as_ref()
            .map_or(false, |w| w.publish.unwrap_or(false))
    }

    /// Check if published state should be pulled before training.
    pub fn should_fetch(&self) -> bool {
        self.workflow
            .as_ref()
            .map_or(false, |w| w.fetch.unwrap_or(false))
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.data_folder.is_empty() {
            anyhow::bail!("dataset.data_folder must not be empty");
        }
        if let Some(range) = self.dataset.max_ind_range {
            if range < 0 {
                anyhow::bail!("dataset.max_ind_range must be >= 0");
            }
        }
        if let Some(cards) = &self.dataset.sparse_cardinalities {
            if cards.iter().any(|&c| c <= 0) {
                anyhow::bail!("dataset.sparse_cardinalities must all be > 0");
            }
        }
        if self.loader.batch_size == Some(0) {
            anyhow::bail!("loader.batch_size must be > 0");
        }
        self.collate_kind()?;
        if let Some(model) = &self.model {
            if model.embedding_dim == Some(0) {
                anyhow::bail!("model.embedding_dim must be > 0 if specified");
            }
        }
        if let Some(devices) = &self.devices {
            if let (Some(index), Some(world)) = (devices.worker_index, devices.world_size) {
                if index >= world {
                    anyhow::bail!(
                        "devices.worker_index {} is outside world_size {}",
                        index,
                        world
                    );
                }
            }
        }
        if let Some(storage) = &self.storage {
            if storage.group.is_empty() {
                anyhow::bail!("storage.group must not be empty");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendKind {
    S3,
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_detection() {
        let yaml = r#"
dataset:
  data_folder: "file:///tmp/criteo"
loader:
  batch_size: 32
storage:
  uri: "s3://"
  group: "edge-group"
"#;
        let config = FedConfig::from_yaml(yaml).expect("Should parse YAML");
        assert_eq!(config.storage_backend(), Some(StorageBackendKind::S3));

        let mut local = config.clone();
        local.storage.as_mut().unwrap().uri = "file:///var/fedrec/store".to_string();
        assert_eq!(local.storage_backend(), Some(StorageBackendKind::File));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
model:
  name: "dlrm_small"
  embedding_dim: 16
workflow:
  generate_data: true
  train: true
dataset:
  data_folder: "file:///tmp/criteo"
  max_ind_range: 10000
  num_dense_features: 13
loader:
  batch_size: 128
  shuffle: true
  encoding: "length"
"#;
        let config = FedConfig::from_yaml(yaml).expect("Should parse YAML");
        assert_eq!(
            config.model.as_ref().unwrap().name,
            Some("dlrm_small".to_string())
        );
        assert_eq!(config.dataset.max_ind_range, Some(10000));
        assert_eq!(config.loader.batch_size, Some(128));
        assert_eq!(config.collate_kind().unwrap(), CollateKind::Length);
        config.validate().expect("config should validate");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let yaml = r#"
dataset:
  data_folder: "file:///tmp/criteo"
  max_ind_range: -5
loader:
  batch_size: 32
"#;
        let config = FedConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
dataset:
  data_folder: "file:///tmp/criteo"
loader:
  encoding: "ragged"
"#;
        let config = FedConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_path_strips_scheme() {
        assert_eq!(local_path("file:///tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(local_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
