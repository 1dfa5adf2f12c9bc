// src/generation.rs
//
// Synthetic Criteo shard generation for tests and dry runs.

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::FedConfig;
use crate::metrics::Metrics;
use fedrec_formats::CriteoShard;

const DEFAULT_NUM_SHARDS: usize = 1;
const DEFAULT_EXAMPLES_PER_SHARD: usize = 1024;
const DEFAULT_NUM_DENSE_FEATURES: usize = 13;
// Kaggle-dataset slot count; used when no cardinalities are configured.
const DEFAULT_NUM_SPARSE_SLOTS: usize = 26;
const DEFAULT_CARDINALITY: i64 = 10_000;
const CLICK_RATE: f32 = 0.25;

/// What to synthesize, resolved from the dataset config section.
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub num_shards: usize,
    pub examples_per_shard: usize,
    pub num_dense_features: usize,
    pub sparse_cardinalities: Vec<i64>,
    pub seed: u64,
}

impl SyntheticSpec {
    pub fn from_config(config: &FedConfig) -> Self {
        let sparse_cardinalities = config
            .dataset
            .sparse_cardinalities
            .clone()
            .unwrap_or_else(|| {
                let cardinality = match config.dataset.max_ind_range {
                    Some(range) if range > 0 => range,
                    _ => DEFAULT_CARDINALITY,
                };
                vec![cardinality; DEFAULT_NUM_SPARSE_SLOTS]
            });
        Self {
            num_shards: config.dataset.num_shards.unwrap_or(DEFAULT_NUM_SHARDS),
            examples_per_shard: config
                .dataset
                .examples_per_shard
                .unwrap_or(DEFAULT_EXAMPLES_PER_SHARD),
            num_dense_features: config
                .dataset
                .num_dense_features
                .unwrap_or(DEFAULT_NUM_DENSE_FEATURES),
            sparse_cardinalities,
            seed: config.model.as_ref().and_then(|m| m.seed).unwrap_or(0),
        }
    }
}

/// Writes synthetic Criteo NPZ shards into a data folder.
pub struct DatasetGenerator {
    spec: SyntheticSpec,
    data_dir: PathBuf,
}

impl DatasetGenerator {
    pub fn new(spec: SyntheticSpec, data_dir: PathBuf) -> Self {
        Self { spec, data_dir }
    }

    pub fn from_config(config: &FedConfig) -> Self {
        Self::new(SyntheticSpec::from_config(config), config.data_folder_path())
    }

    /// Whether the data folder already holds shards.
    pub fn has_existing_shards(&self) -> bool {
        std::fs::read_dir(&self.data_dir)
            .map(|entries| {
                entries.flatten().any(|e| {
                    e.path().extension().and_then(|x| x.to_str()) == Some("npz")
                })
            })
            .unwrap_or(false)
    }

    /// Generate every shard and return the written paths.
    pub fn generate(&self, metrics: &mut Metrics) -> Result<Vec<PathBuf>> {
        info!(
            "Generating {} shards x {} examples into {:?}",
            self.spec.num_shards, self.spec.examples_per_shard, self.data_dir
        );
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", self.data_dir))?;

        let mut paths = Vec::with_capacity(self.spec.num_shards);
        for shard_index in 0..self.spec.num_shards {
            let path = self
                .data_dir
                .join(format!("shard_{:06}.npz", shard_index));
            let shard = self.synthesize_shard(shard_index as u64)?;
            shard
                .write(&path)
                .with_context(|| format!("Failed to write shard {:?}", path))?;

            let file_size = std::fs::metadata(&path)
                .with_context(|| format!("Failed to stat shard {:?}", path))?
                .len();
            metrics.record_bytes_written(file_size);
            debug!(
                "Generated shard {}/{} ({} bytes)",
                shard_index + 1,
                self.spec.num_shards,
                file_size
            );
            paths.push(path);
        }

        info!("Dataset generation completed");
        Ok(paths)
    }

    /// One shard of uniform categorical draws, count-like dense values and
    /// Bernoulli click labels, deterministic per (seed, shard).
    fn synthesize_shard(&self, shard_index: u64) -> Result<CriteoShard> {
        let n = self.spec.examples_per_shard;
        let mut rng = ChaCha8Rng::seed_from_u64(self.spec.seed.wrapping_add(shard_index));

        let dense = Array2::from_shape_fn((n, self.spec.num_dense_features), |_| {
            rng.random_range(0..100) as f32
        });
        let cards = &self.spec.sparse_cardinalities;
        let sparse =
            Array2::from_shape_fn((n, cards.len()), |(_, slot)| rng.random_range(0..cards[slot]));
        let labels =
            Array1::from_shape_fn(n, |_| if rng.random::<f32>() < CLICK_RATE { 1.0 } else { 0.0 });

        CriteoShard::new(dense, sparse, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CriteoDataset;
    use tempfile::TempDir;

    fn spec() -> SyntheticSpec {
        SyntheticSpec {
            num_shards: 2,
            examples_per_shard: 16,
            num_dense_features: 3,
            sparse_cardinalities: vec![50, 20],
            seed: 7,
        }
    }

    #[test]
    fn generated_shards_load_as_a_dataset() {
        let temp_dir = TempDir::new().unwrap();
        let generator = DatasetGenerator::new(spec(), temp_dir.path().join("data"));

        let mut metrics = Metrics::new();
        let paths = generator.generate(&mut metrics).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(metrics.bytes_written > 0);
        assert!(generator.has_existing_shards());

        let ds = CriteoDataset::from_npz_dir(&temp_dir.path().join("data"), 0).unwrap();
        assert_eq!(ds.len(), 32);
        assert_eq!(ds.num_dense_features(), 3);
        assert_eq!(ds.num_sparse_slots(), 2);

        // Draws respect the per-slot cardinalities.
        for i in 0..ds.len() {
            let sample = ds.get(i).unwrap();
            assert!((0..50).contains(&sample.sparse[0]));
            assert!((0..20).contains(&sample.sparse[1]));
        }
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let temp_dir = TempDir::new().unwrap();
        let a_dir = temp_dir.path().join("a");
        let b_dir = temp_dir.path().join("b");
        DatasetGenerator::new(spec(), a_dir.clone())
            .generate(&mut Metrics::new())
            .unwrap();
        DatasetGenerator::new(spec(), b_dir.clone())
            .generate(&mut Metrics::new())
            .unwrap();

        let a = CriteoShard::read(&a_dir.join("shard_000000.npz")).unwrap();
        let b = CriteoShard::read(&b_dir.join("shard_000000.npz")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_folder_reports_no_shards() {
        let temp_dir = TempDir::new().unwrap();
        let generator = DatasetGenerator::new(spec(), temp_dir.path().to_path_buf());
        assert!(!generator.has_existing_shards());
    }
}
