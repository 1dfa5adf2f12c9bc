// src/dataset.rs
//
// In-memory Criteo dataset with modulo bucketing at access time.
//
use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Axis};
use std::ops::Range;
use std::path::Path;

use fedrec_formats::CriteoShard;

/// One training example: raw dense counts, categorical indices, click label.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub dense: Array1<f32>,
    pub sparse: Array1<i64>,
    pub label: f32,
}

/// Pre-loaded dense/categorical/label arrays with indexed and range access.
///
/// When `max_ind_range > 0`, categorical values are reduced modulo that
/// range at access time. This bounds the embedding table size; collisions
/// are accepted.
pub struct CriteoDataset {
    dense: Array2<f32>,
    sparse: Array2<i64>,
    labels: Array1<f32>,
    max_ind_range: i64,
}

impl CriteoDataset {
    pub fn new(
        dense: Array2<f32>,
        sparse: Array2<i64>,
        labels: Array1<f32>,
        max_ind_range: i64,
    ) -> Result<Self> {
        if max_ind_range < 0 {
            anyhow::bail!("max_ind_range must be >= 0, got {}", max_ind_range);
        }
        let n = labels.len();
        if dense.nrows() != n || sparse.nrows() != n {
            anyhow::bail!(
                "Dataset row counts disagree: dense={}, sparse={}, labels={}",
                dense.nrows(),
                sparse.nrows(),
                n
            );
        }
        Ok(Self {
            dense,
            sparse,
            labels,
            max_ind_range,
        })
    }

    pub fn from_shard(shard: CriteoShard, max_ind_range: i64) -> Result<Self> {
        Self::new(shard.dense, shard.sparse, shard.labels, max_ind_range)
    }

    /// Load a single NPZ shard.
    pub fn from_npz(path: &Path, max_ind_range: i64) -> Result<Self> {
        let shard = CriteoShard::read(path)
            .with_context(|| format!("Failed to load shard {:?}", path))?;
        Self::from_shard(shard, max_ind_range)
    }

    /// Load and concatenate every `.npz` shard in a directory, in name order.
    pub fn from_npz_dir(dir: &Path, max_ind_range: i64) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read shard directory {:?}", dir))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("npz") {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("No NPZ shards found in {:?}", dir);
        }

        let mut shards = Vec::with_capacity(paths.len());
        for path in &paths {
            shards.push(
                CriteoShard::read(path)
                    .with_context(|| format!("Failed to load shard {:?}", path))?,
            );
        }

        let dense = ndarray::concatenate(
            Axis(0),
            &shards.iter().map(|s| s.dense.view()).collect::<Vec<_>>(),
        )?;
        let sparse = ndarray::concatenate(
            Axis(0),
            &shards.iter().map(|s| s.sparse.view()).collect::<Vec<_>>(),
        )?;
        let labels = ndarray::concatenate(
            Axis(0),
            &shards.iter().map(|s| s.labels.view()).collect::<Vec<_>>(),
        )?;

        Self::new(dense, sparse, labels, max_ind_range)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_dense_features(&self) -> usize {
        self.dense.ncols()
    }

    pub fn num_sparse_slots(&self) -> usize {
        self.sparse.ncols()
    }

    pub fn max_ind_range(&self) -> i64 {
        self.max_ind_range
    }

    /// Fetch one example, bucketing categorical indices when configured.
    pub fn get(&self, index: usize) -> Result<Sample> {
        if index >= self.len() {
            anyhow::bail!("Index {} out of bounds for dataset of {}", index, self.len());
        }

        let sparse_row = self.sparse.row(index);
        let sparse = if self.max_ind_range > 0 {
            sparse_row.mapv(|v| v.rem_euclid(self.max_ind_range))
        } else {
            sparse_row.to_owned()
        };

        Ok(Sample {
            dense: self.dense.row(index).to_owned(),
            sparse,
            label: self.labels[index],
        })
    }

    /// Fetch a contiguous range of examples.
    pub fn get_range(&self, range: Range<usize>) -> Result<Vec<Sample>> {
        range.map(|i| self.get(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample_dataset(max_ind_range: i64) -> CriteoDataset {
        CriteoDataset::new(
            array![[0.0, 3.0], [7.0, 1.0], [2.0, 2.0]],
            array![[11, 42, 7], [0, 103, 9], [5, 205, 5]],
            array![1.0, 0.0, 0.0],
            max_ind_range,
        )
        .unwrap()
    }

    #[test]
    fn bucketing_bounds_every_index() {
        let range = 10;
        let ds = sample_dataset(range);
        for i in 0..ds.len() {
            let sample = ds.get(i).unwrap();
            assert!(sample.sparse.iter().all(|&v| (0..range).contains(&v)));
        }
        // Spot-check one reduced value.
        assert_eq!(ds.get(1).unwrap().sparse, array![0, 3, 9]);
    }

    #[test]
    fn zero_range_disables_bucketing() {
        let ds = sample_dataset(0);
        assert_eq!(ds.get(2).unwrap().sparse, array![5, 205, 5]);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let ds = sample_dataset(0);
        assert!(ds.get(3).is_err());
    }

    #[test]
    fn range_access_returns_owned_samples() {
        let ds = sample_dataset(0);
        let samples = ds.get_range(1..3).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label, 0.0);
        assert_eq!(samples[0].dense, array![7.0, 1.0]);
    }

    #[test]
    fn shard_directory_concatenates_in_name_order() {
        let dir = tempdir().unwrap();

        let first = CriteoShard::new(
            array![[1.0], [2.0]],
            array![[10], [20]],
            array![0.0, 1.0],
        )
        .unwrap();
        let second =
            CriteoShard::new(array![[3.0]], array![[30]], array![0.0]).unwrap();
        first.write(&dir.path().join("shard_000000.npz")).unwrap();
        second.write(&dir.path().join("shard_000001.npz")).unwrap();

        let ds = CriteoDataset::from_npz_dir(dir.path(), 0).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(2).unwrap().sparse, array![30]);
    }

    #[test]
    fn empty_shard_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(CriteoDataset::from_npz_dir(dir.path(), 0).is_err());
    }
}
