// crates/formats/src/criteo.rs
//
// Criteo shard files: one NPZ with dense counts, categorical indices and
// click labels for a block of examples.

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use std::path::Path;

use crate::npz::{NpzReader, NpzWriter};

const DENSE: &str = "dense";
const SPARSE: &str = "sparse";
const LABELS: &str = "labels";

/// Preprocessed Criteo examples as stored on disk.
///
/// `dense` is `(examples, dense_features)` raw count values, `sparse` is
/// `(examples, sparse_slots)` categorical indices, `labels` is one click
/// target per example. The log transform and modulo bucketing happen at
/// access/collation time, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteoShard {
    pub dense: Array2<f32>,
    pub sparse: Array2<i64>,
    pub labels: Array1<f32>,
}

impl CriteoShard {
    pub fn new(dense: Array2<f32>, sparse: Array2<i64>, labels: Array1<f32>) -> Result<Self> {
        let shard = Self {
            dense,
            sparse,
            labels,
        };
        shard.validate()?;
        Ok(shard)
    }

    pub fn num_examples(&self) -> usize {
        self.labels.len()
    }

    pub fn num_dense_features(&self) -> usize {
        self.dense.ncols()
    }

    pub fn num_sparse_slots(&self) -> usize {
        self.sparse.ncols()
    }

    /// All three arrays must agree on the example count.
    pub fn validate(&self) -> Result<()> {
        let n = self.labels.len();
        if self.dense.nrows() != n || self.sparse.nrows() != n {
            anyhow::bail!(
                "Shard row counts disagree: dense={}, sparse={}, labels={}",
                self.dense.nrows(),
                self.sparse.nrows(),
                n
            );
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let mut writer = NpzWriter::create(path)?;
        writer.add(DENSE, &self.dense)?;
        writer.add(SPARSE, &self.sparse)?;
        writer.add(LABELS, &self.labels)?;
        writer.finish()?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = NpzReader::open(path)?;
        let dense: Array2<f32> = reader
            .array(DENSE)
            .with_context(|| format!("Shard {:?} is missing the dense array", path))?;
        let sparse: Array2<i64> = reader
            .array(SPARSE)
            .with_context(|| format!("Shard {:?} is missing the sparse array", path))?;
        let labels: Array1<f32> = reader
            .array(LABELS)
            .with_context(|| format!("Shard {:?} is missing the labels array", path))?;
        Self::new(dense, sparse, labels)
    }
}
