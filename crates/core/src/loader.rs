// src/loader.rs
//
// Mini-batch iteration over a CriteoDataset with seeded shuffling.
//
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use crate::collate::{collate_length, collate_offset, CollateKind, LengthBatch, OffsetBatch};
use crate::config::FedConfig;
use crate::dataset::CriteoDataset;

/// Batching options, resolved from the config's loader section.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub seed: u64,
    pub encoding: CollateKind,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: false,
            drop_last: false,
            seed: 0,
            encoding: CollateKind::Offset,
        }
    }
}

impl LoaderOptions {
    pub fn from_config(config: &FedConfig) -> Result<Self> {
        Ok(Self {
            batch_size: config.loader.batch_size.unwrap_or(32),
            shuffle: config.loader.shuffle.unwrap_or(false),
            drop_last: config.loader.drop_last.unwrap_or(false),
            seed: config.loader.seed.unwrap_or(0),
            encoding: config.collate_kind()?,
        })
    }
}

/// A collated mini-batch in the configured encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Offset(OffsetBatch),
    Length(LengthBatch),
}

impl Batch {
    pub fn num_examples(&self) -> usize {
        match self {
            Batch::Offset(b) => b.labels.nrows(),
            Batch::Length(b) => b.labels.nrows(),
        }
    }
}

/// Combines a dataset with batching options and yields collated batches
/// per epoch. Item transforms are stateless, so batches may be consumed
/// from worker tasks freely.
pub struct DataLoader {
    dataset: Arc<CriteoDataset>,
    opts: LoaderOptions,
}

impl DataLoader {
    pub fn new(dataset: Arc<CriteoDataset>, opts: LoaderOptions) -> Result<Self> {
        if opts.batch_size == 0 {
            anyhow::bail!("batch_size must be > 0");
        }
        Ok(Self { dataset, opts })
    }

    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.opts.drop_last {
            n / self.opts.batch_size
        } else {
            n.div_ceil(self.opts.batch_size)
        }
    }

    /// Batches for one epoch. The shuffle order is a pure function of
    /// `(seed, epoch)`, so runs are reproducible.
    pub fn epoch(&self, epoch: u32) -> EpochIter {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.opts.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.opts.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        EpochIter {
            dataset: self.dataset.clone(),
            order,
            cursor: 0,
            batch_size: self.opts.batch_size,
            drop_last: self.opts.drop_last,
            encoding: self.opts.encoding,
        }
    }
}

/// Iterator over one epoch's collated batches.
pub struct EpochIter {
    dataset: Arc<CriteoDataset>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    drop_last: bool,
    encoding: CollateKind,
}

impl Iterator for EpochIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        if self.drop_last && end - self.cursor < self.batch_size {
            self.cursor = self.order.len();
            return None;
        }

        let mut samples = Vec::with_capacity(end - self.cursor);
        for &index in &self.order[self.cursor..end] {
            match self.dataset.get(index) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    self.cursor = self.order.len();
                    return Some(Err(e));
                }
            }
        }
        self.cursor = end;

        Some(match self.encoding {
            CollateKind::Offset => collate_offset(&samples).map(Batch::Offset),
            CollateKind::Length => collate_length(&samples).map(Batch::Length),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn dataset(n: usize) -> Arc<CriteoDataset> {
        let dense = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32);
        let sparse = Array2::from_shape_fn((n, 3), |(i, j)| (i * 3 + j) as i64);
        let labels = Array1::from_shape_fn(n, |i| (i % 2) as f32);
        Arc::new(CriteoDataset::new(dense, sparse, labels, 0).unwrap())
    }

    fn opts(batch_size: usize) -> LoaderOptions {
        LoaderOptions {
            batch_size,
            ..LoaderOptions::default()
        }
    }

    #[test]
    fn batch_counts_respect_drop_last() {
        let ds = dataset(10);
        let loader = DataLoader::new(ds.clone(), opts(4)).unwrap();
        assert_eq!(loader.num_batches(), 3);
        let sizes: Vec<usize> = loader
            .epoch(0)
            .map(|b| b.unwrap().num_examples())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let loader = DataLoader::new(
            ds,
            LoaderOptions {
                batch_size: 4,
                drop_last: true,
                ..LoaderOptions::default()
            },
        )
        .unwrap();
        assert_eq!(loader.num_batches(), 2);
        let sizes: Vec<usize> = loader
            .epoch(0)
            .map(|b| b.unwrap().num_examples())
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn shuffle_is_reproducible_per_seed_and_epoch() {
        let ds = dataset(64);
        let shuffled = LoaderOptions {
            batch_size: 8,
            shuffle: true,
            seed: 42,
            ..LoaderOptions::default()
        };
        let loader = DataLoader::new(ds, shuffled).unwrap();

        let first: Vec<Batch> = loader.epoch(0).map(|b| b.unwrap()).collect();
        let again: Vec<Batch> = loader.epoch(0).map(|b| b.unwrap()).collect();
        assert_eq!(first, again);

        let next_epoch: Vec<Batch> = loader.epoch(1).map(|b| b.unwrap()).collect();
        assert_ne!(first, next_epoch);
    }

    #[test]
    fn encoding_selects_the_batch_form() {
        let ds = dataset(6);
        let loader = DataLoader::new(
            ds,
            LoaderOptions {
                batch_size: 3,
                encoding: CollateKind::Length,
                ..LoaderOptions::default()
            },
        )
        .unwrap();
        for batch in loader.epoch(0) {
            match batch.unwrap() {
                Batch::Length(b) => assert_eq!(b.lengths.nrows(), 3),
                Batch::Offset(_) => panic!("expected length batches"),
            }
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let ds = dataset(4);
        assert!(DataLoader::new(ds, opts(0)).is_err());
    }
}
