// src/embedding.rs
//
// Per-slot embedding tables with bag-style sum pooling. This is the module
// exchanged between participants; both batch encodings drive the same
// lookup path.
//
use anyhow::{bail, Context, Result};
use ndarray::{Array2, Ix2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::collate::{LengthBatch, OffsetBatch};
use crate::loader::Batch;
use crate::module::TrainableModule;
use fedrec_formats::StateDict;

/// Embedding tables for a fixed set of sparse feature slots.
pub struct SparseEmbedding {
    tables: Vec<Array2<f32>>, // (cardinality, dim) per slot
    dim: usize,
}

impl SparseEmbedding {
    pub const KIND: &'static str = "sparse_embedding";

    /// Fresh tables with seeded uniform init scaled by the dimension.
    pub fn new(cardinalities: &[usize], dim: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            bail!("Embedding dimension must be > 0");
        }
        if cardinalities.is_empty() {
            bail!("At least one sparse slot is required");
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let scale = 1.0 / dim as f32;
        let mut tables = Vec::with_capacity(cardinalities.len());
        for &cardinality in cardinalities {
            if cardinality == 0 {
                bail!("Slot cardinality must be > 0");
            }
            tables.push(Array2::from_shape_fn((cardinality, dim), |_| {
                (rng.random::<f32>() - 0.5) * scale
            }));
        }
        Ok(Self { tables, dim })
    }

    pub fn from_state_dict(state: &StateDict) -> Result<Self> {
        if state.is_empty() {
            bail!("State dict has no embedding tables");
        }
        let mut tables = Vec::with_capacity(state.len());
        for (slot, (name, array)) in state.iter().enumerate() {
            let expected = Self::table_name(slot);
            if name != &expected {
                bail!("Unexpected parameter {} (expected {})", name, expected);
            }
            let table = array
                .clone()
                .into_dimensionality::<Ix2>()
                .with_context(|| format!("Parameter {} is not a 2-d table", name))?;
            tables.push(table);
        }

        let dim = tables[0].ncols();
        if dim == 0 || tables.iter().any(|t| t.ncols() != dim) {
            bail!("Embedding tables disagree on dimension");
        }
        Ok(Self { tables, dim })
    }

    fn table_name(slot: usize) -> String {
        format!("table_{:04}", slot)
    }

    pub fn num_slots(&self) -> usize {
        self.tables.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Output width of the pooled representation.
    pub fn output_width(&self) -> usize {
        self.num_slots() * self.dim
    }

    fn check_slots(&self, slots: usize) -> Result<()> {
        if slots != self.tables.len() {
            bail!(
                "Batch has {} sparse slots, module has {}",
                slots,
                self.tables.len()
            );
        }
        Ok(())
    }

    fn accumulate(
        &self,
        out: &mut Array2<f32>,
        example: usize,
        slot: usize,
        index: i64,
    ) -> Result<()> {
        let table = &self.tables[slot];
        if index < 0 || index as usize >= table.nrows() {
            bail!(
                "Index {} out of range for slot {} table of {} rows",
                index,
                slot,
                table.nrows()
            );
        }
        let row = table.row(index as usize);
        let base = slot * self.dim;
        for d in 0..self.dim {
            out[[example, base + d]] += row[d];
        }
        Ok(())
    }

    /// Sum-pool each example's indices per slot, offset form.
    pub fn forward_offset(&self, batch: &OffsetBatch) -> Result<Array2<f32>> {
        let (slots, batch_size) = batch.indices.dim();
        self.check_slots(slots)?;
        if batch.offsets.dim() != (slots, batch_size) {
            bail!(
                "Offsets shape {:?} does not match indices shape {:?}",
                batch.offsets.dim(),
                batch.indices.dim()
            );
        }

        let mut out = Array2::<f32>::zeros((batch_size, self.output_width()));
        for slot in 0..slots {
            let indices = batch.indices.row(slot);
            let offsets = batch.offsets.row(slot);
            for example in 0..batch_size {
                let start = offsets[example];
                let end = if example + 1 < batch_size {
                    offsets[example + 1]
                } else {
                    indices.len() as i64
                };
                if start < 0 || end < start || end > indices.len() as i64 {
                    bail!("Invalid offsets for slot {} at example {}", slot, example);
                }
                for j in start..end {
                    self.accumulate(&mut out, example, slot, indices[j as usize])?;
                }
            }
        }
        Ok(out)
    }

    /// Sum-pool each example's indices per slot, length form.
    pub fn forward_length(&self, batch: &LengthBatch) -> Result<Array2<f32>> {
        let (slots, batch_size) = batch.indices.dim();
        self.check_slots(slots)?;
        if batch.lengths.dim() != (slots, batch_size) {
            bail!(
                "Lengths shape {:?} does not match indices shape {:?}",
                batch.lengths.dim(),
                batch.indices.dim()
            );
        }

        let mut out = Array2::<f32>::zeros((batch_size, self.output_width()));
        for slot in 0..slots {
            let indices = batch.indices.row(slot);
            let lengths = batch.lengths.row(slot);
            let mut cursor = 0usize;
            for example in 0..batch_size {
                let length = lengths[example];
                if length < 0 || cursor + length as usize > indices.len() {
                    bail!("Lengths overrun the index list in slot {}", slot);
                }
                for j in 0..length as usize {
                    self.accumulate(&mut out, example, slot, indices[cursor + j])?;
                }
                cursor += length as usize;
            }
        }
        Ok(out)
    }
}

impl TrainableModule for SparseEmbedding {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn state_dict(&self) -> StateDict {
        self.tables
            .iter()
            .enumerate()
            .map(|(slot, table)| (Self::table_name(slot), table.clone().into_dyn()))
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let loaded = Self::from_state_dict(state)?;
        if loaded.tables.len() != self.tables.len() || loaded.dim != self.dim {
            bail!(
                "State dict has {} slots of dim {}, module has {} slots of dim {}",
                loaded.tables.len(),
                loaded.dim,
                self.tables.len(),
                self.dim
            );
        }
        for (slot, (mine, theirs)) in self.tables.iter().zip(&loaded.tables).enumerate() {
            if mine.dim() != theirs.dim() {
                bail!(
                    "Table {} shape {:?} does not match {:?}",
                    slot,
                    theirs.dim(),
                    mine.dim()
                );
            }
        }
        self.tables = loaded.tables;
        Ok(())
    }

    fn forward(&self, batch: &Batch) -> Result<Array2<f32>> {
        match batch {
            Batch::Offset(b) => self.forward_offset(b),
            Batch::Length(b) => self.forward_length(b),
        }
    }
}
