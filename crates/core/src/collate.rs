// src/collate.rs
//
// Batch collation for embedding-lookup layers: offset form and length form.
//
use anyhow::{bail, Result};
use ndarray::Array2;
use std::str::FromStr;

use crate::dataset::Sample;

/// Which index encoding a collated batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateKind {
    Offset,
    Length,
}

impl FromStr for CollateKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "offset" => Ok(CollateKind::Offset),
            "length" => Ok(CollateKind::Length),
            other => bail!("Unknown batch encoding: {}", other),
        }
    }
}

/// Offset-form batch.
///
/// `offsets[slot][i]` is the start of example `i`'s indices within the
/// flattened index list of `slot`. With one index per example per slot the
/// offsets are exactly `0..batch_size`.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetBatch {
    /// `(batch, dense_features)`, `ln(v + 1)` applied.
    pub dense: Array2<f32>,
    /// `(slots, batch)` start positions.
    pub offsets: Array2<i64>,
    /// `(slots, batch)` categorical indices.
    pub indices: Array2<i64>,
    /// `(batch, 1)` click targets.
    pub labels: Array2<f32>,
}

/// Length-form batch: per-slot index counts instead of start positions.
#[derive(Debug, Clone, PartialEq)]
pub struct LengthBatch {
    pub dense: Array2<f32>,
    /// `(slots, batch)` index counts per example.
    pub lengths: Array2<i64>,
    pub indices: Array2<i64>,
    pub labels: Array2<f32>,
}

fn check_widths(samples: &[Sample]) -> Result<(usize, usize)> {
    let dense_width = samples[0].dense.len();
    let slots = samples[0].sparse.len();
    for (i, sample) in samples.iter().enumerate() {
        if sample.dense.len() != dense_width || sample.sparse.len() != slots {
            bail!(
                "Ragged batch: example {} has dense={}, sparse={}; expected dense={}, sparse={}",
                i,
                sample.dense.len(),
                sample.sparse.len(),
                dense_width,
                slots
            );
        }
    }
    Ok((dense_width, slots))
}

/// Collate samples into an offset-form batch.
pub fn collate_offset(samples: &[Sample]) -> Result<OffsetBatch> {
    if samples.is_empty() {
        bail!("Cannot collate an empty batch");
    }
    let batch_size = samples.len();
    let (dense_width, slots) = check_widths(samples)?;

    let mut dense = Array2::<f32>::zeros((batch_size, dense_width));
    let mut indices = Array2::<i64>::zeros((slots, batch_size));
    for (i, sample) in samples.iter().enumerate() {
        for (j, &v) in sample.dense.iter().enumerate() {
            dense[[i, j]] = (v + 1.0).ln();
        }
        for (k, &ix) in sample.sparse.iter().enumerate() {
            indices[[k, i]] = ix;
        }
    }

    // One index per example per slot, so each slot's offsets are 0..batch.
    let offsets = Array2::from_shape_fn((slots, batch_size), |(_, i)| i as i64);
    let labels = Array2::from_shape_fn((batch_size, 1), |(i, _)| samples[i].label);

    Ok(OffsetBatch {
        dense,
        offsets,
        indices,
        labels,
    })
}

/// Collate samples into a length-form batch.
pub fn collate_length(samples: &[Sample]) -> Result<LengthBatch> {
    let OffsetBatch {
        dense,
        offsets,
        indices,
        labels,
    } = collate_offset(samples)?;

    let slots = offsets.nrows();
    let slot_totals = vec![indices.ncols() as i64; slots];
    let lengths = offsets_to_lengths(&offsets, &slot_totals)?;

    Ok(LengthBatch {
        dense,
        lengths,
        indices,
        labels,
    })
}

/// Convert per-slot offsets to per-slot lengths.
///
/// `slot_totals[k]` is the total index count of slot `k`, appended as the
/// sentinel before consecutive differencing. Guarantees
/// `sum(lengths[k]) == slot_totals[k]` for well-formed input; decreasing
/// offsets are an error.
pub fn offsets_to_lengths(offsets: &Array2<i64>, slot_totals: &[i64]) -> Result<Array2<i64>> {
    let (slots, batch_size) = offsets.dim();
    if slot_totals.len() != slots {
        bail!(
            "Got {} slot totals for {} offset rows",
            slot_totals.len(),
            slots
        );
    }

    let mut lengths = Array2::<i64>::zeros((slots, batch_size));
    for k in 0..slots {
        for i in 0..batch_size {
            let next = if i + 1 < batch_size {
                offsets[[k, i + 1]]
            } else {
                slot_totals[k]
            };
            let length = next - offsets[[k, i]];
            if length < 0 {
                bail!("Offsets are decreasing in slot {} at example {}", k, i);
            }
            lengths[[k, i]] = length;
        }
    }
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn sample(dense: Vec<f32>, sparse: Vec<i64>, label: f32) -> Sample {
        Sample {
            dense: Array1::from_vec(dense),
            sparse: Array1::from_vec(sparse),
            label,
        }
    }

    fn batch_of_three() -> Vec<Sample> {
        vec![
            sample(vec![0.0, 3.0], vec![11, 42, 7], 1.0),
            sample(vec![7.0, 1.0], vec![0, 3, 9], 0.0),
            sample(vec![2.0, 2.0], vec![5, 5, 5], 0.0),
        ]
    }

    #[test]
    fn offsets_are_the_example_positions() {
        let batch = collate_offset(&batch_of_three()).unwrap();
        assert_eq!(batch.offsets, array![[0, 1, 2], [0, 1, 2], [0, 1, 2]]);
    }

    #[test]
    fn dense_transform_is_log1p() {
        let batch = collate_offset(&batch_of_three()).unwrap();
        // v = 0 maps to 0 exactly.
        assert_eq!(batch.dense[[0, 0]], 0.0);
        assert!((batch.dense[[1, 0]] - 8.0f32.ln()).abs() < 1e-6);
        assert!((batch.dense[[0, 1]] - 4.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn indices_are_stacked_slot_major() {
        let batch = collate_offset(&batch_of_three()).unwrap();
        assert_eq!(batch.indices, array![[11, 0, 5], [42, 3, 5], [7, 9, 5]]);
        assert_eq!(batch.labels, array![[1.0], [0.0], [0.0]]);
    }

    #[test]
    fn lengths_sum_to_slot_totals() {
        let batch = collate_length(&batch_of_three()).unwrap();
        assert_eq!(batch.lengths, array![[1, 1, 1], [1, 1, 1], [1, 1, 1]]);
        for row in batch.lengths.rows() {
            assert_eq!(row.sum(), batch.indices.ncols() as i64);
        }
    }

    #[test]
    fn converter_handles_variable_lengths() {
        // Two slots with genuinely ragged per-example index counts.
        let offsets = array![[0, 2, 5], [0, 0, 4]];
        let lengths = offsets_to_lengths(&offsets, &[7, 4]).unwrap();
        assert_eq!(lengths, array![[2, 3, 2], [0, 4, 0]]);
        assert_eq!(lengths.row(0).sum(), 7);
        assert_eq!(lengths.row(1).sum(), 4);
    }

    #[test]
    fn decreasing_offsets_are_rejected() {
        let offsets = array![[0, 3, 2]];
        assert!(offsets_to_lengths(&offsets, &[4]).is_err());
    }

    #[test]
    fn ragged_batches_are_rejected() {
        let mut samples = batch_of_three();
        samples[1] = sample(vec![7.0], vec![0, 3, 9], 0.0);
        assert!(collate_offset(&samples).is_err());

        let mut samples = batch_of_three();
        samples[2] = sample(vec![2.0, 2.0], vec![5, 5], 0.0);
        assert!(collate_length(&samples).is_err());
    }

    #[test]
    fn empty_batches_are_rejected() {
        assert!(collate_offset(&[]).is_err());
    }

    #[test]
    fn encoding_names_parse() {
        assert_eq!("offset".parse::<CollateKind>().unwrap(), CollateKind::Offset);
        assert_eq!("length".parse::<CollateKind>().unwrap(), CollateKind::Length);
        assert!("ragged".parse::<CollateKind>().is_err());
    }
}
