// SPDX-FileCopyrightText: 2025 fedrec contributors
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/module.rs
//
// Serialization envelope for trainable modules. A module exposes the
// capabilities the envelope needs through `TrainableModule`; reconstruction
// goes through a registry keyed by the module's type tag.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::loader::Batch;
use fedrec_formats::StateDict;
use fedrec_storage::Table;

/// Envelope layout version; bumped on incompatible changes.
pub const ENVELOPE_FORMAT_VERSION: u32 = 1;

// zstd frame magic, little-endian.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Capabilities a module must expose to be checkpointed and exchanged
/// between participants.
pub trait TrainableModule: Send {
    /// Stable type tag used to find the factory on deserialization.
    fn kind(&self) -> &'static str;

    /// Export the parameter tensors, keyed by name.
    fn state_dict(&self) -> StateDict;

    /// Restore parameter tensors; shapes must match the module.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;

    /// Pooled representation for one collated batch.
    fn forward(&self, batch: &Batch) -> Result<Array2<f32>>;
}

/// One parameter tensor in transmissible form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn from_array(name: &str, array: &ArrayD<f32>) -> Self {
        Self {
            name: name.to_string(),
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    pub fn to_array(&self) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone()).with_context(|| {
            format!(
                "Tensor {} has {} values for shape {:?}",
                self.name,
                self.data.len(),
                self.shape
            )
        })
    }
}

/// Serialized module state: type tag plus named parameter tensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEnvelope {
    pub kind: String,
    pub format: u32,
    pub saved_at: DateTime<Utc>,
    pub tensors: Vec<NamedTensor>,
}

impl ModuleEnvelope {
    pub fn from_module(module: &dyn TrainableModule) -> Self {
        let tensors = module
            .state_dict()
            .iter()
            .map(|(name, array)| NamedTensor::from_array(name, array))
            .collect();
        Self {
            kind: module.kind().to_string(),
            format: ENVELOPE_FORMAT_VERSION,
            saved_at: Utc::now(),
            tensors,
        }
    }

    pub fn state_dict(&self) -> Result<StateDict> {
        let mut state = StateDict::new();
        for tensor in &self.tensors {
            state.insert(tensor.name.clone(), tensor.to_array()?);
        }
        Ok(state)
    }

    /// Encode as JSON, optionally compressed with zstd at `level`.
    pub fn to_bytes(&self, compression_level: Option<i32>) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self).context("Failed to serialize module envelope")?;
        match compression_level {
            Some(level) => zstd::encode_all(json.as_slice(), level)
                .context("Failed to compress module envelope with zstd"),
            None => Ok(json),
        }
    }

    /// Decode from bytes, transparently handling zstd-compressed input.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let json = if data.starts_with(&ZSTD_MAGIC) {
            zstd::decode_all(data).context("Failed to decompress module envelope")?
        } else {
            data.to_vec()
        };
        let envelope: ModuleEnvelope =
            serde_json::from_slice(&json).context("Failed to parse module envelope")?;
        if envelope.format != ENVELOPE_FORMAT_VERSION {
            bail!(
                "Unsupported envelope format {} (expected {})",
                envelope.format,
                ENVELOPE_FORMAT_VERSION
            );
        }
        Ok(envelope)
    }

    /// Project the envelope onto the storage adapter's tabular payload:
    /// one row per tensor, metadata columns repeated per row.
    pub fn to_table(&self) -> Result<Table> {
        let mut table = Table::new(
            ["kind", "format", "saved_at", "parameter", "shape", "values"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        );
        for tensor in &self.tensors {
            table
                .push_row(vec![
                    serde_json::json!(self.kind),
                    serde_json::json!(self.format),
                    serde_json::json!(self.saved_at.to_rfc3339()),
                    serde_json::json!(tensor.name),
                    serde_json::json!(tensor.shape),
                    serde_json::json!(tensor.data),
                ])
                .context("Failed to build envelope table")?;
        }
        Ok(table)
    }

    pub fn from_table(table: &Table) -> Result<Self> {
        let column = |name: &str| {
            table
                .column_index(name)
                .with_context(|| format!("Envelope table is missing column {}", name))
        };
        let kind_col = column("kind")?;
        let format_col = column("format")?;
        let saved_col = column("saved_at")?;
        let name_col = column("parameter")?;
        let shape_col = column("shape")?;
        let values_col = column("values")?;

        let first = table
            .rows
            .first()
            .context("Envelope table has no tensor rows")?;
        let kind = first[kind_col]
            .as_str()
            .context("Envelope kind is not a string")?
            .to_string();
        let format = first[format_col]
            .as_u64()
            .context("Envelope format is not an integer")? as u32;
        let saved_at = first[saved_col]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .context("Envelope saved_at is not an RFC 3339 timestamp")?;

        let mut tensors = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let name = row[name_col]
                .as_str()
                .context("Tensor name is not a string")?
                .to_string();
            let shape: Vec<usize> = serde_json::from_value(row[shape_col].clone())
                .with_context(|| format!("Tensor {} has a malformed shape", name))?;
            let data: Vec<f32> = serde_json::from_value(row[values_col].clone())
                .with_context(|| format!("Tensor {} has malformed values", name))?;
            tensors.push(NamedTensor { name, shape, data });
        }

        let envelope = Self {
            kind,
            format,
            saved_at,
            tensors,
        };
        if envelope.format != ENVELOPE_FORMAT_VERSION {
            bail!(
                "Unsupported envelope format {} (expected {})",
                envelope.format,
                ENVELOPE_FORMAT_VERSION
            );
        }
        Ok(envelope)
    }
}

/// Serialize a module into envelope bytes.
pub fn serialize_module(
    module: &dyn TrainableModule,
    compression_level: Option<i32>,
) -> Result<Vec<u8>> {
    ModuleEnvelope::from_module(module).to_bytes(compression_level)
}

type ModuleFactory = Box<dyn Fn(&StateDict) -> Result<Box<dyn TrainableModule>> + Send + Sync>;

/// Maps envelope type tags to module factories.
///
/// An envelope whose tag has no registered factory fails loudly instead of
/// producing a partially-constructed module.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every module kind this crate ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(crate::embedding::SparseEmbedding::KIND, |state| {
            Ok(Box::new(crate::embedding::SparseEmbedding::from_state_dict(
                state,
            )?))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&StateDict) -> Result<Box<dyn TrainableModule>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Rebuild a module from an envelope and restore its state.
    pub fn deserialize(&self, envelope: &ModuleEnvelope) -> Result<Box<dyn TrainableModule>> {
        let factory = self
            .factories
            .get(&envelope.kind)
            .with_context(|| format!("No module registered for kind {}", envelope.kind))?;
        let state = envelope.state_dict()?;
        let mut module = factory(&state)?;
        module.load_state_dict(&state)?;
        Ok(module)
    }

    pub fn deserialize_bytes(&self, data: &[u8]) -> Result<Box<dyn TrainableModule>> {
        self.deserialize(&ModuleEnvelope::from_bytes(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::SparseEmbedding;

    fn sample_module() -> SparseEmbedding {
        SparseEmbedding::new(&[4, 6], 3, 42).unwrap()
    }

    #[test]
    fn named_tensor_round_trips() {
        let array =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let tensor = NamedTensor::from_array("weight", &array);
        assert_eq!(tensor.to_array().unwrap(), array);
    }

    #[test]
    fn shape_and_data_must_agree() {
        let tensor = NamedTensor {
            name: "weight".to_string(),
            shape: vec![2, 3],
            data: vec![0.0; 5],
        };
        assert!(tensor.to_array().is_err());
    }

    #[test]
    fn envelope_bytes_round_trip() {
        let module = sample_module();
        let registry = ModuleRegistry::with_defaults();

        for compression in [None, Some(3)] {
            let bytes = serialize_module(&module, compression).unwrap();
            let restored = registry.deserialize_bytes(&bytes).unwrap();
            assert_eq!(restored.kind(), SparseEmbedding::KIND);
            assert_eq!(restored.state_dict(), module.state_dict());
        }
    }

    #[test]
    fn compressed_envelopes_are_smaller_and_sniffed() {
        let module = SparseEmbedding::new(&[64, 64], 8, 7).unwrap();
        let plain = serialize_module(&module, None).unwrap();
        let packed = serialize_module(&module, Some(3)).unwrap();
        assert!(packed.len() < plain.len());
        assert!(packed.starts_with(&ZSTD_MAGIC));
        // Decode never needs to be told which encoding it got.
        assert!(ModuleEnvelope::from_bytes(&packed).is_ok());
        assert!(ModuleEnvelope::from_bytes(&plain).is_ok());
    }

    #[test]
    fn unknown_kind_fails_loudly() {
        let module = sample_module();
        let mut envelope = ModuleEnvelope::from_module(&module);
        envelope.kind = "mystery_module".to_string();

        let registry = ModuleRegistry::with_defaults();
        let err = registry.deserialize(&envelope).err().unwrap();
        assert!(err.to_string().contains("mystery_module"));
    }

    #[test]
    fn unsupported_format_version_is_rejected() {
        let module = sample_module();
        let mut envelope = ModuleEnvelope::from_module(&module);
        envelope.format = ENVELOPE_FORMAT_VERSION + 1;
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert!(ModuleEnvelope::from_bytes(&bytes).is_err());
    }

    #[test]
    fn envelope_table_round_trip() {
        let module = sample_module();
        let envelope = ModuleEnvelope::from_module(&module);

        let table = envelope.to_table().unwrap();
        assert_eq!(table.num_rows(), envelope.tensors.len());

        let back = ModuleEnvelope::from_table(&table).unwrap();
        assert_eq!(back.kind, envelope.kind);
        assert_eq!(back.tensors, envelope.tensors);
    }
}
