//! Core library for fedrec ─ federated scaffolding for sparse recommendation
//! models: Criteo dataset access, batch collation, module envelopes and the
//! participant session glue.

pub mod collate;
pub mod config;
pub mod dataset;
pub mod device;
pub mod embedding;
pub mod generation;
pub mod loader;
pub mod metrics;
pub mod module;
pub mod session;
pub mod util;

pub use collate::{collate_length, collate_offset, offsets_to_lengths, CollateKind};
pub use collate::{LengthBatch, OffsetBatch};
pub use config::{FedConfig, StorageBackendKind};
pub use dataset::{CriteoDataset, Sample};
pub use device::{device_for_worker, Device};
pub use embedding::SparseEmbedding;
pub use generation::DatasetGenerator;
pub use loader::{Batch, DataLoader, LoaderOptions};
pub use metrics::Metrics;
pub use module::{ModuleEnvelope, ModuleRegistry, TrainableModule};
pub use session::ParticipantSession;
