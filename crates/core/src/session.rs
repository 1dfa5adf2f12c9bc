// crates/core/src/session.rs
//
// One participant's end-to-end flow: generate, fetch, train, publish.
//
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{local_path, FedConfig, StorageConfig};
use crate::dataset::CriteoDataset;
use crate::device::device_for_worker;
use crate::embedding::SparseEmbedding;
use crate::generation::DatasetGenerator;
use crate::loader::{DataLoader, LoaderOptions};
use crate::metrics::Metrics;
use crate::module::{serialize_module, ModuleEnvelope, ModuleRegistry, TrainableModule};
use fedrec_storage::{
    DataKey, DirStore, ExistenceProbe, RemoteStore, S3Config, S3Store, StoreError,
};

const DEFAULT_EMBEDDING_DIM: usize = 16;
const DEFAULT_MODEL_PATH: &str = "models/latest.tbl";

/// Resolved checkpoint settings for one session.
struct CheckpointPlan {
    dir: PathBuf,
    interval: u32,
    compression: Option<i32>,
}

impl CheckpointPlan {
    fn from_config(config: &FedConfig) -> Option<Self> {
        let cfg = config.checkpoint.as_ref()?;
        if !cfg.enabled.unwrap_or(false) {
            debug!("Checkpointing not enabled in config");
            return None;
        }
        let interval = cfg.rounds_between_checkpoints.unwrap_or(100);
        if interval == 0 {
            warn!("rounds_between_checkpoints is 0, checkpointing disabled");
            return None;
        }
        let dir = local_path(cfg.uri.as_deref().unwrap_or(&config.dataset.data_folder));
        let compression = (cfg.compression.as_deref() == Some("zstd"))
            .then(|| cfg.compression_level.unwrap_or(3));
        Some(Self {
            dir,
            interval,
            compression,
        })
    }
}

/// Runs the configured phases of one federation participant.
pub struct ParticipantSession {
    config: Arc<FedConfig>,
    metrics: Metrics,
    registry: ModuleRegistry,
    run_id: String,
    checkpoint: Option<CheckpointPlan>,
    next_checkpoint_round: u32,
}

impl ParticipantSession {
    pub fn new(config: FedConfig) -> Self {
        // Load environment variables for S3 credentials
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }

        let checkpoint = CheckpointPlan::from_config(&config);
        let next_checkpoint_round = checkpoint.as_ref().map_or(0, |p| p.interval);
        Self {
            config: Arc::new(config),
            metrics: Metrics::new(),
            registry: ModuleRegistry::with_defaults(),
            run_id: Uuid::new_v4().to_string(),
            checkpoint,
            next_checkpoint_round,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Execute the phases enabled by the workflow section.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting participant session {}", self.run_id);
        let start_time = Instant::now();

        let device = device_for_worker(self.config.devices.as_ref())?;
        info!("Session device: {}", device);

        if self.config.should_generate_data() {
            info!("Phase 1: Generating data");
            let generator = DatasetGenerator::from_config(&self.config);
            generator.generate(&mut self.metrics)?;
        }

        let dataset = Arc::new(CriteoDataset::from_npz_dir(
            &self.config.data_folder_path(),
            self.config.dataset.max_ind_range.unwrap_or(0),
        )?);
        info!(
            "Loaded {} examples ({} dense features, {} sparse slots)",
            dataset.len(),
            dataset.num_dense_features(),
            dataset.num_sparse_slots()
        );

        let mut module = self.init_module(&dataset)?;

        if self.config.should_fetch() {
            info!("Phase 2: Fetching published state");
            self.fetch_into(&mut module).await?;
        }

        if self.config.should_train() {
            info!("Phase 3: Running local training");
            self.run_training(dataset.clone(), module.as_mut())?;
        }

        if self.config.should_publish() {
            info!("Phase 4: Publishing module state");
            self.publish(module.as_ref()).await?;
        }

        let total_time = start_time.elapsed();
        info!("Session completed in {:?}", total_time);
        self.metrics.record_total_time(total_time);
        Ok(())
    }

    /// Fresh embedding tables sized from the bucketing range or the
    /// configured per-slot cardinalities.
    fn init_module(&self, dataset: &CriteoDataset) -> Result<Box<dyn TrainableModule>> {
        let slots = dataset.num_sparse_slots();
        let range = self.config.dataset.max_ind_range.unwrap_or(0);

        let cardinalities: Vec<usize> = if range > 0 {
            // Bucketing bounds every index, so it also bounds the tables.
            vec![range as usize; slots]
        } else if let Some(cards) = &self.config.dataset.sparse_cardinalities {
            if cards.len() != slots {
                bail!(
                    "Config lists {} sparse cardinalities, dataset has {} slots",
                    cards.len(),
                    slots
                );
            }
            cards.iter().map(|&c| c as usize).collect()
        } else {
            bail!(
                "Cannot size embedding tables: set dataset.sparse_cardinalities \
                 or a positive dataset.max_ind_range"
            );
        };

        let model = self.config.model.as_ref();
        let dim = model
            .and_then(|m| m.embedding_dim)
            .unwrap_or(DEFAULT_EMBEDDING_DIM);
        let seed = model.and_then(|m| m.seed).unwrap_or(0);
        Ok(Box::new(SparseEmbedding::new(&cardinalities, dim, seed)?))
    }

    fn run_training(
        &mut self,
        dataset: Arc<CriteoDataset>,
        module: &mut dyn TrainableModule,
    ) -> Result<()> {
        let opts = LoaderOptions::from_config(&self.config)?;
        let loader = DataLoader::new(dataset, opts)?;
        let epochs = self.config.loader.epochs.unwrap_or(1);
        let mut round: u32 = 0;

        for epoch in 0..epochs {
            let mut epoch_examples = 0u64;
            for batch in loader.epoch(epoch) {
                let batch = batch?;
                let start = Instant::now();
                let pooled = module.forward(&batch)?;
                self.metrics
                    .record_batch(start.elapsed(), batch.num_examples());
                epoch_examples += batch.num_examples() as u64;
                round += 1;

                debug!(
                    "Round {}: pooled {} examples into {} features",
                    round,
                    pooled.nrows(),
                    pooled.ncols()
                );

                if self.should_checkpoint(round) {
                    self.write_checkpoint(module, round)?;
                    self.update_next_checkpoint(round);
                }
            }
            info!("Epoch {} completed ({} examples)", epoch, epoch_examples);
        }
        Ok(())
    }

    fn should_checkpoint(&self, round: u32) -> bool {
        self.checkpoint.is_some() && round >= self.next_checkpoint_round
    }

    fn update_next_checkpoint(&mut self, round: u32) {
        if let Some(plan) = &self.checkpoint {
            self.next_checkpoint_round = ((round / plan.interval) + 1) * plan.interval;
        }
    }

    fn write_checkpoint(&mut self, module: &dyn TrainableModule, round: u32) -> Result<()> {
        let Some(plan) = &self.checkpoint else {
            return Ok(());
        };

        let bytes = serialize_module(module, plan.compression)?;
        let dir = plan.dir.join(&self.run_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create checkpoint directory {:?}", dir))?;
        let path = dir.join(format!("round_{:08}.ckpt", round));
        std::fs::write(&path, &bytes)
            .with_context(|| format!("Failed to write checkpoint to {:?}", path))?;

        self.metrics.record_bytes_written(bytes.len() as u64);
        self.metrics.record_checkpoint();
        info!(
            "Checkpoint written: round={}, path={:?} ({} bytes)",
            round,
            path,
            bytes.len()
        );
        Ok(())
    }

    fn storage_key(storage: &StorageConfig) -> DataKey {
        DataKey::new(
            storage.group.clone(),
            storage
                .model_path
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
        )
    }

    fn open_store(storage: &StorageConfig) -> Box<dyn RemoteStore> {
        if storage.uri.starts_with("s3://") {
            Box::new(S3Store::new(S3Config {
                region: storage.region.clone(),
                endpoint: storage.endpoint.clone(),
                allow_http: storage.allow_http.unwrap_or(false),
                probe: ExistenceProbe::default(),
            }))
        } else {
            Box::new(DirStore::new(local_path(&storage.uri)))
        }
    }

    /// Pull the published envelope, if any, and rebuild the module from it.
    async fn fetch_into(&self, module: &mut Box<dyn TrainableModule>) -> Result<()> {
        let Some(storage) = &self.config.storage else {
            bail!("workflow.fetch requires a storage section");
        };
        let store = Self::open_store(storage);
        let key = Self::storage_key(storage);

        match store.read_data(&key).await {
            Ok(table) => {
                let envelope = ModuleEnvelope::from_table(&table)?;
                *module = self.registry.deserialize(&envelope)?;
                info!("Fetched published module state from {}", key);
            }
            Err(StoreError::NotFound(_)) => {
                info!("No published state at {}, starting fresh", key);
            }
            Err(e) => {
                return Err(e).context("Failed to fetch published module state");
            }
        }
        Ok(())
    }

    /// Push the module envelope as a table, overwriting a published object
    /// or creating the first one.
    async fn publish(&self, module: &dyn TrainableModule) -> Result<()> {
        let Some(storage) = &self.config.storage else {
            bail!("workflow.publish requires a storage section");
        };
        let store = Self::open_store(storage);
        let key = Self::storage_key(storage);
        let table = ModuleEnvelope::from_module(module).to_table()?;

        match store.update_data(&key, &table).await {
            Err(StoreError::NotFound(_)) => store
                .create_data(&key, &table)
                .await
                .context("Failed to publish module state")?,
            other => other.context("Failed to publish module state")?,
        }
        info!("Published module state to {}", key);
        Ok(())
    }
}
