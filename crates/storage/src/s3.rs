// crates/storage/src/s3.rs
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{DataKey, RemoteStore, StoreError, StoreResult, Table};

/// Fixed wait applied when probing whether a device group's bucket exists.
#[derive(Debug, Clone)]
pub struct ExistenceProbe {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ExistenceProbe {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Connection settings for [`S3Store`]. Credentials come from the
/// environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, ...).
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub probe: ExistenceProbe,
}

/// S3-backed store: one bucket per device group.
pub struct S3Store {
    config: S3Config,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Client for the group's bucket, built once and cached.
    fn store_for_group(&self, group: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().expect("store cache poisoned");
        if let Some(store) = stores.get(group) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(group);
        if let Some(region) = &self.config.region {
            builder = builder.with_region(region.clone());
        }
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if self.config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
        stores.insert(group.to_string(), store.clone());
        Ok(store)
    }

    fn object_path(key: &DataKey) -> ObjectPath {
        ObjectPath::from(key.path.as_str())
    }

    async fn ensure_group(&self, group: &str) -> StoreResult<()> {
        if self.group_exists(group).await? {
            Ok(())
        } else {
            Err(StoreError::MissingGroup(group.to_string()))
        }
    }

    fn map_not_found(err: object_store::Error, key: &DataKey) -> StoreError {
        match err {
            object_store::Error::NotFound { .. } => StoreError::NotFound(key.clone()),
            other => StoreError::Backend(other),
        }
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn group_exists(&self, group: &str) -> StoreResult<bool> {
        let store = self.store_for_group(group)?;
        let probe = &self.config.probe;

        for attempt in 1..=probe.attempts {
            match store.list_with_delimiter(None).await {
                Ok(_) => return Ok(true),
                Err(err) => {
                    debug!(
                        "Bucket probe for group {} failed (attempt {}/{}): {}",
                        group, attempt, probe.attempts, err
                    );
                    if attempt < probe.attempts {
                        tokio::time::sleep(probe.delay).await;
                    }
                }
            }
        }

        warn!(
            "Group {} not visible after {} probe attempts",
            group, probe.attempts
        );
        Ok(false)
    }

    async fn read_data(&self, key: &DataKey) -> StoreResult<Table> {
        self.ensure_group(&key.group).await?;
        let store = self.store_for_group(&key.group)?;

        let result = store
            .get(&Self::object_path(key))
            .await
            .map_err(|e| Self::map_not_found(e, key))?;
        let data = result
            .bytes()
            .await
            .map_err(|e| Self::map_not_found(e, key))?;
        Table::from_bytes(&data)
    }

    async fn create_data(&self, key: &DataKey, body: &Table) -> StoreResult<()> {
        self.ensure_group(&key.group).await?;
        let store = self.store_for_group(&key.group)?;

        store
            .put(&Self::object_path(key), PutPayload::from(body.to_bytes()?))
            .await?;
        Ok(())
    }

    async fn update_data(&self, key: &DataKey, body: &Table) -> StoreResult<()> {
        self.ensure_group(&key.group).await?;
        let store = self.store_for_group(&key.group)?;
        let path = Self::object_path(key);

        // Overwrite only; a fresh object must go through create_data.
        store
            .head(&path)
            .await
            .map_err(|e| Self::map_not_found(e, key))?;
        store
            .put(&path, PutPayload::from(body.to_bytes()?))
            .await?;
        Ok(())
    }

    async fn delete_data(&self, key: &DataKey) -> StoreResult<()> {
        self.ensure_group(&key.group).await?;
        let store = self.store_for_group(&key.group)?;

        store
            .delete(&Self::object_path(key))
            .await
            .map_err(|e| Self::map_not_found(e, key))?;
        Ok(())
    }
}
