//
//
use async_trait::async_trait;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{DataKey, RemoteStore, StoreError, StoreResult, Table};

/// Local-directory store: one directory per device group under `root`.
///
/// Used for tests and single-host runs; shares the group-existence contract
/// with the remote backends.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Store everything under `root` on the local filesystem.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, key: &DataKey) -> PathBuf {
        self.root.join(&key.group).join(&key.path)
    }

    fn ensure_group(&self, group: &str) -> StoreResult<()> {
        if self.root.join(group).is_dir() {
            Ok(())
        } else {
            Err(StoreError::MissingGroup(group.to_string()))
        }
    }

    fn map_io(err: io::Error, key: &DataKey) -> StoreError {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(key.clone())
        } else {
            StoreError::Io(err)
        }
    }
}

#[async_trait]
impl RemoteStore for DirStore {
    async fn group_exists(&self, group: &str) -> StoreResult<bool> {
        Ok(self.root.join(group).is_dir())
    }

    async fn read_data(&self, key: &DataKey) -> StoreResult<Table> {
        self.ensure_group(&key.group)?;
        let data = fs::read(self.object_path(key)).map_err(|e| Self::map_io(e, key))?;
        Table::from_bytes(&data)
    }

    async fn create_data(&self, key: &DataKey, body: &Table) -> StoreResult<()> {
        self.ensure_group(&key.group)?;
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, body.to_bytes()?)?;
        Ok(())
    }

    async fn update_data(&self, key: &DataKey, body: &Table) -> StoreResult<()> {
        self.ensure_group(&key.group)?;
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(StoreError::NotFound(key.clone()));
        }
        fs::write(path, body.to_bytes()?)?;
        Ok(())
    }

    async fn delete_data(&self, key: &DataKey) -> StoreResult<()> {
        self.ensure_group(&key.group)?;
        fs::remove_file(self.object_path(key)).map_err(|e| Self::map_io(e, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_table() -> Table {
        let mut table = Table::new(vec!["parameter".to_string(), "values".to_string()]);
        table
            .push_row(vec![json!("weight"), json!([0.1, 0.2])])
            .unwrap();
        table
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("edge-group")).unwrap();

        let store = DirStore::new(dir.path());
        let key = DataKey::new("edge-group", "models/user0.tbl");
        let table = sample_table();

        store.create_data(&key, &table).await.unwrap();
        assert_eq!(store.read_data(&key).await.unwrap(), table);

        let mut updated = sample_table();
        updated
            .push_row(vec![json!("bias"), json!([0.0])])
            .unwrap();
        store.update_data(&key, &updated).await.unwrap();
        assert_eq!(store.read_data(&key).await.unwrap(), updated);

        store.delete_data(&key).await.unwrap();
        assert!(matches!(
            store.read_data(&key).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_group_is_a_domain_error() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());
        let key = DataKey::new("absent", "anything.tbl");

        assert!(!store.group_exists("absent").await.unwrap());
        for result in [
            store.read_data(&key).await.map(|_| ()),
            store.create_data(&key, &sample_table()).await,
            store.update_data(&key, &sample_table()).await,
            store.delete_data(&key).await,
        ] {
            assert!(matches!(result, Err(StoreError::MissingGroup(_))));
        }
    }

    #[tokio::test]
    async fn update_requires_an_existing_object() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("g")).unwrap();

        let store = DirStore::new(dir.path());
        let key = DataKey::new("g", "fresh.tbl");
        assert!(matches!(
            store.update_data(&key, &sample_table()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
