pub mod dir;
pub mod s3;
pub use dir::DirStore;
pub use s3::{ExistenceProbe, S3Config, S3Store};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one stored object: the device group it belongs to and the
/// object path inside that group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataKey {
    pub group: String,
    pub path: String,
}

impl DataKey {
    pub fn new(group: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.path)
    }
}

/// Row/column payload stored under a [`DataKey`].
///
/// Every row must have one value per column; the codec is JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<serde_json::Value>) -> StoreResult<()> {
        if row.len() != self.columns.len() {
            return Err(StoreError::MalformedTable(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn check_shape(&self) -> StoreResult<()> {
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(StoreError::MalformedTable(format!(
                    "row {} has {} values, table has {} columns",
                    i,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> StoreResult<Bytes> {
        self.check_shape()?;
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        let table: Table = serde_json::from_slice(data)?;
        table.check_shape()?;
        Ok(table)
    }
}

/// Errors raised by remote-store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The target device group (bucket/directory) does not exist.
    #[error("Device group {0} does not exist")]
    MissingGroup(String),

    /// No object stored under the key.
    #[error("No object stored at {0}")]
    NotFound(DataKey),

    /// Table payload violates the row/column contract.
    #[error("Malformed table payload: {0}")]
    MalformedTable(String),

    /// Backend object-store error.
    #[error("Object store error: {0}")]
    Backend(#[from] object_store::Error),

    /// Payload codec error.
    #[error("Table codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD interface over remote object storage, keyed by `(group, path)`.
///
/// Every operation verifies the target group exists and fails with
/// [`StoreError::MissingGroup`] otherwise; group provisioning happens out of
/// band.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether the device group is visible in the backing store.
    async fn group_exists(&self, group: &str) -> StoreResult<bool>;

    /// Fetch the table stored under `key`.
    async fn read_data(&self, key: &DataKey) -> StoreResult<Table>;

    /// Store a new table under `key`.
    async fn create_data(&self, key: &DataKey, body: &Table) -> StoreResult<()>;

    /// Replace the table stored under `key`; the object must already exist.
    async fn update_data(&self, key: &DataKey, body: &Table) -> StoreResult<()>;

    /// Remove the object stored under `key`.
    async fn delete_data(&self, key: &DataKey) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_round_trips_through_bytes() {
        let mut table = Table::new(vec!["name".to_string(), "value".to_string()]);
        table.push_row(vec![json!("alpha"), json!(1.5)]).unwrap();
        table.push_row(vec![json!("beta"), json!([1, 2, 3])]).unwrap();

        let bytes = table.to_bytes().unwrap();
        let back = Table::from_bytes(&bytes).unwrap();
        assert_eq!(table, back);
        assert_eq!(back.column_index("value"), Some(1));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut table = Table::new(vec!["only".to_string()]);
        let err = table.push_row(vec![json!(1), json!(2)]).unwrap_err();
        assert!(matches!(err, StoreError::MalformedTable(_)));

        // A ragged payload is also rejected on decode.
        let raw = br#"{"columns":["a","b"],"rows":[[1]]}"#;
        assert!(matches!(
            Table::from_bytes(raw),
            Err(StoreError::MalformedTable(_))
        ));
    }
}
