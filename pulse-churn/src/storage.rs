//! Dataset store boundary
//!
//! Uploaded files and derived feature sets live in an external object store.
//! The trait keeps that collaborator narrow: put bytes under a key, get them
//! back. The local-directory implementation is the default backend and the
//! one tests use.

use futures::future::BoxFuture;
use pulse_common::{Error, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Durable object storage for uploaded and derived files
pub trait DatasetStore: Send + Sync {
    /// Store bytes under a key, overwriting any existing object
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Retrieve a previously stored object
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Object key for an uploaded raw dataset
pub fn raw_dataset_key(org_id: Uuid, dataset_id: Uuid) -> String {
    format!("org_{}/raw/{}.csv", org_id, dataset_id)
}

/// Object key for a derived feature set
pub fn feature_set_key(org_id: Uuid, dataset_id: Uuid) -> String {
    format!("org_{}/features/{}.csv", org_id, dataset_id)
}

/// Object key for a bulk-prediction input file
pub fn bulk_input_key(org_id: Uuid, batch_id: Uuid) -> String {
    format!("org_{}/inference_inputs/{}.csv", org_id, batch_id)
}

/// Local-directory object store rooted in the data folder
pub struct LocalDatasetStore {
    root: PathBuf,
}

impl LocalDatasetStore {
    pub fn new(data_folder: &Path) -> Self {
        Self {
            root: data_folder.join("objects"),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        // Keys are generated internally; reject anything path-like anyway
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::InvalidInput(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

impl DatasetStore for LocalDatasetStore {
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.object_path(key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, bytes).await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let path = self.object_path(key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::NotFound(format!("Object not found: {}", key)))
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDatasetStore::new(dir.path());

        let key = raw_dataset_key(Uuid::new_v4(), Uuid::new_v4());
        store.put(&key, b"customer_id,event_date\n".to_vec()).await.unwrap();

        let bytes = store.get(&key).await.unwrap();
        assert_eq!(bytes, b"customer_id,event_date\n");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDatasetStore::new(dir.path());

        let err = store.get("org_x/raw/missing.csv").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_traversal_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDatasetStore::new(dir.path());

        let err = store.get("../outside.csv").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
