use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Gateway to raw uploads and derived artifacts. Locations are opaque to
/// callers; `object_location` is the only place the key layout is known.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    max_object_bytes: usize,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let store = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            max_object_bytes: cfg.ingest_max_body_bytes,
        })
    }

    /// Store bytes at the location. The write is atomic: either the whole
    /// object becomes visible or nothing does.
    pub async fn put(&self, location: &str, data: Bytes) -> Result<(), AppError> {
        if data.len() > self.max_object_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "object of {} bytes exceeds the {} byte cap",
                data.len(),
                self.max_object_bytes
            )));
        }

        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await?;
        Ok(())
    }

    /// Retrieve the full object buffered in memory.
    pub async fn get(&self, location: &str) -> Result<Bytes, AppError> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    pub async fn exists(&self, location: &str) -> Result<bool, AppError> {
        let path = ObjPath::from(location);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete all objects below the prefix.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<object_store::ObjectMeta>, AppError> {
        let prefix_path = prefix.map(ObjPath::from);
        Ok(self.store.list(prefix_path.as_ref()).try_collect().await?)
    }
}

/// Canonical object key for an upload: `{tenant}/{document_id}/{sha256}.{ext}`.
pub fn object_location(tenant_id: &str, document_id: i64, sha256: &str, ext: &str) -> String {
    if ext.is_empty() {
        format!("{tenant_id}/{document_id}/{sha256}")
    } else {
        format!("{tenant_id}/{document_id}/{sha256}.{ext}")
    }
}

/// Document-scoped prefix, for cascade deletes.
pub fn document_prefix(tenant_id: &str, document_id: i64) -> String {
    format!("{tenant_id}/{document_id}/")
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// File extension for a key, derived from the upload name.
pub fn extension_of(file_name: &str) -> &str {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
}

async fn create_storage_backend(cfg: &AppConfig) -> Result<DynStore, AppError> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await?;
            }
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => Ok(Arc::new(InMemory::new())),
        StorageKind::S3 => {
            let bucket = cfg
                .s3_bucket
                .as_deref()
                .ok_or_else(|| AppError::Config("S3_BUCKET is not set".into()))?;

            let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);
            if let Some(endpoint) = &cfg.s3_endpoint {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }
            if let Some(key) = &cfg.s3_key {
                builder = builder.with_access_key_id(key);
            }
            if let Some(secret) = &cfg.s3_secret {
                builder = builder.with_secret_access_key(secret);
            }
            if let Some(region) = &cfg.s3_region {
                builder = builder.with_region(region);
            }

            let store = builder
                .build()
                .map_err(|e| AppError::Config(format!("invalid S3 configuration: {e}")))?;
            Ok(Arc::new(store))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::testing::test_config;

    #[tokio::test]
    async fn test_memory_backend_basic_operations() {
        let storage = StorageManager::new(&test_config())
            .await
            .expect("create storage manager");

        let location = "tenant-a/1/abc123.txt";
        let data = b"test data for the storage gateway";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        assert!(storage.exists(location).await.expect("exists check"));

        storage.delete_prefix("tenant-a/1/").await.expect("delete");
        assert!(!storage
            .exists(location)
            .await
            .expect("exists check after delete"));
    }

    #[tokio::test]
    async fn test_put_rejects_oversize_objects() {
        let mut cfg = test_config();
        cfg.ingest_max_body_bytes = 64;
        let storage = StorageManager::new(&cfg).await.expect("create storage");

        let result = storage
            .put("tenant-a/1/too-big.bin", Bytes::from(vec![0u8; 65]))
            .await;
        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
        assert!(!storage
            .exists("tenant-a/1/too-big.bin")
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn test_get_missing_object_is_not_found() {
        let storage = StorageManager::new(&test_config())
            .await
            .expect("create storage");
        let result = storage.get("tenant-a/1/missing.pdf").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_prefix_leaves_other_documents_alone() {
        let storage = StorageManager::new(&test_config())
            .await
            .expect("create storage");

        storage
            .put("tenant-a/1/a.txt", Bytes::from_static(b"one"))
            .await
            .expect("put 1");
        storage
            .put("tenant-a/2/b.txt", Bytes::from_static(b"two"))
            .await
            .expect("put 2");

        storage
            .delete_prefix(&document_prefix("tenant-a", 1))
            .await
            .expect("delete");

        assert!(!storage.exists("tenant-a/1/a.txt").await.expect("exists"));
        assert!(storage.exists("tenant-a/2/b.txt").await.expect("exists"));
    }

    #[test]
    fn test_object_location_layout() {
        assert_eq!(
            object_location("acme", 7, "deadbeef", "pdf"),
            "acme/7/deadbeef.pdf"
        );
        assert_eq!(object_location("acme", 7, "deadbeef", ""), "acme/7/deadbeef");
        assert_eq!(extension_of("report.final.PDF"), "PDF");
        assert_eq!(extension_of("noext"), "");
    }

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
