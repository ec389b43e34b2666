//! Key/value chunk stores.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{IoError, StoreError};
use crate::io::{get_object, head_object_size, join_key, local_error};

/// Read access to a Zarr hierarchy.
///
/// Keys are `/`-separated paths relative to the store root, such as
/// `0/.zarray` or `0/0.0.0.3.2`.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fetch an item; a missing key is [`StoreError::NotFound`].
    async fn get_item(&self, key: &str) -> Result<Bytes, StoreError>;

    async fn contains_item(&self, key: &str) -> Result<bool, StoreError>;

    /// Identifier for logging.
    fn identifier(&self) -> &str;
}

/// Fetch and decode a JSON document, `None` if the key does not exist.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ChunkStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get_item(key).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::InvalidJson {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn store_error(key: &str, err: IoError) -> StoreError {
    match err {
        IoError::NotFound(_) => StoreError::NotFound(key.to_string()),
        other => StoreError::Io(other),
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Items held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: HashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(key, data);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.items.insert(key.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Bytes, StoreError> {
        self.items
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn contains_item(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.items.contains_key(key))
    }

    fn identifier(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// LocalStore
// =============================================================================

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    identifier: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = root.display().to_string();
        Self { root, identifier }
    }
}

#[async_trait]
impl ChunkStore for LocalStore {
    async fn get_item(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.root.join(key);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| store_error(key, local_error(&path, e)))
    }

    async fn contains_item(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.root.join(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| store_error(key, local_error(&path, e)))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// S3Store
// =============================================================================

/// Objects below a prefix in an S3 bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
    identifier: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let prefix = prefix.into();
        let identifier = format!("s3://{}", join_key(&bucket, &prefix));
        Self {
            client,
            bucket,
            prefix,
            identifier,
        }
    }
}

#[async_trait]
impl ChunkStore for S3Store {
    async fn get_item(&self, key: &str) -> Result<Bytes, StoreError> {
        let object_key = join_key(&self.prefix, key);
        get_object(&self.client, &self.bucket, &object_key, None)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn contains_item(&self, key: &str) -> Result<bool, StoreError> {
        let object_key = join_key(&self.prefix, key);
        match head_object_size(&self.client, &self.bucket, &object_key).await {
            Ok(_) => Ok(true),
            Err(IoError::NotFound(_)) => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
