//! File sources resolve names found in manifests to range readers.
//!
//! Multi-file OME-TIFF companions and ad-hoc stacks reference sibling files
//! by name; the loader asks a [`FileSource`] to open them, lazily and at most
//! once per pyramid.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{LocalRangeReader, MemoryRangeReader, RangeReader, S3RangeReader};
use crate::error::IoError;

/// Trait for creating range readers from file names.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: RangeReader + 'static;

    /// Open the file called `name` (relative to the source's root).
    async fn open(&self, name: &str) -> Result<Self::Reader, IoError>;
}

/// Files below a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    root: PathBuf,
}

impl LocalFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl FileSource for LocalFileSource {
    type Reader = LocalRangeReader;

    async fn open(&self, name: &str) -> Result<Self::Reader, IoError> {
        LocalRangeReader::open(self.root.join(name)).await
    }
}

/// Objects below a prefix in an S3 bucket.
#[derive(Clone)]
pub struct S3FileSource {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3FileSource {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn key_for(&self, name: &str) -> String {
        join_key(&self.prefix, name)
    }
}

#[async_trait]
impl FileSource for S3FileSource {
    type Reader = S3RangeReader;

    async fn open(&self, name: &str) -> Result<Self::Reader, IoError> {
        S3RangeReader::new(self.client.clone(), self.bucket.clone(), self.key_for(name)).await
    }
}

/// Named in-memory files.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSource {
    files: HashMap<String, Bytes>,
}

impl MemoryFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.files.insert(name.into(), data.into());
        self
    }
}

#[async_trait]
impl FileSource for MemoryFileSource {
    type Reader = MemoryRangeReader;

    async fn open(&self, name: &str) -> Result<Self::Reader, IoError> {
        self.files
            .get(name)
            .map(|data| MemoryRangeReader::new(data.clone(), format!("mem://{}", name)))
            .ok_or_else(|| IoError::NotFound(name.to_string()))
    }
}

/// Join a key prefix and a relative name with exactly one `/`.
pub(crate) fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
