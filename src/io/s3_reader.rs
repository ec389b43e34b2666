use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// S3-backed implementation of RangeReader.
///
/// Reads byte ranges from objects in S3 or S3-compatible storage (MinIO etc.)
/// using HTTP range requests. The object size is fetched once on creation via HEAD.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// Create a reader for `s3://bucket/key`, failing with `NotFound` if the
    /// object does not exist.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let size = head_object_size(&client, &bucket, &key).await?;
        let identifier = format!("s3://{}/{}", bucket, key);

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // HTTP ranges are inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        get_object(&self.client, &self.bucket, &self.key, Some(range)).await
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// HEAD an object and return its content length.
pub(crate) async fn head_object_size(
    client: &Client,
    bucket: &str,
    key: &str,
) -> Result<u64, IoError> {
    let head = client
        .head_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            let is_not_found = e
                .as_service_error()
                .map(|se| se.is_not_found())
                .unwrap_or(false)
                || e.raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

            if is_not_found {
                IoError::NotFound(format!("s3://{}/{}", bucket, key))
            } else {
                IoError::S3(e.to_string())
            }
        })?;

    Ok(head.content_length().unwrap_or(0).max(0) as u64)
}

/// GET an object, optionally restricted to an HTTP byte range.
pub(crate) async fn get_object(
    client: &Client,
    bucket: &str,
    key: &str,
    range: Option<String>,
) -> Result<Bytes, IoError> {
    let resp = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .set_range(range)
        .send()
        .await
        .map_err(|e| {
            let is_missing_key = e
                .as_service_error()
                .map(|se| se.is_no_such_key())
                .unwrap_or(false);
            if is_missing_key {
                IoError::NotFound(format!("s3://{}/{}", bucket, key))
            } else {
                IoError::S3(e.to_string())
            }
        })?;

    let data = resp
        .body
        .collect()
        .await
        .map_err(|e| IoError::Connection(e.to_string()))?
        .into_bytes();

    Ok(data)
}

/// Create an S3 client with optional custom endpoint.
///
/// S3-compatible services (MinIO) need path-style addressing, which is
/// switched on whenever an endpoint is given.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
