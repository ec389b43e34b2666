use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, OnceCell, RwLock};

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB
/// Large enough to amortize remote latency, small enough to not waste bandwidth.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in number of blocks.
/// 100 blocks * 256KB = 25.6MB per opened file.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Block-based caching layer that wraps any RangeReader.
///
/// IFD parsing issues many small reads at scattered offsets (entry counts,
/// next-IFD pointers, tag arrays). The block cache turns them into a few
/// aligned fetches:
/// - Fixed-size blocks with LRU eviction
/// - Single-flight: concurrent requests for the same block share one fetch
/// - A fetch abandoned by a cancelled request is picked up by the next waiter
/// - Reads spanning several blocks are stitched together
pub struct BlockCache<R> {
    /// The underlying reader
    inner: Arc<R>,
    /// Block size in bytes
    block_size: usize,
    /// Completed blocks indexed by block number
    cache: RwLock<LruCache<u64, Bytes>>,
    /// Blocks currently being fetched
    in_flight: Mutex<HashMap<u64, Arc<OnceCell<Bytes>>>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Create a new BlockCache with default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Create a new BlockCache with custom block size and capacity.
    ///
    /// A zero capacity is bumped to one block.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Access the wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        {
            let mut cache = self.cache.write().await;
            if let Some(data) = cache.get(&block_idx) {
                return Ok(data.clone());
            }
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(block_idx).or_default())
        };

        let result = cell
            .get_or_try_init(|| self.fetch_block_from_source(block_idx))
            .await
            .cloned();

        if let Ok(ref data) = result {
            let mut cache = self.cache.write().await;
            cache.put(block_idx, data.clone());
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(&block_idx)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(&block_idx);
            }
        }

        result
    }

    async fn fetch_block_from_source(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        // The last block may be short
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        self.inner.read_exact_at(offset, len).await
    }

    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;

        if len == 0 {
            return Ok(Bytes::new());
        }

        let start_block = self.block_for_offset(offset);
        let end_block = self.block_for_offset(offset + len as u64 - 1);

        if start_block == end_block {
            let block = self.get_block(start_block).await?;
            let block_offset = self.offset_within_block(offset);
            return Ok(block.slice(block_offset..block_offset + len));
        }

        let mut result = BytesMut::with_capacity(len);
        let mut remaining = len;
        let mut current_offset = offset;

        for block_idx in start_block..=end_block {
            let block = self.get_block(block_idx).await?;
            let block_offset = self.offset_within_block(current_offset);
            let bytes_in_block = std::cmp::min(block.len() - block_offset, remaining);

            result.extend_from_slice(&block[block_offset..block_offset + bytes_in_block]);

            remaining -= bytes_in_block;
            current_offset += bytes_in_block as u64;
        }

        Ok(result.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
