//! Options shared by every pyramid loader.

use std::sync::Arc;

use crate::format::DecoderRegistry;
use crate::io::{BlockCache, RangeReader, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};

/// How to open a pyramid.
///
/// Each opened pyramid owns its caches and decoders; nothing here is shared
/// between pyramids unless the caller clones the same registry into both.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Block size of the per-file block cache
    pub block_size: usize,

    /// Blocks kept per opened file
    pub block_cache_capacity: usize,

    /// Byte offset of every top-level IFD of the main file, if known ahead
    /// of time. A table that does not match the file is ignored.
    pub offsets: Option<Vec<u64>>,

    /// Image series to open when the manifest declares several
    pub image_index: usize,

    pub decoders: Arc<DecoderRegistry>,
}

impl OpenOptions {
    /// Defaults:
    /// - 256KB blocks, 100 blocks per file
    /// - no offsets table
    /// - the first image series
    /// - the built-in decoders
    pub fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
            offsets: None,
            image_index: 0,
            decoders: Arc::new(DecoderRegistry::with_builtins()),
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_block_cache_capacity(mut self, capacity: usize) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    /// Supply the IFD offsets table of the main file.
    pub fn with_offsets(mut self, offsets: Vec<u64>) -> Self {
        self.offsets = Some(offsets);
        self
    }

    pub fn with_image_index(mut self, index: usize) -> Self {
        self.image_index = index;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    /// Wrap `reader` in a block cache sized by these options.
    pub(crate) fn cached<R: RangeReader + 'static>(&self, reader: R) -> Arc<dyn RangeReader> {
        Arc::new(BlockCache::with_capacity(
            reader,
            self.block_size,
            self.block_cache_capacity,
        ))
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}
