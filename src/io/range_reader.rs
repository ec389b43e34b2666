use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a local or remote resource.
///
/// The TIFF parser and the chunk readers only ever see this trait, so a
/// multi-gigabyte image is never downloaded whole. Implementations must be
/// thread-safe; they are shared between concurrent tile requests.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and cache keys).
    fn identifier(&self) -> &str;
}

/// Check that `[offset, offset + len)` lies inside a resource of `size` bytes.
#[inline]
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

/// In-memory resource, used for small companion files and in tests.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Read a whole resource into memory.
///
/// Only used for small sidecar documents (companion OME-XML).
pub async fn read_all<R: RangeReader + ?Sized>(reader: &R) -> Result<Bytes, IoError> {
    reader.read_exact_at(0, reader.size() as usize).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 10, 10).is_ok());
        assert!(check_range(5, 5, 10).is_ok());
        assert!(check_range(5, 6, 10).is_err());
        assert!(check_range(u64::MAX, 2, 10).is_err());
    }

    #[tokio::test]
    async fn test_memory_reader() {
        let reader = MemoryRangeReader::new(vec![1u8, 2, 3, 4, 5], "mem://a");
        assert_eq!(reader.size(), 5);
        assert_eq!(&reader.read_exact_at(1, 3).await.unwrap()[..], &[2, 3, 4]);
        assert!(matches!(
            reader.read_exact_at(3, 3).await,
            Err(IoError::RangeOutOfBounds { .. })
        ));
        assert_eq!(read_all(&reader).await.unwrap().len(), 5);
    }
}
