use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Filesystem-backed implementation of RangeReader.
///
/// The file length is read once on open. Reads share one handle; the seek
/// and the read happen under the same lock.
pub struct LocalRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl LocalRangeReader {
    /// Open `path` for range reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();
        let file = File::open(path)
            .await
            .map_err(|e| local_error(path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| local_error(path, e))?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }
}

/// Map a filesystem error, keeping "not found" distinguishable.
pub(crate) fn local_error(path: &Path, err: std::io::Error) -> IoError {
    if err.kind() == std::io::ErrorKind::NotFound {
        IoError::NotFound(path.display().to_string())
    } else {
        IoError::Local {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl RangeReader for LocalRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let path = PathBuf::from(&self.identifier);
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| local_error(&path, e))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| local_error(&path, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
