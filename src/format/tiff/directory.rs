//! Lazily walked, cached IFD chain of one TIFF file.
//!
//! Directories are parsed on first use and kept for the lifetime of the
//! file. When the caller supplies an offsets table (one byte offset per
//! IFD) the directories it lists are located without walking; a table that
//! stops short is continued from its last entry, and one that disagrees
//! with the file is dropped in favour of walking.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SourceError, TiffError};
use crate::format::DecoderRegistry;
use crate::io::{cancellable, FlightMap, RangeReader};

use super::image::TiffImage;
use super::parser::{Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Progress of the next-IFD walk.
struct Chain {
    /// Offsets of directories 0..n found so far
    offsets: Vec<u64>,
    /// Offset of the next unvisited directory (0 = chain exhausted)
    next: u64,
    /// `offsets` came from a table whose last directory's successor is unread
    tail_unread: bool,
    seen: HashSet<u64>,
}

/// An opened TIFF file.
pub struct TiffFile {
    reader: Arc<dyn RangeReader>,
    header: TiffHeader,
    /// Caller-supplied offsets table, validated at open. It covers a prefix
    /// of the chain; later directories are found by walking on from its end.
    offsets: Option<Vec<u64>>,
    chain: Mutex<Chain>,
    ifds: FlightMap<u64, Arc<Ifd>>,
    images: FlightMap<u64, Arc<TiffImage>>,
    decoders: Arc<DecoderRegistry>,
}

impl TiffFile {
    /// Read the header and validate the optional offsets table.
    pub async fn open(
        reader: Arc<dyn RangeReader>,
        offsets: Option<Vec<u64>>,
        decoders: Arc<DecoderRegistry>,
        cancel: &CancellationToken,
    ) -> Result<Self, SourceError> {
        let size = reader.size();
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let header_bytes = cancellable(cancel, reader.read_exact_at(0, header_len)).await?;
        let header = TiffHeader::parse(&header_bytes, size)?;

        let offsets = offsets.filter(|table| {
            let valid = table.first() == Some(&header.first_ifd_offset)
                && table.iter().all(|&offset| offset < size);
            if !valid {
                warn!(
                    file = reader.identifier(),
                    entries = table.len(),
                    "offsets table does not match file, walking IFD chain instead"
                );
            }
            valid
        });

        debug!(
            file = reader.identifier(),
            bigtiff = header.is_bigtiff,
            offsets = offsets.is_some(),
            "opened TIFF"
        );

        let chain = match &offsets {
            Some(table) => Chain {
                offsets: table.clone(),
                next: 0,
                tail_unread: true,
                seen: table.iter().copied().collect(),
            },
            None => Chain {
                offsets: Vec::new(),
                next: header.first_ifd_offset,
                tail_unread: false,
                seen: HashSet::new(),
            },
        };

        Ok(TiffFile {
            chain: Mutex::new(chain),
            reader,
            header,
            offsets,
            ifds: FlightMap::new(),
            images: FlightMap::new(),
            decoders,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Byte offset of directory `index`, walking the chain as far as needed.
    pub async fn ifd_offset(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<u64, SourceError> {
        if let Some(&offset) = self.offsets.as_ref().and_then(|table| table.get(index)) {
            return Ok(offset);
        }

        let mut chain = self.chain.lock().await;
        while chain.offsets.len() <= index {
            if !self.advance(&mut chain, cancel).await? {
                return Err(TiffError::IfdIndexOutOfRange {
                    index,
                    count: chain.offsets.len(),
                }
                .into());
            }
        }
        Ok(chain.offsets[index])
    }

    /// Number of top-level directories.
    pub async fn directory_count(&self, cancel: &CancellationToken) -> Result<usize, SourceError> {
        let mut chain = self.chain.lock().await;
        while self.advance(&mut chain, cancel).await? {}
        Ok(chain.offsets.len())
    }

    /// Visit the next directory of the chain; false once it is exhausted.
    async fn advance(&self, chain: &mut Chain, cancel: &CancellationToken) -> Result<bool, SourceError> {
        if chain.tail_unread {
            if let Some(&last) = chain.offsets.last() {
                chain.next = self.ifd_at(last, cancel).await?.next_ifd_offset;
            }
            chain.tail_unread = false;
        }
        let offset = chain.next;
        if offset == 0 {
            return Ok(false);
        }
        if !chain.seen.insert(offset) {
            warn!(file = self.identifier(), offset, "IFD chain loops back, stopping");
            chain.next = 0;
            return Ok(false);
        }
        let ifd = match self.ifd_at(offset, cancel).await {
            Ok(ifd) => ifd,
            Err(e) => {
                chain.seen.remove(&offset);
                return Err(e);
            }
        };
        chain.offsets.push(offset);
        chain.next = ifd.next_ifd_offset;
        Ok(true)
    }

    /// The directory stored at `offset`, parsed once.
    pub async fn ifd_at(
        &self,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<Ifd>, SourceError> {
        self.ifds
            .get_or_try_init(offset, || async {
                if offset >= self.reader.size() {
                    return Err(SourceError::from(TiffError::InvalidIfdOffset(offset)));
                }
                let count_size = self.header.ifd_count_size();
                let count_bytes =
                    cancellable(cancel, self.reader.read_exact_at(offset, count_size)).await?;
                let entry_count = self.header.read_entry_count(&count_bytes);
                let ifd_size = Ifd::calculate_size(entry_count, &self.header);
                let ifd_bytes =
                    cancellable(cancel, self.reader.read_exact_at(offset, ifd_size)).await?;
                let ifd = Ifd::parse(&ifd_bytes, &self.header)?;
                debug!(file = self.identifier(), offset, entries = entry_count, "parsed IFD");
                Ok::<_, SourceError>(Arc::new(ifd))
            })
            .await
    }

    /// Directory `index` of the top-level chain.
    pub async fn ifd(&self, index: usize, cancel: &CancellationToken) -> Result<Arc<Ifd>, SourceError> {
        let offset = self.ifd_offset(index, cancel).await?;
        self.ifd_at(offset, cancel).await
    }

    /// The image described by the directory at `offset`.
    pub async fn image_at(
        &self,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<TiffImage>, SourceError> {
        self.images
            .get_or_try_init(offset, || async {
                let ifd = self.ifd_at(offset, cancel).await?;
                let image = TiffImage::from_ifd(
                    Arc::clone(&self.reader),
                    &self.header,
                    &ifd,
                    &self.decoders,
                    cancel,
                )
                .await?;
                Ok::<_, SourceError>(Arc::new(image))
            })
            .await
    }

    /// The image of top-level directory `index`.
    pub async fn image(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Arc<TiffImage>, SourceError> {
        let offset = self.ifd_offset(index, cancel).await?;
        self.image_at(offset, cancel).await
    }

    /// `ImageDescription` of directory `index`, if present.
    pub async fn description(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, SourceError> {
        let ifd = self.ifd(index, cancel).await?;
        match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
            Some(entry) => {
                let values = ValueReader::new(self.reader.as_ref(), &self.header);
                Ok(Some(cancellable(cancel, values.read_string(entry)).await?))
            }
            None => Ok(None),
        }
    }

    /// Number of directories parsed so far.
    pub async fn parsed_ifd_count(&self) -> usize {
        self.ifds.len().await
    }
}

impl std::fmt::Debug for TiffFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffFile")
            .field("identifier", &self.identifier())
            .field("header", &self.header)
            .field("offsets", &self.offsets.as_ref().map(Vec::len))
            .finish()
    }
}
