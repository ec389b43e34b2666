//! Plane and resolution level → (file, IFD) resolution.
//!
//! One [`Layout`] is chosen when a pyramid is opened and never changes.
//! Files named by a layout are opened on first use through a
//! [`FileOpener`] and cached, as are their parsed directories.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dims::{DimensionOrder, PlaneCoord, PlaneSizes};
use crate::error::{IoError, SourceError};
use crate::format::tiff::{TiffFile, TiffImage};
use crate::format::DecoderRegistry;
use crate::io::{cancellable, FileSource, FlightMap, RangeReader};
use crate::manifest::PlaneRef;
use crate::options::OpenOptions;

// =============================================================================
// Layouts
// =============================================================================

/// How planes and resolution levels map onto TIFF directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// One IFD per plane in dimension order; level L > 0 is entry L - 1 of
    /// the plane's SubIFDs.
    SubResolution {
        first_ifd: u32,
        order: DimensionOrder,
        sizes: PlaneSizes,
    },
    /// Every level appended as a further run of `T * C * Z` top-level IFDs.
    Legacy {
        first_ifd: u32,
        order: DimensionOrder,
        sizes: PlaneSizes,
    },
    /// Explicit plane table, possibly spanning several files. A plane
    /// without a file name lives in the main file.
    MultiFile { planes: BTreeMap<PlaneCoord, PlaneRef> },
    /// Caller-declared stack; every plane names its file.
    Stack { planes: BTreeMap<PlaneCoord, PlaneRef> },
}

impl Layout {
    pub fn kind(&self) -> &'static str {
        match self {
            Layout::SubResolution { .. } => "sub-resolution",
            Layout::Legacy { .. } => "legacy",
            Layout::MultiFile { .. } => "multi-file",
            Layout::Stack { .. } => "stack",
        }
    }
}

/// Top-level IFD index of `coord` at `level` in a legacy file.
pub fn legacy_ifd_index(
    order: DimensionOrder,
    sizes: PlaneSizes,
    first_ifd: u32,
    coord: PlaneCoord,
    level: u32,
) -> u64 {
    first_ifd as u64 + level as u64 * sizes.plane_count() + order.plane_index(coord, sizes)
}

/// Levels held by a legacy file with `directory_count` top-level IFDs.
///
/// A trailing partial run of directories is ignored.
pub fn legacy_level_count(directory_count: usize, first_ifd: u32, sizes: PlaneSizes) -> u32 {
    let planes = sizes.plane_count().max(1);
    let available = (directory_count as u64).saturating_sub(first_ifd as u64);
    (available / planes).min(u32::MAX as u64) as u32
}

// =============================================================================
// File opening
// =============================================================================

/// Opens sibling files by name, already wrapped in a block cache.
#[async_trait]
pub trait FileOpener: Send + Sync {
    async fn open(&self, name: &str) -> Result<Arc<dyn RangeReader>, IoError>;
}

/// A [`FileSource`] plus the cache settings of the pyramid.
pub(crate) struct CachedFileSource<S> {
    source: S,
    options: OpenOptions,
}

impl<S> CachedFileSource<S> {
    pub(crate) fn new(source: S, options: OpenOptions) -> Self {
        Self { source, options }
    }
}

#[async_trait]
impl<S: FileSource> FileOpener for CachedFileSource<S> {
    async fn open(&self, name: &str) -> Result<Arc<dyn RangeReader>, IoError> {
        let reader = self.source.open(name).await?;
        Ok(self.options.cached(reader))
    }
}

// =============================================================================
// Indexer
// =============================================================================

/// Resolves planes of one pyramid to decoded-image handles.
pub struct TiffIndexer {
    layout: Layout,
    main: Option<Arc<TiffFile>>,
    opener: Option<Arc<dyn FileOpener>>,
    files: FlightMap<String, Arc<TiffFile>>,
    decoders: Arc<DecoderRegistry>,
}

impl TiffIndexer {
    pub fn new(
        layout: Layout,
        main: Option<Arc<TiffFile>>,
        opener: Option<Arc<dyn FileOpener>>,
        decoders: Arc<DecoderRegistry>,
    ) -> Self {
        Self {
            layout,
            main,
            opener,
            files: FlightMap::new(),
            decoders,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of sibling files opened so far.
    pub async fn open_file_count(&self) -> usize {
        self.files.len().await
    }

    /// The file holding `name`, or the main file for `None`.
    pub async fn file(
        &self,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Arc<TiffFile>, SourceError> {
        let Some(name) = name else {
            return self.main.clone().ok_or_else(|| {
                SourceError::MalformedMetadata("plane refers to a main file that is not open".to_string())
            });
        };
        let opener = self.opener.as_ref().ok_or_else(|| {
            SourceError::MalformedMetadata(format!("no file source to open {:?}", name))
        })?;

        self.files
            .get_or_try_init(name.to_string(), || async {
                let reader = cancellable(cancel, opener.open(name)).await?;
                let file =
                    TiffFile::open(reader, None, Arc::clone(&self.decoders), cancel).await?;
                debug!(file = name, "opened sibling TIFF");
                Ok::<_, SourceError>(Arc::new(file))
            })
            .await
    }

    /// The image of plane `coord` at resolution `level`.
    pub async fn image(
        &self,
        coord: PlaneCoord,
        level: u32,
        cancel: &CancellationToken,
    ) -> Result<Arc<TiffImage>, SourceError> {
        let (file, base) = match &self.layout {
            Layout::Legacy {
                first_ifd,
                order,
                sizes,
            } => {
                let file = self.file(None, cancel).await?;
                let index = legacy_ifd_index(*order, *sizes, *first_ifd, coord, level);
                return file.image(index as usize, cancel).await;
            }
            Layout::SubResolution {
                first_ifd,
                order,
                sizes,
            } => {
                let file = self.file(None, cancel).await?;
                let index = *first_ifd as u64 + order.plane_index(coord, *sizes);
                let offset = file.ifd_offset(index as usize, cancel).await?;
                (file, offset)
            }
            Layout::MultiFile { planes } => {
                let plane = planes.get(&coord).ok_or(SourceError::MissingPlane {
                    t: coord.t,
                    c: coord.c,
                    z: coord.z,
                })?;
                let file = self.file(plane.file_name.as_deref(), cancel).await?;
                let offset = file.ifd_offset(plane.ifd as usize, cancel).await?;
                (file, offset)
            }
            Layout::Stack { planes } => {
                let plane = planes.get(&coord).ok_or(SourceError::IncompleteStack {
                    t: coord.t,
                    c: coord.c,
                    z: coord.z,
                })?;
                let file = self.file(plane.file_name.as_deref(), cancel).await?;
                let offset = file.ifd_offset(plane.ifd as usize, cancel).await?;
                (file, offset)
            }
        };

        let image = file.image_at(base, cancel).await?;
        if level == 0 {
            return Ok(image);
        }
        let offset = image
            .sub_ifds
            .get(level as usize - 1)
            .copied()
            .ok_or_else(|| {
                SourceError::MalformedMetadata(format!(
                    "plane {} has {} SubIFDs, level {} requested",
                    coord,
                    image.sub_ifds.len(),
                    level
                ))
            })?;
        file.image_at(offset, cancel).await
    }

    /// Resolution levels available, judged from the first plane.
    pub async fn level_count(&self, cancel: &CancellationToken) -> Result<u32, SourceError> {
        match &self.layout {
            Layout::Legacy {
                first_ifd, sizes, ..
            } => {
                let file = self.file(None, cancel).await?;
                let count = file.directory_count(cancel).await?;
                Ok(legacy_level_count(count, *first_ifd, *sizes).max(1))
            }
            _ => {
                let base = self.image(self.first_plane(), 0, cancel).await?;
                Ok(base.sub_ifds.len() as u32 + 1)
            }
        }
    }

    /// The plane used to probe geometry: the origin, or the first entry of
    /// an explicit table.
    pub fn first_plane(&self) -> PlaneCoord {
        match &self.layout {
            Layout::MultiFile { planes } | Layout::Stack { planes } => {
                planes.keys().next().copied().unwrap_or_default()
            }
            _ => PlaneCoord::default(),
        }
    }
}

impl std::fmt::Debug for TiffIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffIndexer")
            .field("layout", &self.layout)
            .field("main", &self.main.as_ref().map(|m| m.identifier().to_string()))
            .finish()
    }
}
