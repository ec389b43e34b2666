//! Pixel source over one resolution level of a TIFF pyramid.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::dims::{tile_window, Labels, PlaneCoord, Selection, TileWindow};
use crate::error::SourceError;
use crate::pixel::{DType, PixelData, PixelSource, PixelSourceMeta};

use super::indexer::TiffIndexer;

/// One level of a TIFF-backed pyramid.
///
/// All levels of a pyramid share one [`TiffIndexer`] and therefore one set
/// of open files and parsed directories.
pub struct TiffPixelSource {
    indexer: Arc<TiffIndexer>,
    level: u32,
    labels: Labels,
    shape: Vec<u32>,
    dtype: DType,
    tile_size: u32,
    meta: Option<PixelSourceMeta>,
}

impl TiffPixelSource {
    pub fn new(
        indexer: Arc<TiffIndexer>,
        level: u32,
        labels: Labels,
        shape: Vec<u32>,
        dtype: DType,
        tile_size: u32,
        meta: Option<PixelSourceMeta>,
    ) -> Self {
        Self {
            indexer,
            level,
            labels,
            shape,
            dtype,
            tile_size,
            meta,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn plane(&self, selection: &Selection) -> Result<PlaneCoord, SourceError> {
        let indices = self.labels.resolve_within(selection, &self.shape)?;
        Ok(PlaneCoord::from_indices(&self.labels, &indices))
    }

    async fn read(
        &self,
        coord: PlaneCoord,
        window: TileWindow,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError> {
        let image = self.indexer.image(coord, self.level, cancel).await?;
        if image.dtype != self.dtype {
            return Err(SourceError::MalformedMetadata(format!(
                "plane {} holds {} samples, pyramid is {}",
                coord, image.dtype, self.dtype
            )));
        }
        let data = image.read_window(window, cancel).await?;
        Ok(PixelData {
            data,
            width: window.width,
            height: window.height,
        })
    }
}

#[async_trait]
impl PixelSource for TiffPixelSource {
    fn shape(&self) -> &[u32] {
        &self.shape
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn meta(&self) -> Option<&PixelSourceMeta> {
        self.meta.as_ref()
    }

    async fn get_raster(
        &self,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError> {
        let coord = self.plane(selection)?;
        let window = TileWindow {
            x0: 0,
            y0: 0,
            width: self.width(),
            height: self.height(),
        };
        trace!(level = self.level, %coord, "raster request");
        self.read(coord, window, cancel).await
    }

    async fn get_tile(
        &self,
        x: u32,
        y: u32,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError> {
        let window = tile_window(x, y, self.tile_size, self.width(), self.height())?;
        let coord = self.plane(selection)?;
        trace!(level = self.level, %coord, x, y, "tile request");
        self.read(coord, window, cancel).await
    }
}

impl std::fmt::Debug for TiffPixelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffPixelSource")
            .field("level", &self.level)
            .field("labels", &self.labels)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("tile_size", &self.tile_size)
            .finish()
    }
}
