//! The pixel source contract shared by every on-disk layout.
//!
//! A [`PixelSource`] is one resolution level. Callers resolve planes by
//! [`Selection`] and never branch on the storage format.

mod buffer;
mod dtype;
mod pyramid;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::dims::{Labels, Selection};
use crate::error::{SourceError, TileBoundsError};
use crate::manifest::ChannelInfo;

pub use buffer::{to_native_endian, TypedBuffer};
pub(crate) use buffer::copy_rows;
pub use dtype::{DType, Endian};
pub use pyramid::Pyramid;

// =============================================================================
// PixelData
// =============================================================================

/// A decoded raster or tile.
///
/// Interleaved sources return `width * height * samples` values with the
/// samples of each pixel adjacent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelData {
    pub data: TypedBuffer,
    pub width: u32,
    pub height: u32,
}

impl PixelData {
    /// Samples per pixel implied by the buffer length.
    pub fn samples_per_pixel(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        if pixels == 0 {
            0
        } else {
            self.data.len() / pixels
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Physical extent of one pixel along an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub size: f64,
    pub unit: String,
}

/// Optional per-source metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelSourceMeta {
    /// Keyed by axis label (`x`, `y`, `z`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub physical_sizes: BTreeMap<String, PhysicalSize>,

    /// TIFF PhotometricInterpretation, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photometric_interpretation: Option<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelInfo>,
}

// =============================================================================
// PixelSource
// =============================================================================

/// One resolution level of a multi-dimensional image.
///
/// Sources are constructed when a pyramid is opened and are immutable
/// afterwards; internal caches are the only state they mutate.
#[async_trait]
pub trait PixelSource: Send + Sync {
    /// Extent per label at this level.
    fn shape(&self) -> &[u32];

    fn labels(&self) -> &Labels;

    fn dtype(&self) -> DType;

    /// Edge length of the square tiles served by [`get_tile`](Self::get_tile).
    fn tile_size(&self) -> u32;

    fn meta(&self) -> Option<&PixelSourceMeta>;

    /// Read one full plane.
    async fn get_raster(
        &self,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError>;

    /// Read tile `(x, y)` of a plane, in tile-grid coordinates.
    ///
    /// Empty or out-of-range windows fail with [`SourceError::TileBounds`].
    async fn get_tile(
        &self,
        x: u32,
        y: u32,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError>;

    /// Width in pixels (extent of `x`).
    fn width(&self) -> u32 {
        self.labels()
            .position("x")
            .and_then(|i| self.shape().get(i).copied())
            .unwrap_or(0)
    }

    /// Height in pixels (extent of `y`).
    fn height(&self) -> u32 {
        self.labels()
            .position("y")
            .and_then(|i| self.shape().get(i).copied())
            .unwrap_or(0)
    }
}

// =============================================================================
// TileOutcome
// =============================================================================

/// What a renderer should do with the result of a tile request.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    /// Pixels to draw
    Data(PixelData),
    /// No data for this tile; draw nothing
    Skipped(TileBoundsError),
    /// The request was superseded
    Cancelled,
}

impl TileOutcome {
    /// Sort a tile result into an outcome, passing hard failures through.
    pub fn from_result(result: Result<PixelData, SourceError>) -> Result<Self, SourceError> {
        match result {
            Ok(data) => Ok(TileOutcome::Data(data)),
            Err(SourceError::TileBounds(e)) => {
                trace!(x = e.x, y = e.y, reason = ?e.reason, "tile skipped");
                Ok(TileOutcome::Skipped(e))
            }
            Err(SourceError::Cancelled) => {
                trace!("tile request cancelled");
                Ok(TileOutcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    pub fn into_data(self) -> Option<PixelData> {
        match self {
            TileOutcome::Data(data) => Some(data),
            _ => None,
        }
    }
}
