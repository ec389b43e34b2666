//! # multiscale-pixels
//!
//! Randomly addressable pixel sources over multi-resolution microscopy
//! images, for viewers that render tiles and planes on demand.
//!
//! Every supported layout is opened into a [`Pyramid`]: an ordered list of
//! [`PixelSource`]s, level 0 at full resolution and each further level half
//! the size in `x` and `y`. Callers address a plane with a [`Selection`]
//! such as `{t: 0, c: 2, z: 5}` and get back a flat [`TypedBuffer`]. Only the
//! bytes backing the requested tile or plane are fetched.
//!
//! ## Layouts
//!
//! - OME-TIFF with SubIFD sub-resolutions ([`open_ome_tiff`])
//! - legacy OME-TIFF with one run of top-level IFDs per resolution
//! - companion OME-XML referencing planes across several TIFFs ([`open_companion`])
//! - ad-hoc stacks of single-channel TIFFs ([`open_multi_tiff`])
//! - Zarr v2 multiscale stores, including bioformats2raw output ([`open_zarr`])
//!
//! ## Architecture
//!
//! - [`io`] - range readers (local, S3, memory), block caching, cancellation
//! - [`dims`] - labels, selections and level geometry
//! - [`mod@format`] - TIFF parsing and the block decoder registry
//! - [`manifest`] - OME-XML parsing into [`ImageManifest`]
//! - [`tiff_source`] - the four TIFF layouts behind one indexer
//! - [`zarr`] - chunk stores and the Zarr pixel source
//! - [`stats`] - per-channel statistics and auto-contrast windows
//! - [`config`] - CLI types for the bundled binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use multiscale_pixels::{open_ome_tiff, LocalRangeReader, OpenOptions, Selection};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let cancel = CancellationToken::new();
//! let reader = LocalRangeReader::open("image.ome.tif").await?;
//! let pyramid = open_ome_tiff(reader, &OpenOptions::default(), &cancel).await?;
//!
//! let tile = pyramid
//!     .base()
//!     .get_tile(0, 0, &Selection::tcz(0, 1, 0), &cancel)
//!     .await?;
//! println!("{}x{} {:?}", tile.width, tile.height, tile.data.dtype());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dims;
pub mod error;
pub mod format;
pub mod io;
pub mod manifest;
pub mod options;
pub mod pixel;
pub mod stats;
pub mod tiff_source;
pub mod zarr;

// Re-export commonly used types
pub use dims::{
    prev_power_of_two, shape_at_level, tile_grid, tile_window, DimensionOrder, Labels, PlaneCoord,
    PlaneSizes, Selection, TileWindow, INTERLEAVE_LABEL,
};
pub use error::{
    DecodeError, IoError, ManifestError, SourceError, StatsError, StoreError, TiffError,
    TileBoundsError, TileBoundsReason,
};
pub use format::{Decoder, DecoderRegistry};
pub use io::{
    create_s3_client, BlockCache, FileSource, LocalFileSource, LocalRangeReader,
    MemoryFileSource, MemoryRangeReader, RangeReader, S3FileSource, S3RangeReader,
};
pub use manifest::{parse_ome_xml, ChannelInfo, ImageManifest, OmeDocument, Roi};
pub use options::OpenOptions;
pub use pixel::{
    DType, PhysicalSize, PixelData, PixelSource, PixelSourceMeta, Pyramid, TileOutcome,
    TypedBuffer,
};
pub use stats::{buffer_stats, channel_stats, ChannelStats};
pub use tiff_source::{open_companion, open_multi_tiff, open_ome_tiff};
pub use zarr::{open_zarr, ChunkStore, LocalStore, MemoryStore, S3Store};
