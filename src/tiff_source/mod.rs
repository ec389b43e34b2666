//! Pixel sources backed by tiled TIFF files.

mod indexer;
mod loader;
mod source;

pub use indexer::{legacy_ifd_index, legacy_level_count, FileOpener, Layout, TiffIndexer};
pub use loader::{open_companion, open_multi_tiff, open_ome_tiff};
pub use source::TiffPixelSource;
