//! Pixel sources backed by Zarr v2 chunk stores.
//!
//! Each resolution level is one array of a `multiscales` group. Chunks are
//! addressed by key, decoded through the pyramid's decoder registry, and
//! missing chunks read as the array's fill value.

mod loader;
mod metadata;
mod source;
mod store;

pub use loader::{check_manifest, derive_labels, open_zarr, BIOFORMATS2RAW_METADATA_KEY};
pub use metadata::{ArrayMetadata, Axis, CompressorConfig, Dataset, GroupAttributes, Multiscale, Omero, OmeroChannel};
pub use source::ZarrPixelSource;
pub use store::{get_json, ChunkStore, LocalStore, MemoryStore, S3Store};
