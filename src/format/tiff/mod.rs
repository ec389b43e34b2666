//! TIFF and BigTIFF reading.
//!
//! # Key Concepts
//!
//! - **Byte order**: files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header; every multi-byte value respects it.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit versus 64-bit offsets. Both are
//!   handled transparently.
//!
//! - **IFD (Image File Directory)**: one image plane. OME-TIFF stores one
//!   IFD per (t, c, z) plane and hangs reduced resolutions off each as
//!   SubIFDs; older writers append them as further top-level IFDs.
//!
//! - **Blocks**: pixel data is split into tiles or strips, each compressed
//!   independently. Only the blocks a request intersects are fetched.

mod directory;
mod image;
mod parser;
mod predictor;
mod tags;
mod values;

pub use directory::TiffFile;
pub use image::{BlockLayout, TiffImage, STRIP_TILE_SIZE};
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use predictor::{unpredict, Predictor};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
