//! On-disk format readers and the block decoder registry.

mod decoder;
pub mod tiff;

pub use decoder::{
    decode_block, Decoder, DecoderRegistry, GzipDecoder, LzwDecoder, NoCompression, ZlibDecoder,
    BLOCKING_DECODE_THRESHOLD,
};
