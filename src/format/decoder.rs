//! Block decoders.
//!
//! A [`DecoderRegistry`] maps TIFF compression codes and Zarr compressor ids
//! to decoders. Each opened pyramid owns its registry; callers can register
//! extra codecs before opening.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{DecodeError, SourceError};
use crate::format::tiff::Compression;

/// Decompresses one block (tile, strip or chunk).
pub trait Decoder: Send + Sync {
    /// Decode `data`. `expected_len` is the uncompressed size implied by the
    /// block geometry and may be used as a capacity hint.
    fn decode(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, DecodeError>;
}

/// Uncompressed blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Decoder for NoCompression {
    fn decode(&self, data: &[u8], _expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(data.to_vec())
    }
}

/// Zlib-wrapped deflate (TIFF 8 / 32946, Zarr `zlib`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibDecoder;

impl Decoder for ZlibDecoder {
    fn decode(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(expected_len);
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| DecodeError::Deflate(e.to_string()))?;
        Ok(out)
    }
}

/// Gzip (Zarr `gzip`).
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipDecoder;

impl Decoder for GzipDecoder {
    fn decode(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(expected_len);
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| DecodeError::Deflate(e.to_string()))?;
        Ok(out)
    }
}

/// TIFF-flavoured LZW (MSB-first codes with early size switch).
#[derive(Debug, Clone, Copy, Default)]
pub struct LzwDecoder;

impl Decoder for LzwDecoder {
    fn decode(&self, data: &[u8], _expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .decode(data)
            .map_err(|e| DecodeError::Lzw(e.to_string()))
    }
}

/// Decoders keyed by TIFF compression code and by Zarr compressor id.
#[derive(Clone)]
pub struct DecoderRegistry {
    tiff: HashMap<u16, Arc<dyn Decoder>>,
    zarr: HashMap<String, Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    /// A registry with no decoders at all.
    pub fn empty() -> Self {
        Self {
            tiff: HashMap::new(),
            zarr: HashMap::new(),
        }
    }

    /// A registry with the built-in codecs: none, deflate/zlib, gzip, LZW.
    pub fn with_builtins() -> Self {
        let zlib: Arc<dyn Decoder> = Arc::new(ZlibDecoder);
        Self::empty()
            .with_tiff(Compression::None as u16, Arc::new(NoCompression))
            .with_tiff(Compression::Lzw as u16, Arc::new(LzwDecoder))
            .with_tiff(Compression::Deflate as u16, Arc::clone(&zlib))
            .with_tiff(Compression::AdobeDeflate as u16, Arc::clone(&zlib))
            .with_zarr("zlib", zlib)
            .with_zarr("gzip", Arc::new(GzipDecoder))
    }

    /// Register (or replace) the decoder for a TIFF compression code.
    pub fn register_tiff(&mut self, code: u16, decoder: Arc<dyn Decoder>) {
        self.tiff.insert(code, decoder);
    }

    /// Register (or replace) the decoder for a Zarr compressor id.
    pub fn register_zarr(&mut self, id: impl Into<String>, decoder: Arc<dyn Decoder>) {
        self.zarr.insert(id.into(), decoder);
    }

    pub fn with_tiff(mut self, code: u16, decoder: Arc<dyn Decoder>) -> Self {
        self.register_tiff(code, decoder);
        self
    }

    pub fn with_zarr(mut self, id: impl Into<String>, decoder: Arc<dyn Decoder>) -> Self {
        self.register_zarr(id, decoder);
        self
    }

    /// Look up a TIFF decoder.
    pub fn tiff(&self, code: u16) -> Result<Arc<dyn Decoder>, SourceError> {
        self.tiff
            .get(&code)
            .cloned()
            .ok_or_else(|| SourceError::UnsupportedCompression(Compression::describe(code)))
    }

    /// Look up a Zarr decoder; `None` means an uncompressed array.
    pub fn zarr(&self, id: Option<&str>) -> Result<Arc<dyn Decoder>, SourceError> {
        match id {
            None => Ok(Arc::new(NoCompression)),
            Some(id) => self.zarr.get(id).cloned().ok_or_else(|| {
                SourceError::UnsupportedCompression(format!("Zarr compressor {:?}", id))
            }),
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tiff: Vec<_> = self.tiff.keys().collect();
        tiff.sort();
        let mut zarr: Vec<_> = self.zarr.keys().collect();
        zarr.sort();
        f.debug_struct("DecoderRegistry")
            .field("tiff", &tiff)
            .field("zarr", &zarr)
            .finish()
    }
}

/// Blocks at least this large (compressed or decoded) decode on the
/// blocking pool instead of the async executor.
pub const BLOCKING_DECODE_THRESHOLD: usize = 64 * 1024;

/// Decode one block, moving large ones off the runtime.
pub async fn decode_block(
    decoder: &Arc<dyn Decoder>,
    data: Bytes,
    expected_len: usize,
) -> Result<Vec<u8>, SourceError> {
    if data.len().max(expected_len) < BLOCKING_DECODE_THRESHOLD {
        return Ok(decoder.decode(&data, expected_len)?);
    }
    let decoder = Arc::clone(decoder);
    let decoded = tokio::task::spawn_blocking(move || decoder.decode(&data, expected_len))
        .await
        .map_err(|e| SourceError::Task(e.to_string()))??;
    Ok(decoded)
}
