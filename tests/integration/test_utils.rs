//! Test utilities for integration tests.
//!
//! This module provides a request-counting range reader and builders for
//! small in-memory TIFF, OME-TIFF and Zarr fixtures.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use multiscale_pixels::error::IoError;
use multiscale_pixels::io::RangeReader;
use multiscale_pixels::zarr::MemoryStore;
use multiscale_pixels::TypedBuffer;

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// A mock range reader that tracks all read requests.
///
/// This is useful for verifying cache behavior and request patterns.
pub struct TrackingMockReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<RwLock<Vec<(u64, usize)>>>,
}

impl TrackingMockReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub async fn get_requests(&self) -> Vec<(u64, usize)> {
        self.requests.read().await.clone()
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
    }
}

impl Clone for TrackingMockReader {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            identifier: self.identifier.clone(),
            request_count: Arc::clone(&self.request_count),
            requests: Arc::clone(&self.requests),
        }
    }
}

#[async_trait]
impl RangeReader for TrackingMockReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push((offset, len));

        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Test TIFF Creation
// =============================================================================

/// One IFD of a synthetic little-endian classic TIFF.
///
/// Sample `s` of pixel `(x, y)` holds `base + (y * width + x) * samples + s`,
/// truncated to the sample width, so every plane and level is recognisable.
#[derive(Debug, Clone)]
pub struct TestImage {
    pub width: u32,
    pub height: u32,
    /// Square tile edge; `None` stores the image as a single strip
    pub tile: Option<u32>,
    pub samples: u16,
    pub bits: u16,
    pub base: u32,
    pub compression: u16,
    pub description: Option<String>,
    pub sub_images: Vec<TestImage>,
}

impl TestImage {
    /// A 16-bit single-sample image tiled in 16x16 blocks.
    pub fn new(width: u32, height: u32, base: u32) -> Self {
        Self {
            width,
            height,
            tile: Some(16),
            samples: 1,
            bits: 16,
            base,
            compression: 1,
            description: None,
            sub_images: Vec::new(),
        }
    }

    pub fn with_tile(mut self, tile: Option<u32>) -> Self {
        self.tile = tile;
        self
    }

    pub fn with_samples(mut self, samples: u16) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_bits(mut self, bits: u16) -> Self {
        self.bits = bits;
        self
    }

    pub fn with_compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_sub_images(mut self, sub_images: Vec<TestImage>) -> Self {
        self.sub_images = sub_images;
        self
    }

    /// Stored value of one sample.
    pub fn value(&self, x: u32, y: u32, s: u16) -> u32 {
        let v = self.base + (y * self.width + x) * self.samples as u32 + s as u32;
        if self.bits == 8 {
            v & 0xff
        } else {
            v & 0xffff
        }
    }

    /// Chunky samples of a window, row by row.
    pub fn expected(&self, x0: u32, y0: u32, width: u32, height: u32) -> Vec<u32> {
        let mut out = Vec::new();
        for y in y0..y0 + height {
            for x in x0..x0 + width {
                for s in 0..self.samples {
                    out.push(self.value(x, y, s));
                }
            }
        }
        out
    }

    fn push_sample(&self, out: &mut Vec<u8>, value: u32) {
        if self.bits == 8 {
            out.push(value as u8);
        } else {
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
    }

    /// Uncompressed blocks in storage order.
    fn blocks(&self) -> Vec<Vec<u8>> {
        let Some(t) = self.tile else {
            let mut strip = Vec::new();
            for v in self.expected(0, 0, self.width, self.height) {
                self.push_sample(&mut strip, v);
            }
            return vec![strip];
        };

        let mut blocks = Vec::new();
        for row in 0..self.height.div_ceil(t) {
            for col in 0..self.width.div_ceil(t) {
                let mut block = Vec::new();
                for y in row * t..(row + 1) * t {
                    for x in col * t..(col + 1) * t {
                        for s in 0..self.samples {
                            let inside = x < self.width && y < self.height;
                            let v = if inside { self.value(x, y, s) } else { 0 };
                            self.push_sample(&mut block, v);
                        }
                    }
                }
                blocks.push(block);
            }
        }
        blocks
    }
}

type Entry = (u16, u16, u32, [u8; 4]);

fn pad(out: &mut Vec<u8>) {
    if out.len() % 2 == 1 {
        out.push(0);
    }
}

fn entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, data: Vec<u8>) -> Entry {
    let mut field = [0u8; 4];
    if data.len() <= 4 {
        field[..data.len()].copy_from_slice(&data);
    } else {
        pad(out);
        field = (out.len() as u32).to_le_bytes();
        out.extend_from_slice(&data);
    }
    (tag, kind, count, field)
}

fn shorts(out: &mut Vec<u8>, tag: u16, values: &[u16]) -> Entry {
    let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    entry(out, tag, 3, values.len() as u32, data)
}

fn longs(out: &mut Vec<u8>, tag: u16, values: &[u32]) -> Entry {
    let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    entry(out, tag, 4, values.len() as u32, data)
}

fn compress(block: &[u8], compression: u16) -> Vec<u8> {
    match compression {
        8 | 32946 => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(block).unwrap();
            encoder.finish().unwrap()
        }
        _ => block.to_vec(),
    }
}

/// Write the blocks and IFD of `image` (children first); returns the IFD
/// offset and the position of its next-IFD pointer.
fn write_image(out: &mut Vec<u8>, image: &TestImage) -> (usize, usize) {
    let children: Vec<u32> = image
        .sub_images
        .iter()
        .map(|child| write_image(out, child).0 as u32)
        .collect();

    let mut offsets = Vec::new();
    let mut counts = Vec::new();
    for block in image.blocks() {
        let data = compress(&block, image.compression);
        pad(out);
        offsets.push(out.len() as u32);
        counts.push(data.len() as u32);
        out.extend_from_slice(&data);
    }

    let spp = image.samples;
    let mut entries = vec![
        longs(out, 256, &[image.width]),
        longs(out, 257, &[image.height]),
        shorts(out, 258, &vec![image.bits; spp as usize]),
        shorts(out, 259, &[image.compression]),
        shorts(out, 262, &[if spp >= 3 { 2 } else { 1 }]),
        shorts(out, 277, &[spp]),
        shorts(out, 284, &[1]),
    ];
    if let Some(ref description) = image.description {
        let mut data = description.as_bytes().to_vec();
        data.push(0);
        let count = data.len() as u32;
        entries.push(entry(out, 270, 2, count, data));
    }
    match image.tile {
        Some(t) => {
            entries.push(longs(out, 322, &[t]));
            entries.push(longs(out, 323, &[t]));
            entries.push(longs(out, 324, &offsets));
            entries.push(longs(out, 325, &counts));
        }
        None => {
            entries.push(longs(out, 273, &offsets));
            entries.push(longs(out, 278, &[image.height]));
            entries.push(longs(out, 279, &counts));
        }
    }
    if !children.is_empty() {
        entries.push(longs(out, 330, &children));
    }
    entries.sort_by_key(|e| e.0);

    pad(out);
    let ifd = out.len();
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, kind, count, field) in &entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(field);
    }
    let next = out.len();
    out.extend_from_slice(&0u32.to_le_bytes());
    (ifd, next)
}

/// Build a TIFF whose top-level IFD chain holds `images` in order.
pub fn build_tiff(images: &[TestImage]) -> Vec<u8> {
    let mut out = b"II\x2a\x00\x00\x00\x00\x00".to_vec();
    let mut slot = 4;
    for image in images {
        let (ifd, next) = write_image(&mut out, image);
        out[slot..slot + 4].copy_from_slice(&(ifd as u32).to_le_bytes());
        slot = next;
    }
    out
}

/// Offsets of the top-level IFDs of `data`, walked from the header.
pub fn ifd_offsets(data: &[u8]) -> Vec<u64> {
    let read_u32 = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    let mut offsets = Vec::new();
    let mut offset = read_u32(4) as usize;
    while offset != 0 {
        offsets.push(offset as u64);
        let count = u16::from_le_bytes([data[offset], data[offset + 1]]) as usize;
        offset = read_u32(offset + 2 + count * 12) as usize;
    }
    offsets
}

// =============================================================================
// OME-XML
// =============================================================================

/// A single-image OME-XML document; `body` goes inside `<Pixels>`.
pub fn ome_xml(order: &str, pixel_type: &str, size: [u32; 5], body: &str) -> String {
    let [x, y, z, c, t] = size;
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0" Name="fixture">
    <Pixels ID="Pixels:0" DimensionOrder="{order}" Type="{pixel_type}"
        SizeX="{x}" SizeY="{y}" SizeZ="{z}" SizeC="{c}" SizeT="{t}"
        PhysicalSizeX="0.25" PhysicalSizeXUnit="µm" PhysicalSizeY="0.25" PhysicalSizeYUnit="µm">
      {body}
    </Pixels>
  </Image>
</OME>"#
    )
}

// =============================================================================
// Zarr
// =============================================================================

/// Add a C-order `<u2` array at `path`, every element set by `value`.
pub fn add_zarr_array(
    store: &mut MemoryStore,
    path: &str,
    shape: &[u64],
    chunks: &[u64],
    value: impl Fn(&[u64]) -> u16,
) {
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{}/", path)
    };
    let metadata = serde_json::json!({
        "zarr_format": 2,
        "shape": shape,
        "chunks": chunks,
        "dtype": "<u2",
        "compressor": null,
        "fill_value": 0,
        "order": "C",
        "filters": null,
    });
    store.insert(format!("{}.zarray", prefix), metadata.to_string());

    let grid: Vec<u64> = shape.iter().zip(chunks).map(|(s, c)| s.div_ceil(*c)).collect();
    let chunk_len: u64 = chunks.iter().product();
    let chunk_count: u64 = grid.iter().product();
    for n in 0..chunk_count {
        let chunk_index = unravel(n, &grid);
        let mut bytes = Vec::with_capacity(chunk_len as usize * 2);
        for k in 0..chunk_len {
            let within = unravel(k, chunks);
            let index: Vec<u64> = chunk_index
                .iter()
                .zip(chunks)
                .zip(&within)
                .map(|((ci, c), w)| ci * c + w)
                .collect();
            let inside = index.iter().zip(shape).all(|(i, s)| i < s);
            let v = if inside { value(&index) } else { 0 };
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let key: Vec<String> = chunk_index.iter().map(|i| i.to_string()).collect();
        store.insert(format!("{}{}", prefix, key.join(".")), bytes);
    }
}

/// C-order multi-index of a flat position.
fn unravel(mut n: u64, extents: &[u64]) -> Vec<u64> {
    let mut index = vec![0; extents.len()];
    for (i, extent) in extents.iter().enumerate().rev() {
        index[i] = n % extent;
        n /= extent;
    }
    index
}

/// Widen any buffer to `u32` for comparisons.
pub fn as_u32(buffer: &TypedBuffer) -> Vec<u32> {
    buffer.to_f64_vec().into_iter().map(|v| v as u32).collect()
}
