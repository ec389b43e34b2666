//! One TIFF image (a single IFD) as a grid of compressed blocks.
//!
//! Tiles and strips are both treated as blocks: a strip is a block as wide
//! as the image. Reading a window fetches only the blocks it intersects.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::dims::TileWindow;
use crate::error::{DecodeError, SourceError, TiffError};
use crate::format::{decode_block, Decoder, DecoderRegistry};
use crate::io::{cancellable, RangeReader};
use crate::pixel::{copy_rows, DType, Endian, TypedBuffer};

use super::parser::{Ifd, TiffHeader};
use super::predictor::{unpredict, Predictor};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Tile edge reported for stripped images.
pub const STRIP_TILE_SIZE: u32 = 512;

/// How the pixel data of an image is split into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLayout {
    Tiled { tile_width: u32, tile_height: u32 },
    Strips { rows_per_strip: u32 },
}

/// Decoding parameters and block table of one IFD.
pub struct TiffImage {
    reader: Arc<dyn RangeReader>,
    pub width: u32,
    pub height: u32,
    pub dtype: DType,
    pub samples_per_pixel: u16,
    /// PlanarConfiguration = 2: each sample stored in its own blocks
    pub planar: bool,
    pub layout: BlockLayout,
    pub compression: u16,
    pub photometric: Option<u16>,
    /// Offsets of reduced-resolution children
    pub sub_ifds: Vec<u64>,
    block_offsets: Vec<u64>,
    block_byte_counts: Vec<u64>,
    decoder: Arc<dyn Decoder>,
    predictor: Predictor,
    endian: Endian,
}

impl TiffImage {
    /// Read the tags of `ifd` and check that its pixels can be decoded.
    pub async fn from_ifd(
        reader: Arc<dyn RangeReader>,
        header: &TiffHeader,
        ifd: &Ifd,
        decoders: &DecoderRegistry,
        cancel: &CancellationToken,
    ) -> Result<Self, SourceError> {
        let values = ValueReader::new(reader.as_ref(), header);
        let byte_order = header.byte_order;

        let scalar = |tag: TiffTag| ifd.inline_value(tag, byte_order);
        let required = |tag: TiffTag| {
            scalar(tag).ok_or(TiffError::MissingTag(tag.name()))
        };

        let width = to_u32(required(TiffTag::ImageWidth)?, TiffTag::ImageWidth)?;
        let height = to_u32(required(TiffTag::ImageLength)?, TiffTag::ImageLength)?;

        let bits = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => cancellable(cancel, values.read_u16_array(entry)).await?,
            None => vec![1],
        };
        let bits_per_sample = bits.first().copied().unwrap_or(1);
        if bits.iter().any(|&b| b != bits_per_sample) {
            return Err(SourceError::UnsupportedDtype(format!(
                "mixed BitsPerSample {:?}",
                bits
            )));
        }
        let sample_format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => cancellable(cancel, values.read_u16_array(entry))
                .await?
                .first()
                .copied()
                .unwrap_or(1),
            None => 1,
        };
        let dtype = DType::from_tiff(sample_format, bits_per_sample)?;

        let samples_per_pixel = scalar(TiffTag::SamplesPerPixel).unwrap_or(1).max(1) as u16;
        let planar = samples_per_pixel > 1 && scalar(TiffTag::PlanarConfiguration) == Some(2);

        let compression = scalar(TiffTag::Compression).unwrap_or(1) as u16;
        let decoder = decoders.tiff(compression)?;
        let predictor = Predictor::from_tag(scalar(TiffTag::Predictor).unwrap_or(1) as u16, dtype)?;

        let (layout, offsets_tag, counts_tag) = if ifd.get_entry_by_tag(TiffTag::TileWidth).is_some() {
            let tile_width = to_u32(required(TiffTag::TileWidth)?, TiffTag::TileWidth)?;
            let tile_height = to_u32(required(TiffTag::TileLength)?, TiffTag::TileLength)?;
            if tile_width == 0 || tile_height == 0 {
                return Err(SourceError::MalformedMetadata(format!(
                    "zero tile size {}x{}",
                    tile_width, tile_height
                )));
            }
            (
                BlockLayout::Tiled {
                    tile_width,
                    tile_height,
                },
                TiffTag::TileOffsets,
                TiffTag::TileByteCounts,
            )
        } else {
            let rows = scalar(TiffTag::RowsPerStrip)
                .map(|r| r.min(height as u64) as u32)
                .filter(|&r| r > 0)
                .unwrap_or(height.max(1));
            (
                BlockLayout::Strips {
                    rows_per_strip: rows,
                },
                TiffTag::StripOffsets,
                TiffTag::StripByteCounts,
            )
        };

        let offsets_entry = ifd
            .get_entry_by_tag(offsets_tag)
            .ok_or(TiffError::MissingTag(offsets_tag.name()))?;
        let counts_entry = ifd
            .get_entry_by_tag(counts_tag)
            .ok_or(TiffError::MissingTag(counts_tag.name()))?;
        let block_offsets = cancellable(cancel, values.read_u64_array(offsets_entry)).await?;
        let block_byte_counts = cancellable(cancel, values.read_u64_array(counts_entry)).await?;

        let sub_ifds = match ifd.get_entry_by_tag(TiffTag::SubIfds) {
            Some(entry) => cancellable(cancel, values.read_u64_array(entry)).await?,
            None => Vec::new(),
        };

        let image = TiffImage {
            reader,
            width,
            height,
            dtype,
            samples_per_pixel,
            planar,
            layout,
            compression,
            photometric: scalar(TiffTag::PhotometricInterpretation).map(|p| p as u16),
            sub_ifds,
            block_offsets,
            block_byte_counts,
            decoder,
            predictor,
            endian: byte_order.endian(),
        };

        let expected = image.block_count();
        if image.block_offsets.len() < expected || image.block_byte_counts.len() < expected {
            return Err(SourceError::MalformedMetadata(format!(
                "{} offsets and {} byte counts for {} blocks",
                image.block_offsets.len(),
                image.block_byte_counts.len(),
                expected
            )));
        }
        Ok(image)
    }

    /// Width and height of one block.
    pub fn block_size(&self) -> (u32, u32) {
        match self.layout {
            BlockLayout::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            BlockLayout::Strips { rows_per_strip } => (self.width, rows_per_strip),
        }
    }

    /// Blocks across and down one sample plane.
    pub fn block_grid(&self) -> (u32, u32) {
        let (bw, bh) = self.block_size();
        (self.width.div_ceil(bw.max(1)), self.height.div_ceil(bh.max(1)))
    }

    fn block_count(&self) -> usize {
        let (across, down) = self.block_grid();
        let planes = if self.planar {
            self.samples_per_pixel as usize
        } else {
            1
        };
        across as usize * down as usize * planes
    }

    /// Tile edge to advertise: largest power of two not above the tile
    /// width, or [`STRIP_TILE_SIZE`] for stripped images.
    pub fn tile_size(&self) -> u32 {
        match self.layout {
            BlockLayout::Tiled { tile_width, .. } => crate::dims::prev_power_of_two(tile_width),
            BlockLayout::Strips { .. } => STRIP_TILE_SIZE,
        }
    }

    pub fn is_tiled(&self) -> bool {
        matches!(self.layout, BlockLayout::Tiled { .. })
    }

    /// Read a pixel window into a chunky buffer of
    /// `width * height * samples_per_pixel` samples.
    pub async fn read_window(
        &self,
        window: TileWindow,
        cancel: &CancellationToken,
    ) -> Result<TypedBuffer, SourceError> {
        let spp = self.samples_per_pixel as usize;
        let sample_size = self.dtype.size_in_bytes();
        let pixel_bytes = spp * sample_size;
        let mut out = vec![0u8; window.pixel_count() * pixel_bytes];

        let (bw, bh) = self.block_size();
        let (across, down) = self.block_grid();
        let col_range = window.x0 / bw..window.x1().div_ceil(bw).min(across);
        let row_range = window.y0 / bh..window.y1().div_ceil(bh).min(down);
        let planes = if self.planar { spp } else { 1 };

        for plane in 0..planes {
            for row in row_range.clone() {
                for col in col_range.clone() {
                    let index = plane * across as usize * down as usize
                        + row as usize * across as usize
                        + col as usize;
                    let block = self.read_block(index, row, cancel).await?;

                    let bx0 = col * bw;
                    let by0 = row * bh;
                    let ix0 = window.x0.max(bx0);
                    let iy0 = window.y0.max(by0);
                    let ix1 = window.x1().min(bx0 + bw).min(self.width);
                    let iy1 = window.y1().min(by0 + bh).min(self.height);
                    if ix0 >= ix1 || iy0 >= iy1 {
                        continue;
                    }

                    let dst_row = |y: u32, x: u32| {
                        ((y - window.y0) as usize * window.width as usize + (x - window.x0) as usize)
                            * pixel_bytes
                    };

                    if self.planar {
                        for y in iy0..iy1 {
                            for x in ix0..ix1 {
                                let src = ((y - by0) as usize * bw as usize + (x - bx0) as usize)
                                    * sample_size;
                                let dst = dst_row(y, x) + plane * sample_size;
                                out[dst..dst + sample_size]
                                    .copy_from_slice(&block[src..src + sample_size]);
                            }
                        }
                    } else {
                        let src_stride = bw as usize * pixel_bytes;
                        copy_rows(
                            &block,
                            src_stride,
                            (iy0 - by0) as usize * src_stride + (ix0 - bx0) as usize * pixel_bytes,
                            &mut out,
                            window.width as usize * pixel_bytes,
                            dst_row(iy0, ix0),
                            (ix1 - ix0) as usize * pixel_bytes,
                            (iy1 - iy0) as usize,
                        );
                    }
                }
            }
        }

        Ok(TypedBuffer::from_native_bytes(self.dtype, &out)?)
    }

    /// Fetch, decompress and unpredict one block into native-endian bytes.
    ///
    /// The result always covers the full block geometry; the last strip of
    /// an image may decode to fewer rows, which are zero-padded.
    async fn read_block(
        &self,
        index: usize,
        block_row: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SourceError> {
        let (bw, bh) = self.block_size();
        let components = if self.planar {
            1
        } else {
            self.samples_per_pixel as usize
        };
        let sample_size = self.dtype.size_in_bytes();
        let row_bytes = bw as usize * components * sample_size;
        let full_len = row_bytes * bh as usize;

        let offset = self.block_offsets[index];
        let byte_count = self.block_byte_counts[index];
        if byte_count == 0 {
            trace!(index, "empty block, reading as zeros");
            return Ok(vec![0u8; full_len]);
        }

        let len = usize::try_from(byte_count).map_err(|_| {
            SourceError::MalformedMetadata(format!("block byte count {} too large", byte_count))
        })?;
        let raw = cancellable(cancel, self.reader.read_exact_at(offset, len)).await?;
        let mut decoded = decode_block(&self.decoder, raw, full_len).await?;

        // Rows of this block that lie inside the image
        let rows_present = match self.layout {
            BlockLayout::Strips { .. } => bh.min(self.height - block_row * bh),
            BlockLayout::Tiled { .. } => bh,
        };
        let required = row_bytes * rows_present as usize;
        if decoded.len() < required {
            return Err(DecodeError::ShortBlock {
                expected: required,
                actual: decoded.len(),
            }
            .into());
        }
        decoded.truncate(required);

        unpredict(
            &mut decoded,
            self.predictor,
            self.dtype,
            self.endian,
            bw as usize * components,
            components,
        );
        decoded.resize(full_len, 0);
        Ok(decoded)
    }
}

impl std::fmt::Debug for TiffImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dtype", &self.dtype)
            .field("samples_per_pixel", &self.samples_per_pixel)
            .field("planar", &self.planar)
            .field("layout", &self.layout)
            .field("compression", &self.compression)
            .field("sub_ifds", &self.sub_ifds.len())
            .finish()
    }
}

fn to_u32(value: u64, tag: TiffTag) -> Result<u32, TiffError> {
    u32::try_from(value).map_err(|_| TiffError::InvalidTagValue {
        tag: tag.name(),
        message: format!("{} does not fit in 32 bits", value),
    })
}
