//! Pixel source over one Zarr array (one resolution level).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::dims::{prev_power_of_two, tile_window, Labels, Selection, TileWindow};
use crate::error::{DecodeError, SourceError, StoreError};
use crate::format::{decode_block, Decoder, DecoderRegistry};
use crate::io::{cancellable, join_key};
use crate::pixel::{copy_rows, to_native_endian, DType, Endian, PixelData, PixelSource, PixelSourceMeta, TypedBuffer};

use super::metadata::ArrayMetadata;
use super::store::ChunkStore;

/// A C-ordered Zarr v2 array exposed as a [`PixelSource`].
///
/// The labels must end in `y, x`, optionally followed by an interleave
/// axis whose samples sit in a single chunk.
pub struct ZarrPixelSource {
    store: Arc<dyn ChunkStore>,
    path: String,
    labels: Labels,
    shape: Vec<u32>,
    chunks: Vec<u32>,
    dtype: DType,
    endian: Endian,
    fill_value: f64,
    separator: String,
    decoder: Arc<dyn Decoder>,
    tile_size: u32,
    meta: Option<PixelSourceMeta>,
}

impl ZarrPixelSource {
    /// Validate array metadata against `labels` and pick the decoder.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        path: impl Into<String>,
        metadata: &ArrayMetadata,
        labels: Labels,
        decoders: &DecoderRegistry,
        meta: Option<PixelSourceMeta>,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        let (dtype, endian) = DType::from_zarr(&metadata.dtype)?;
        if metadata.order != "C" {
            return Err(SourceError::UnsupportedDtype(format!(
                "{}: {} memory order",
                path, metadata.order
            )));
        }
        if metadata.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(SourceError::UnsupportedCompression(format!(
                "{}: Zarr filters",
                path
            )));
        }
        let decoder = decoders.zarr(metadata.compressor.as_ref().map(|c| c.id.as_str()))?;

        let to_u32 = |values: &[u64], what: &str| -> Result<Vec<u32>, SourceError> {
            values
                .iter()
                .map(|&v| {
                    u32::try_from(v).map_err(|_| {
                        SourceError::MalformedMetadata(format!("{} {} of {} too large", what, v, path))
                    })
                })
                .collect()
        };
        let shape = to_u32(&metadata.shape, "extent")?;
        let chunks = to_u32(&metadata.chunks, "chunk edge")?;

        if shape.len() != labels.len() || chunks.len() != shape.len() {
            return Err(SourceError::MalformedMetadata(format!(
                "{}: shape {:?} and chunks {:?} do not match labels {}",
                path, shape, chunks, labels
            )));
        }
        if chunks.contains(&0) {
            return Err(SourceError::MalformedMetadata(format!("{}: zero chunk edge", path)));
        }

        let n = labels.len();
        let spatial = if labels.is_interleaved() { n - 1 } else { n };
        if spatial < 2
            || labels.position("y") != Some(spatial - 2)
            || labels.position("x") != Some(spatial - 1)
        {
            return Err(SourceError::MalformedMetadata(format!(
                "{}: labels {} must end in y, x",
                path, labels
            )));
        }
        if labels.is_interleaved() && chunks[n - 1] != shape[n - 1] {
            return Err(SourceError::MalformedMetadata(format!(
                "{}: interleaved chunks must hold exactly the {} samples of a pixel",
                path,
                shape[n - 1]
            )));
        }

        let tile_size = prev_power_of_two(chunks[spatial - 2].min(chunks[spatial - 1]));

        Ok(Self {
            store,
            path,
            labels,
            shape,
            chunks,
            dtype,
            endian,
            fill_value: metadata.fill_value(),
            separator: metadata.separator().to_string(),
            decoder,
            tile_size,
            meta,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Axis index of `y`; `x` follows it.
    fn y_axis(&self) -> usize {
        let n = self.labels.len();
        if self.labels.is_interleaved() {
            n - 3
        } else {
            n - 2
        }
    }

    /// Samples per pixel: the interleave extent, or 1.
    fn samples(&self) -> usize {
        if self.labels.is_interleaved() {
            self.shape[self.shape.len() - 1] as usize
        } else {
            1
        }
    }

    fn chunk_key(&self, chunk_index: &[u32]) -> String {
        let name = chunk_index
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(&self.separator);
        join_key(&self.path, &name)
    }

    /// Read `window` of the plane addressed by `indices`.
    async fn read_region(
        &self,
        indices: &[u32],
        window: TileWindow,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError> {
        let y_axis = self.y_axis();
        let x_axis = y_axis + 1;
        let samples = self.samples();
        let sample_size = self.dtype.size_in_bytes();
        let pixel_bytes = samples * sample_size;

        let fill = TypedBuffer::filled(self.dtype, 1, self.fill_value);
        let mut out = fill.as_native_bytes().repeat(window.pixel_count() * samples);

        // C-order element strides inside one chunk
        let mut strides = vec![1usize; self.chunks.len()];
        for d in (0..self.chunks.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.chunks[d + 1] as usize;
        }
        let chunk_len = strides[0] * self.chunks[0] as usize * sample_size;

        // Offset of the selected plane inside its chunk
        let plane_offset: usize = (0..y_axis)
            .map(|d| (indices[d] % self.chunks[d]) as usize * strides[d])
            .sum();

        let (cy, cx) = (self.chunks[y_axis], self.chunks[x_axis]);
        let mut chunk_index: Vec<u32> = indices
            .iter()
            .zip(&self.chunks)
            .map(|(&i, &c)| i / c)
            .collect();
        if self.labels.is_interleaved() {
            chunk_index[x_axis + 1] = 0;
        }

        for row in window.y0 / cy..=(window.y1() - 1) / cy {
            for col in window.x0 / cx..=(window.x1() - 1) / cx {
                chunk_index[y_axis] = row;
                chunk_index[x_axis] = col;
                let key = self.chunk_key(&chunk_index);

                let raw = match cancellable(cancel, self.store.get_item(&key)).await {
                    Ok(raw) => raw,
                    Err(SourceError::Store(StoreError::NotFound(_))) => {
                        debug!(key, "chunk missing, using fill value");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let mut chunk = decode_block(&self.decoder, raw, chunk_len).await?;
                if chunk.len() < chunk_len {
                    return Err(DecodeError::ShortBlock {
                        expected: chunk_len,
                        actual: chunk.len(),
                    }
                    .into());
                }
                to_native_endian(&mut chunk[..chunk_len], sample_size, self.endian);

                let (bx0, by0) = (col * cx, row * cy);
                let ix0 = window.x0.max(bx0);
                let iy0 = window.y0.max(by0);
                let ix1 = window.x1().min(bx0 + cx);
                let iy1 = window.y1().min(by0 + cy);

                let src_stride = strides[y_axis] * sample_size;
                let src_offset = plane_offset * sample_size
                    + (iy0 - by0) as usize * src_stride
                    + (ix0 - bx0) as usize * strides[x_axis] * sample_size;
                let dst_stride = window.width as usize * pixel_bytes;
                copy_rows(
                    &chunk,
                    src_stride,
                    src_offset,
                    &mut out,
                    dst_stride,
                    (iy0 - window.y0) as usize * dst_stride + (ix0 - window.x0) as usize * pixel_bytes,
                    (ix1 - ix0) as usize * pixel_bytes,
                    (iy1 - iy0) as usize,
                );
            }
        }

        Ok(PixelData {
            data: TypedBuffer::from_native_bytes(self.dtype, &out)?,
            width: window.width,
            height: window.height,
        })
    }
}

#[async_trait]
impl PixelSource for ZarrPixelSource {
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
        let indices = self.labels.resolve_within(selection, &self.shape)?;
        let window = TileWindow {
            x0: 0,
            y0: 0,
            width: self.width(),
            height: self.height(),
        };
        if window.pixel_count() == 0 {
            return Ok(PixelData {
                data: TypedBuffer::filled(self.dtype, 0, 0.0),
                width: window.width,
                height: window.height,
            });
        }
        trace!(path = %self.path, ?indices, "raster request");
        self.read_region(&indices, window, cancel).await
    }

    async fn get_tile(
        &self,
        x: u32,
        y: u32,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Result<PixelData, SourceError> {
        let window = tile_window(x, y, self.tile_size, self.width(), self.height())?;
        let indices = self.labels.resolve_within(selection, &self.shape)?;
        trace!(path = %self.path, ?indices, x, y, "tile request");
        self.read_region(&indices, window, cancel).await
    }
}

impl std::fmt::Debug for ZarrPixelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrPixelSource")
            .field("store", &self.store.identifier())
            .field("path", &self.path)
            .field("labels", &self.labels)
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .field("dtype", &self.dtype)
            .finish()
    }
}
