use serde::Serialize;

use super::{DType, Endian};
use crate::error::DecodeError;

/// A flat, typed sample buffer in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "dtype", content = "data")]
pub enum TypedBuffer {
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// Apply `$body` to the inner vector of a [`TypedBuffer`], whatever its type.
#[macro_export]
#[doc(hidden)]
macro_rules! with_typed_buffer {
    ($buffer:expr, $v:ident => $body:expr) => {
        match $buffer {
            $crate::pixel::TypedBuffer::Uint8($v) => $body,
            $crate::pixel::TypedBuffer::Uint16($v) => $body,
            $crate::pixel::TypedBuffer::Uint32($v) => $body,
            $crate::pixel::TypedBuffer::Int8($v) => $body,
            $crate::pixel::TypedBuffer::Int16($v) => $body,
            $crate::pixel::TypedBuffer::Int32($v) => $body,
            $crate::pixel::TypedBuffer::Float32($v) => $body,
            $crate::pixel::TypedBuffer::Float64($v) => $body,
        }
    };
}

impl TypedBuffer {
    pub fn dtype(&self) -> DType {
        match self {
            TypedBuffer::Uint8(_) => DType::Uint8,
            TypedBuffer::Uint16(_) => DType::Uint16,
            TypedBuffer::Uint32(_) => DType::Uint32,
            TypedBuffer::Int8(_) => DType::Int8,
            TypedBuffer::Int16(_) => DType::Int16,
            TypedBuffer::Int32(_) => DType::Int32,
            TypedBuffer::Float32(_) => DType::Float32,
            TypedBuffer::Float64(_) => DType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        with_typed_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinterpret native-endian bytes as samples of `dtype`.
    pub fn from_native_bytes(dtype: DType, bytes: &[u8]) -> Result<Self, DecodeError> {
        let size = dtype.size_in_bytes();
        if bytes.len() % size != 0 {
            return Err(DecodeError::ShortBlock {
                expected: bytes.len().next_multiple_of(size),
                actual: bytes.len(),
            });
        }
        Ok(match dtype {
            DType::Uint8 => TypedBuffer::Uint8(bytes.to_vec()),
            DType::Uint16 => TypedBuffer::Uint16(bytemuck::pod_collect_to_vec(bytes)),
            DType::Uint32 => TypedBuffer::Uint32(bytemuck::pod_collect_to_vec(bytes)),
            DType::Int8 => TypedBuffer::Int8(bytemuck::pod_collect_to_vec(bytes)),
            DType::Int16 => TypedBuffer::Int16(bytemuck::pod_collect_to_vec(bytes)),
            DType::Int32 => TypedBuffer::Int32(bytemuck::pod_collect_to_vec(bytes)),
            DType::Float32 => TypedBuffer::Float32(bytemuck::pod_collect_to_vec(bytes)),
            DType::Float64 => TypedBuffer::Float64(bytemuck::pod_collect_to_vec(bytes)),
        })
    }

    /// Native-endian byte view of the samples.
    pub fn as_native_bytes(&self) -> &[u8] {
        with_typed_buffer!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// `len` samples all equal to `fill` (saturating cast).
    pub fn filled(dtype: DType, len: usize, fill: f64) -> Self {
        match dtype {
            DType::Uint8 => TypedBuffer::Uint8(vec![fill as u8; len]),
            DType::Uint16 => TypedBuffer::Uint16(vec![fill as u16; len]),
            DType::Uint32 => TypedBuffer::Uint32(vec![fill as u32; len]),
            DType::Int8 => TypedBuffer::Int8(vec![fill as i8; len]),
            DType::Int16 => TypedBuffer::Int16(vec![fill as i16; len]),
            DType::Int32 => TypedBuffer::Int32(vec![fill as i32; len]),
            DType::Float32 => TypedBuffer::Float32(vec![fill as f32; len]),
            DType::Float64 => TypedBuffer::Float64(vec![fill; len]),
        }
    }

    /// Every sample widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_typed_buffer!(self, v => v.iter().map(|&s| s as f64).collect())
    }
}

/// Convert stored samples to native byte order in place.
pub fn to_native_endian(bytes: &mut [u8], sample_size: usize, stored: Endian) {
    if stored == Endian::NATIVE || sample_size < 2 {
        return;
    }
    for sample in bytes.chunks_exact_mut(sample_size) {
        sample.reverse();
    }
}

/// Copy a `width` x `height` window of samples between two row-major byte
/// buffers.
///
/// `src_stride` / `dst_stride` are row lengths in bytes; `row_bytes` is how
/// much of each row to copy.
#[allow(clippy::too_many_arguments)]
pub(crate) fn copy_rows(
    src: &[u8],
    src_stride: usize,
    src_offset: usize,
    dst: &mut [u8],
    dst_stride: usize,
    dst_offset: usize,
    row_bytes: usize,
    rows: usize,
) {
    for row in 0..rows {
        let s = src_offset + row * src_stride;
        let d = dst_offset + row * dst_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}
