//! Undoing TIFF predictors after decompression.

use crate::error::SourceError;
use crate::pixel::{to_native_endian, DType, Endian};

/// TIFF `Predictor` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    None,
    /// Horizontal differencing of integer samples
    Horizontal,
    /// Byte-plane differencing of floating point samples
    FloatingPoint,
}

impl Predictor {
    /// Validate a predictor against the sample type at open time.
    pub fn from_tag(value: u16, dtype: DType) -> Result<Self, SourceError> {
        match (value, dtype.is_float()) {
            (1, _) => Ok(Predictor::None),
            (2, false) => Ok(Predictor::Horizontal),
            (3, true) => Ok(Predictor::FloatingPoint),
            (value, _) => Err(SourceError::UnsupportedCompression(format!(
                "TIFF predictor {} for {} samples",
                value, dtype
            ))),
        }
    }
}

/// Convert a decompressed block to native-endian samples, undoing the
/// predictor.
///
/// `row_samples` is the number of samples in one block row (width times
/// samples per pixel for chunky data); `stride` is the distance between
/// samples of the same component (samples per pixel, or 1 when planar).
pub fn unpredict(
    block: &mut Vec<u8>,
    predictor: Predictor,
    dtype: DType,
    stored: Endian,
    row_samples: usize,
    stride: usize,
) {
    let size = dtype.size_in_bytes();
    match predictor {
        Predictor::None => to_native_endian(block, size, stored),
        Predictor::Horizontal => {
            to_native_endian(block, size, stored);
            match size {
                1 => accumulate::<u8>(block, row_samples, stride),
                2 => accumulate::<u16>(block, row_samples, stride),
                4 => accumulate::<u32>(block, row_samples, stride),
                _ => accumulate::<u64>(block, row_samples, stride),
            }
        }
        Predictor::FloatingPoint => {
            *block = unshuffle_float_rows(block, size, row_samples, stride);
        }
    }
}

trait Wrapping: bytemuck::Pod {
    fn wrapping_add(self, other: Self) -> Self;
}

macro_rules! impl_wrapping {
    ($($t:ty),*) => {$(
        impl Wrapping for $t {
            #[inline]
            fn wrapping_add(self, other: Self) -> Self {
                <$t>::wrapping_add(self, other)
            }
        }
    )*};
}

impl_wrapping!(u8, u16, u32, u64);

/// Running sum along each row with the given component stride.
fn accumulate<T: Wrapping>(block: &mut [u8], row_samples: usize, stride: usize) {
    let size = std::mem::size_of::<T>();
    let row_bytes = row_samples * size;
    if row_bytes == 0 {
        return;
    }
    for row in block.chunks_exact_mut(row_bytes) {
        let mut samples: Vec<T> = bytemuck::pod_collect_to_vec(row);
        for i in stride..samples.len() {
            samples[i] = samples[i].wrapping_add(samples[i - stride]);
        }
        row.copy_from_slice(bytemuck::cast_slice(&samples));
    }
}

/// Undo predictor 3: byte-wise differencing over big-endian byte planes.
fn unshuffle_float_rows(block: &[u8], size: usize, row_samples: usize, stride: usize) -> Vec<u8> {
    let row_bytes = row_samples * size;
    let mut out = vec![0u8; block.len()];
    if row_bytes == 0 {
        return out;
    }

    let mut row = vec![0u8; row_bytes];
    for (src, dst) in block
        .chunks_exact(row_bytes)
        .zip(out.chunks_exact_mut(row_bytes))
    {
        row.copy_from_slice(src);
        for i in stride..row_bytes {
            row[i] = row[i].wrapping_add(row[i - stride]);
        }
        for j in 0..row_samples {
            let sample = &mut dst[j * size..(j + 1) * size];
            for (k, byte) in sample.iter_mut().enumerate() {
                *byte = row[k * row_samples + j];
            }
            // Planes hold the most significant byte first
            to_native_endian(sample, size, Endian::Big);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predictor_validation() {
        assert_eq!(
            Predictor::from_tag(2, DType::Uint16).unwrap(),
            Predictor::Horizontal
        );
        assert!(Predictor::from_tag(2, DType::Float32).is_err());
        assert!(Predictor::from_tag(3, DType::Uint8).is_err());
        assert_eq!(
            Predictor::from_tag(3, DType::Float64).unwrap(),
            Predictor::FloatingPoint
        );
    }

    #[test]
    fn test_horizontal_u16_big_endian() {
        // Two rows of [10, 20, 25] stored as differences [10, 10, 5]
        let mut block = Vec::new();
        for _ in 0..2 {
            for d in [10u16, 10, 5] {
                block.extend_from_slice(&d.to_be_bytes());
            }
        }
        unpredict(&mut block, Predictor::Horizontal, DType::Uint16, Endian::Big, 3, 1);
        let values: Vec<u16> = bytemuck::pod_collect_to_vec(&block);
        assert_eq!(values, vec![10, 20, 25, 10, 20, 25]);
    }

    #[test]
    fn test_horizontal_rgb_stride() {
        // One row of two RGB pixels: (1,2,3) (4,6,8), differenced per component
        let mut block = vec![1u8, 2, 3, 3, 4, 5];
        unpredict(&mut block, Predictor::Horizontal, DType::Uint8, Endian::Little, 6, 3);
        assert_eq!(block, vec![1, 2, 3, 4, 6, 8]);
    }

    #[test]
    fn test_floating_point_predictor() {
        let values = [1.5f32, -2.25, 1000.0];
        let n = values.len();

        // Encode: big-endian byte planes, then byte differencing
        let mut planes = vec![0u8; n * 4];
        for (j, v) in values.iter().enumerate() {
            for (k, b) in v.to_be_bytes().iter().enumerate() {
                planes[k * n + j] = *b;
            }
        }
        let mut encoded = planes.clone();
        for i in (1..planes.len()).rev() {
            encoded[i] = planes[i].wrapping_sub(planes[i - 1]);
        }

        unpredict(&mut encoded, Predictor::FloatingPoint, DType::Float32, Endian::Little, n, 1);
        let decoded: Vec<f32> = bytemuck::pod_collect_to_vec(&encoded);
        assert_eq!(decoded, values.to_vec());
    }
}
