use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Byte order of stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;
}

/// Element kind of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float32,
    Float64,
}

impl DType {
    /// Size of one sample in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::Uint8 | DType::Int8 => 1,
            DType::Uint16 | DType::Int16 => 2,
            DType::Uint32 | DType::Int32 | DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Map an OME `Pixels/@Type` value.
    pub fn from_ome(value: &str) -> Result<Self, SourceError> {
        match value {
            "uint8" => Ok(DType::Uint8),
            "uint16" => Ok(DType::Uint16),
            "uint32" => Ok(DType::Uint32),
            "int8" => Ok(DType::Int8),
            "int16" => Ok(DType::Int16),
            "int32" => Ok(DType::Int32),
            "float" => Ok(DType::Float32),
            "double" => Ok(DType::Float64),
            other => Err(SourceError::UnsupportedDtype(format!("OME type {:?}", other))),
        }
    }

    /// Map TIFF `SampleFormat` (1 unsigned, 2 signed, 3 float) and `BitsPerSample`.
    pub fn from_tiff(sample_format: u16, bits_per_sample: u16) -> Result<Self, SourceError> {
        match (sample_format, bits_per_sample) {
            (1, 8) => Ok(DType::Uint8),
            (1, 16) => Ok(DType::Uint16),
            (1, 32) => Ok(DType::Uint32),
            (2, 8) => Ok(DType::Int8),
            (2, 16) => Ok(DType::Int16),
            (2, 32) => Ok(DType::Int32),
            (3, 32) => Ok(DType::Float32),
            (3, 64) => Ok(DType::Float64),
            (format, bits) => Err(SourceError::UnsupportedDtype(format!(
                "TIFF SampleFormat {} with {} bits per sample",
                format, bits
            ))),
        }
    }

    /// Parse a Zarr v2 / NumPy type string such as `"<u2"` or `"|u1"`.
    pub fn from_zarr(value: &str) -> Result<(Self, Endian), SourceError> {
        let unsupported = || SourceError::UnsupportedDtype(format!("Zarr dtype {:?}", value));

        let mut chars = value.chars();
        let endian = match chars.next() {
            Some('<') | Some('|') => Endian::Little,
            Some('>') => Endian::Big,
            _ => return Err(unsupported()),
        };
        let dtype = match chars.as_str() {
            "u1" => DType::Uint8,
            "u2" => DType::Uint16,
            "u4" => DType::Uint32,
            "i1" => DType::Int8,
            "i2" => DType::Int16,
            "i4" => DType::Int32,
            "f4" => DType::Float32,
            "f8" => DType::Float64,
            _ => return Err(unsupported()),
        };
        Ok((dtype, endian))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
