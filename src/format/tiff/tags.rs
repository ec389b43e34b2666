//! TIFF tag and field type definitions.

// =============================================================================
// Field Types
// =============================================================================

/// How the values of an IFD entry are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    /// 32-bit IFD offset (used by SubIFDs)
    Ifd = 13,
    /// BigTIFF only
    Long8 = 16,
    /// BigTIFF only
    SLong8 = 17,
    /// BigTIFF only
    Ifd8 = 18,
}

impl FieldType {
    /// Size of one value in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::SByte,
            7 => FieldType::Undefined,
            8 => FieldType::SShort,
            9 => FieldType::SLong,
            10 => FieldType::SRational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            13 => FieldType::Ifd,
            16 => FieldType::Long8,
            17 => FieldType::SLong8,
            18 => FieldType::Ifd8,
            _ => return None,
        })
    }

    /// Whether `count` values fit in the 4-byte (classic) or 8-byte
    /// (BigTIFF) value/offset field.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        (self.size_in_bytes() as u64)
            .checked_mul(count)
            .is_some_and(|total| total <= threshold)
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tags the pixel readers look at. Every other tag is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Holds the OME-XML manifest in OME-TIFF files
    ImageDescription = 270,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    /// 1 = chunky (interleaved), 2 = planar
    PlanarConfiguration = 284,
    /// 1 = none, 2 = horizontal differencing, 3 = floating point
    Predictor = 317,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    /// Offsets of the reduced-resolution children of this IFD
    SubIfds = 330,
    ExtraSamples = 338,
    /// 1 = unsigned, 2 = signed, 3 = IEEE float
    SampleFormat = 339,
}

impl TiffTag {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            254 => TiffTag::NewSubfileType,
            256 => TiffTag::ImageWidth,
            257 => TiffTag::ImageLength,
            258 => TiffTag::BitsPerSample,
            259 => TiffTag::Compression,
            262 => TiffTag::PhotometricInterpretation,
            270 => TiffTag::ImageDescription,
            273 => TiffTag::StripOffsets,
            277 => TiffTag::SamplesPerPixel,
            278 => TiffTag::RowsPerStrip,
            279 => TiffTag::StripByteCounts,
            284 => TiffTag::PlanarConfiguration,
            317 => TiffTag::Predictor,
            322 => TiffTag::TileWidth,
            323 => TiffTag::TileLength,
            324 => TiffTag::TileOffsets,
            325 => TiffTag::TileByteCounts,
            330 => TiffTag::SubIfds,
            338 => TiffTag::ExtraSamples,
            339 => TiffTag::SampleFormat,
            _ => return None,
        })
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::Predictor => "Predictor",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::SubIfds => "SubIFDs",
            TiffTag::ExtraSamples => "ExtraSamples",
            TiffTag::SampleFormat => "SampleFormat",
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Well-known TIFF compression codes.
///
/// Only used for naming; decoding goes through the
/// [`DecoderRegistry`](crate::format::DecoderRegistry), keyed by raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    OldJpeg = 6,
    Jpeg = 7,
    Deflate = 8,
    PackBits = 32773,
    AdobeDeflate = 32946,
    Jpeg2000 = 33003,
    Zstd = 50000,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Compression::None,
            5 => Compression::Lzw,
            6 => Compression::OldJpeg,
            7 => Compression::Jpeg,
            8 => Compression::Deflate,
            32773 => Compression::PackBits,
            32946 => Compression::AdobeDeflate,
            33003 => Compression::Jpeg2000,
            50000 => Compression::Zstd,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::OldJpeg => "Old JPEG",
            Compression::Jpeg => "JPEG",
            Compression::Deflate => "Deflate",
            Compression::PackBits => "PackBits",
            Compression::AdobeDeflate => "Adobe Deflate",
            Compression::Jpeg2000 => "JPEG 2000",
            Compression::Zstd => "Zstandard",
        }
    }

    /// Human-readable description of a raw compression code.
    pub fn describe(code: u16) -> String {
        match Compression::from_u16(code) {
            Some(c) => format!("TIFF compression {} ({})", code, c.name()),
            None => format!("TIFF compression {}", code),
        }
    }
}
