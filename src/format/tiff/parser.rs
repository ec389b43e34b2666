//! TIFF header and image file directory (IFD) parsing.
//!
//! # Header layout
//!
//! ```text
//! Classic TIFF (8 bytes)            BigTIFF (16 bytes)
//! 0-1  byte order (II / MM)         0-1   byte order
//! 2-3  version 42                   2-3   version 43
//! 4-7  first IFD offset (u32)       4-5   offset size (8)
//!                                   6-7   reserved
//!                                   8-15  first IFD offset (u64)
//! ```
//!
//! # IFD layout
//!
//! An entry count (u16 / u64), then that many fixed-size entries
//! (12 / 20 bytes), then the offset of the next IFD (u32 / u64, 0 = last).

use std::collections::HashMap;

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: [u8; 2] = *b"II";
const BYTE_ORDER_BIG_ENDIAN: [u8; 2] = *b"MM";

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of a classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of a BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order declared by the first two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

macro_rules! byte_order_reader {
    ($name:ident, $t:ty) => {
        /// Read a value from the start of `bytes` in this byte order.
        ///
        /// Panics if `bytes` is shorter than the value; callers slice
        /// buffers whose length they have already checked.
        #[inline]
        pub fn $name(self, bytes: &[u8]) -> $t {
            const N: usize = std::mem::size_of::<$t>();
            let mut raw = [0u8; N];
            raw.copy_from_slice(&bytes[..N]);
            match self {
                ByteOrder::LittleEndian => <$t>::from_le_bytes(raw),
                ByteOrder::BigEndian => <$t>::from_be_bytes(raw),
            }
        }
    };
}

impl ByteOrder {
    byte_order_reader!(read_u16, u16);
    byte_order_reader!(read_u32, u32);
    byte_order_reader!(read_u64, u64);
    byte_order_reader!(read_i16, i16);
    byte_order_reader!(read_i32, i32);
    byte_order_reader!(read_i64, i64);
    byte_order_reader!(read_f32, f32);
    byte_order_reader!(read_f64, f64);

    /// The sample byte order for pixel decoding.
    pub fn endian(self) -> crate::pixel::Endian {
        match self {
            ByteOrder::LittleEndian => crate::pixel::Endian::Little,
            ByteOrder::BigEndian => crate::pixel::Endian::Big,
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the first bytes of a file of `file_size` bytes.
    ///
    /// Pass at least [`BIGTIFF_HEADER_SIZE`] bytes when available; classic
    /// files only need the first 8.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(u16::from_le_bytes([bytes[0], bytes[1]]))),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Bytes per IFD entry: 12 classic, 20 BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Bytes of the entry count that opens an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Bytes of an offset field (next-IFD pointer, entry value/offset).
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Read an offset-sized value.
    #[inline]
    pub fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }

    /// Read the entry count that opens an IFD.
    #[inline]
    pub fn read_entry_count(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One tag entry of an IFD.
///
/// Values that fit in the value/offset field are stored inline; anything
/// larger lives at the offset held in that field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,
    /// `None` for field types this parser does not know
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    /// Raw value/offset field (4 or 8 bytes)
    pub value_offset_bytes: Vec<u8>,
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total value size in bytes, if the field type is known.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .and_then(|t| (t.size_in_bytes() as u64).checked_mul(self.count))
    }

    /// The out-of-line value offset.
    pub fn value_offset(&self, header: &TiffHeader) -> u64 {
        header.read_offset(&self.value_offset_bytes)
    }

    /// A single inline unsigned integer (BYTE, SHORT, LONG, LONG8 or IFD).
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        let bytes = &self.value_offset_bytes;
        match self.field_type? {
            FieldType::Byte | FieldType::Undefined => Some(bytes[0] as u64),
            FieldType::Short => Some(byte_order.read_u16(bytes) as u64),
            FieldType::Long | FieldType::Ifd => Some(byte_order.read_u32(bytes) as u64),
            FieldType::Long8 | FieldType::Ifd8 if bytes.len() >= 8 => {
                Some(byte_order.read_u64(bytes))
            }
            _ => None,
        }
    }

    /// A single inline value narrowed to u32.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u64(byte_order).and_then(|v| u32::try_from(v).ok())
    }

    /// A single inline value narrowed to u16.
    pub fn inline_u16(&self, byte_order: ByteOrder) -> Option<u16> {
        self.inline_u64(byte_order).and_then(|v| u16::try_from(v).ok())
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed image file directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    entries_by_tag: HashMap<u16, usize>,
    /// Offset of the next IFD in the chain (0 = last)
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Byte length of an IFD holding `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.offset_size()
    }

    /// Parse an IFD from bytes starting at its entry count.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }
        let entry_count = header.read_entry_count(bytes);
        let required = Self::calculate_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = header.byte_order;
        let entry_size = header.ifd_entry_size();
        let value_size = header.offset_size();
        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut entries_by_tag = HashMap::with_capacity(entry_count as usize);

        for i in 0..entry_count as usize {
            let raw = &bytes[count_size + i * entry_size..count_size + (i + 1) * entry_size];
            let tag_id = byte_order.read_u16(raw);
            let field_type_raw = byte_order.read_u16(&raw[2..]);
            let field_type = FieldType::from_u16(field_type_raw);
            let (count, value_offset_bytes) = if header.is_bigtiff {
                (byte_order.read_u64(&raw[4..]), raw[12..20].to_vec())
            } else {
                (byte_order.read_u32(&raw[4..]) as u64, raw[8..12].to_vec())
            };
            let is_inline = field_type
                .map(|t| t.fits_inline(count, header.is_bigtiff))
                .unwrap_or(false);
            debug_assert_eq!(value_offset_bytes.len(), value_size);

            // First occurrence wins on duplicated tags
            entries_by_tag.entry(tag_id).or_insert(entries.len());
            entries.push(IfdEntry {
                tag_id,
                field_type,
                field_type_raw,
                count,
                value_offset_bytes,
                is_inline,
            });
        }

        let next_ifd_offset =
            header.read_offset(&bytes[count_size + entry_count as usize * entry_size..]);

        Ok(Ifd {
            entries,
            entries_by_tag,
            next_ifd_offset,
        })
    }

    pub fn get_entry(&self, tag_id: u16) -> Option<&IfdEntry> {
        self.entries_by_tag.get(&tag_id).map(|&i| &self.entries[i])
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.get_entry(tag.as_u16())
    }

    /// A single inline unsigned value of `tag`.
    pub fn inline_value(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u64> {
        self.get_entry_by_tag(tag)?.inline_u64(byte_order)
    }
}
