//! Reading IFD entry values.
//!
//! Small values sit inline in the entry; larger ones (tile offset tables,
//! the OME-XML description) are fetched from the file with one range read
//! per entry.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

fn tag_name(entry: &IfdEntry) -> &'static str {
    TiffTag::from_u16(entry.tag_id)
        .map(TiffTag::name)
        .unwrap_or("unknown")
}

/// Reads entry values of one TIFF file.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw value bytes, inline or fetched.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header);
        let len = usize::try_from(size).map_err(|_| TiffError::InvalidTagValue {
            tag: tag_name(entry),
            message: format!("value of {} bytes is too large", size),
        })?;
        Ok(self.reader.read_exact_at(offset, len).await?)
    }

    /// An array of unsigned integers widened to u64.
    ///
    /// Accepts BYTE, SHORT, LONG, LONG8 and the IFD offset types.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        parse_u64_array(&bytes, field_type, self.byte_order()).ok_or_else(|| {
            TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected an unsigned integer array, got {:?}", field_type),
            }
        })
    }

    /// An array of unsigned integers narrowed to u16.
    pub async fn read_u16_array(&self, entry: &IfdEntry) -> Result<Vec<u16>, TiffError> {
        self.read_u64_array(entry)
            .await?
            .into_iter()
            .map(|v| {
                u16::try_from(v).map_err(|_| TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("value {} does not fit in 16 bits", v),
                })
            })
            .collect()
    }

    /// The first value of an unsigned integer entry.
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.byte_order()) {
            return Ok(value);
        }
        self.read_u64_array(entry)
            .await?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "entry has no values".to_string(),
            })
    }

    /// An ASCII value, stopping at the first NUL.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        match entry.field_type {
            Some(FieldType::Ascii) | Some(FieldType::Undefined) | Some(FieldType::Byte) => {}
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("expected an ASCII string, got {:?}", other),
                })
            }
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

/// Decode unsigned integers of `field_type` from `bytes`.
///
/// Returns `None` for non-integer field types.
pub fn parse_u64_array(bytes: &[u8], field_type: FieldType, byte_order: ByteOrder) -> Option<Vec<u64>> {
    let size = field_type.size_in_bytes();
    let chunks = bytes.chunks_exact(size);
    let values = match field_type {
        FieldType::Byte | FieldType::Undefined => chunks.map(|c| c[0] as u64).collect(),
        FieldType::Short => chunks.map(|c| byte_order.read_u16(c) as u64).collect(),
        FieldType::Long | FieldType::Ifd => {
            chunks.map(|c| byte_order.read_u32(c) as u64).collect()
        }
        FieldType::Long8 | FieldType::Ifd8 => chunks.map(|c| byte_order.read_u64(c)).collect(),
        _ => return None,
    };
    Some(values)
}
