//! Normalised image metadata.
//!
//! OME-XML (embedded in a TIFF `ImageDescription`, in a companion file, or
//! in a bioformats2raw store) is parsed into [`ImageManifest`]s that drive
//! the indexers and validate what the pixel stores actually contain.

mod ome;
mod roi;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dims::{DimensionOrder, Labels, PlaneCoord, PlaneSizes, INTERLEAVE_LABEL};
use crate::error::{ManifestError, SourceError};
use crate::pixel::{DType, PhysicalSize};

pub use ome::{parse_ome_xml, OmeDocument};
pub use roi::{Roi, RoiShape, Shape};

/// One channel of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display colour as RGBA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_per_pixel: Option<u32>,
}

/// A run of planes stored in one file, starting at IFD `ifd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiffDataEntry {
    pub ifd: u32,
    pub first_t: u32,
    pub first_c: u32,
    pub first_z: u32,
    /// Number of consecutive planes; `None` means "the rest of the image"
    /// for a bare entry, or 1 when any first-coordinate is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plane_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// True when any of `FirstT`, `FirstC`, `FirstZ` was present
    #[serde(default)]
    pub has_first: bool,
}

/// Where one plane lives: a file (or the manifest's own file) and an IFD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub ifd: u32,
}

/// Metadata of one logical image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dimension_order: DimensionOrder,
    /// OME pixel type (`uint16`, `float`, ...)
    pub pixel_type: String,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
    /// Samples of each pixel are stored adjacently (RGB-like)
    #[serde(default)]
    pub interleaved: bool,
    /// Keyed by axis label; only axes with both a size and a unit appear
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub physical_sizes: BTreeMap<String, PhysicalSize>,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiff_data: Vec<TiffDataEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rois: Vec<Roi>,
}

impl ImageManifest {
    pub fn plane_sizes(&self) -> PlaneSizes {
        PlaneSizes::new(self.size_t, self.channel_planes(), self.size_z)
    }

    /// Number of stored channel planes. Interleaved images count their
    /// samples in `SizeC`, so three RGB samples make one plane.
    pub fn channel_planes(&self) -> u32 {
        let spp = self.samples_per_pixel();
        if self.interleaved && self.size_c >= spp && self.size_c % spp == 0 {
            self.size_c / spp
        } else {
            self.size_c
        }
    }

    pub fn dtype(&self) -> Result<DType, SourceError> {
        DType::from_ome(&self.pixel_type)
    }

    /// Samples per interleaved pixel: 3 or 4 (3 when undeclared).
    pub fn samples_per_pixel(&self) -> u32 {
        match self.channels.first().and_then(|c| c.samples_per_pixel) {
            Some(4) => 4,
            _ => 3,
        }
    }

    /// Labels implied by the dimension order, outermost first.
    pub fn labels(&self) -> Labels {
        Labels::from_order(self.dimension_order, self.interleaved)
    }

    /// Level-0 shape in [`labels`](Self::labels) order.
    pub fn shape(&self) -> Vec<u32> {
        self.labels()
            .iter()
            .map(|label| self.size_of(label).unwrap_or(1))
            .collect()
    }

    /// Extent of an axis by label.
    pub fn size_of(&self, label: &str) -> Option<u32> {
        match label {
            "t" => Some(self.size_t),
            "c" => Some(self.channel_planes()),
            "z" => Some(self.size_z),
            "y" => Some(self.size_y),
            "x" => Some(self.size_x),
            INTERLEAVE_LABEL if self.interleaved => Some(self.samples_per_pixel()),
            _ => None,
        }
    }

    /// Check sizes that would make indexing meaningless.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for (field, value) in [
            ("SizeX", self.size_x),
            ("SizeY", self.size_y),
            ("SizeZ", self.size_z),
            ("SizeC", self.size_c),
            ("SizeT", self.size_t),
        ] {
            if value == 0 {
                return Err(ManifestError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Expand the `TiffData` entries into a plane → file/IFD table.
    ///
    /// A manifest without entries maps planes to IFDs in dimension order.
    /// Multi-plane entries walk planes in dimension order from their first
    /// coordinate, with consecutive IFDs.
    pub fn plane_refs(&self) -> BTreeMap<PlaneCoord, PlaneRef> {
        let sizes = self.plane_sizes();
        let total = sizes.plane_count();
        let order = self.dimension_order;
        let mut refs = BTreeMap::new();

        if self.tiff_data.is_empty() {
            for index in 0..total {
                refs.insert(
                    order.plane_coord(index, sizes),
                    PlaneRef {
                        file_name: None,
                        ifd: index as u32,
                    },
                );
            }
            return refs;
        }

        for entry in &self.tiff_data {
            let first = PlaneCoord::new(entry.first_t, entry.first_c, entry.first_z);
            if !sizes.contains(first) {
                continue;
            }
            let start = order.plane_index(first, sizes);
            let count = match entry.plane_count {
                Some(n) => n as u64,
                None if entry.has_first => 1,
                None => total - start,
            };
            for k in 0..count.min(total - start) {
                refs.insert(
                    order.plane_coord(start + k, sizes),
                    PlaneRef {
                        file_name: entry.file_name.clone(),
                        ifd: entry.ifd + k as u32,
                    },
                );
            }
        }
        refs
    }

    /// IFD of the first plane in this image's own file.
    pub fn first_ifd(&self) -> u32 {
        self.tiff_data.first().map(|e| e.ifd).unwrap_or(0)
    }

    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::Json(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(self).map_err(|e| ManifestError::Json(e.to_string()))
    }
}
