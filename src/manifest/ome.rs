//! OME-XML parsing.
//!
//! A streaming pass over the document with `quick-xml`: only the elements
//! that drive indexing (`Image`, `Pixels`, `Channel`, `TiffData`, `UUID`)
//! and the ROI annotations are read; everything else is skipped.

use std::collections::{BTreeMap, HashMap};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::roi::{is_shape_element, parse_shape_or_skip};
use super::{ChannelInfo, ImageManifest, Roi, TiffDataEntry};
use crate::dims::DimensionOrder;
use crate::error::ManifestError;
use crate::pixel::PhysicalSize;

/// Every image series and annotation of one OME-XML document.
#[derive(Debug, Clone, PartialEq)]
pub struct OmeDocument {
    pub images: Vec<ImageManifest>,
    /// ROIs keyed by ID, including those no image references
    pub rois: Vec<Roi>,
}

impl OmeDocument {
    /// The image series at `index`.
    pub fn image(&self, index: usize) -> Result<&ImageManifest, ManifestError> {
        self.images
            .get(index)
            .ok_or(ManifestError::ImageIndexOutOfRange {
                index,
                count: self.images.len(),
            })
    }

    pub fn into_image(mut self, index: usize) -> Result<ImageManifest, ManifestError> {
        let count = self.images.len();
        if index >= count {
            return Err(ManifestError::ImageIndexOutOfRange { index, count });
        }
        Ok(self.images.swap_remove(index))
    }
}

/// Partially read `Image` element.
#[derive(Default)]
struct ImageBuilder {
    id: Option<String>,
    name: Option<String>,
    pixels: Option<HashMap<String, String>>,
    channels: Vec<ChannelInfo>,
    tiff_data: Vec<TiffDataEntry>,
    roi_refs: Vec<String>,
}

impl ImageBuilder {
    fn build(self, rois: &HashMap<String, Roi>) -> Result<ImageManifest, ManifestError> {
        let pixels = self
            .pixels
            .ok_or_else(|| ManifestError::MissingField("Pixels".to_string()))?;

        let order = DimensionOrder::parse(required(&pixels, "DimensionOrder")?)?;
        let pixel_type = required(&pixels, "Type")?.to_string();

        let interleaved = pixels
            .get("Interleaved")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
            || self
                .channels
                .first()
                .and_then(|c| c.samples_per_pixel)
                .is_some_and(|spp| spp > 1);

        let mut physical_sizes = BTreeMap::new();
        for axis in ["X", "Y", "Z"] {
            let size = pixels
                .get(&format!("PhysicalSize{}", axis))
                .and_then(|v| v.trim().parse::<f64>().ok());
            let unit = pixels.get(&format!("PhysicalSize{}Unit", axis));
            if let (Some(size), Some(unit)) = (size, unit) {
                physical_sizes.insert(
                    axis.to_ascii_lowercase(),
                    PhysicalSize {
                        size,
                        unit: unit.clone(),
                    },
                );
            }
        }

        let manifest = ImageManifest {
            id: self.id,
            name: self.name,
            dimension_order: order,
            pixel_type,
            size_x: size_attr(&pixels, "SizeX")?,
            size_y: size_attr(&pixels, "SizeY")?,
            size_z: size_attr(&pixels, "SizeZ")?,
            size_c: size_attr(&pixels, "SizeC")?,
            size_t: size_attr(&pixels, "SizeT")?,
            interleaved,
            physical_sizes,
            channels: self.channels,
            tiff_data: self.tiff_data,
            rois: self
                .roi_refs
                .iter()
                .filter_map(|id| rois.get(id).cloned())
                .collect(),
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

fn required<'a>(attrs: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ManifestError> {
    attrs
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ManifestError::MissingField(key.to_string()))
}

fn size_attr(attrs: &HashMap<String, String>, key: &str) -> Result<u32, ManifestError> {
    let value = required(attrs, key)?;
    value.trim().parse().map_err(|_| ManifestError::InvalidValue {
        field: key.to_string(),
        value: value.to_string(),
    })
}

fn optional_u32(attrs: &HashMap<String, String>, key: &str) -> Result<Option<u32>, ManifestError> {
    match attrs.get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ManifestError::InvalidValue {
                field: key.to_string(),
                value: value.clone(),
            }),
    }
}

/// Collect the attributes of an element, keyed by local name.
fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, ManifestError> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ManifestError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ManifestError::Xml(e.to_string()))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn channel(attrs: &HashMap<String, String>) -> Result<ChannelInfo, ManifestError> {
    // Colours are signed 32-bit RGBA integers
    let color = match attrs.get("Color") {
        None => None,
        Some(value) => {
            let packed: i32 = value.trim().parse().map_err(|_| ManifestError::InvalidValue {
                field: "Color".to_string(),
                value: value.clone(),
            })?;
            Some((packed as u32).to_be_bytes())
        }
    };
    Ok(ChannelInfo {
        id: attrs.get("ID").cloned(),
        name: attrs.get("Name").cloned(),
        color,
        samples_per_pixel: optional_u32(attrs, "SamplesPerPixel")?,
    })
}

fn tiff_data(attrs: &HashMap<String, String>) -> Result<TiffDataEntry, ManifestError> {
    let first_t = optional_u32(attrs, "FirstT")?;
    let first_c = optional_u32(attrs, "FirstC")?;
    let first_z = optional_u32(attrs, "FirstZ")?;
    Ok(TiffDataEntry {
        ifd: optional_u32(attrs, "IFD")?.unwrap_or(0),
        has_first: first_t.is_some() || first_c.is_some() || first_z.is_some(),
        first_t: first_t.unwrap_or(0),
        first_c: first_c.unwrap_or(0),
        first_z: first_z.unwrap_or(0),
        plane_count: optional_u32(attrs, "PlaneCount")?,
        file_name: None,
        uuid: None,
    })
}

/// Parse an OME-XML document into its image series.
pub fn parse_ome_xml(xml: &str) -> Result<OmeDocument, ManifestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut builders: Vec<ImageBuilder> = Vec::new();
    let mut current: Option<ImageBuilder> = None;
    let mut rois: Vec<Roi> = Vec::new();
    let mut current_roi: Option<Roi> = None;
    let mut in_uuid = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ManifestError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let local = e.local_name();
                let name = String::from_utf8_lossy(local.as_ref()).into_owned();
                match name.as_str() {
                    "Image" => {
                        let attrs = attributes(e)?;
                        let builder = ImageBuilder {
                            id: attrs.get("ID").cloned(),
                            name: attrs.get("Name").cloned(),
                            ..Default::default()
                        };
                        if is_empty {
                            builders.push(builder);
                        } else {
                            current = Some(builder);
                        }
                    }
                    "Pixels" => {
                        if let Some(image) = current.as_mut() {
                            image.pixels = Some(attributes(e)?);
                        }
                    }
                    "Channel" => {
                        if let Some(image) = current.as_mut() {
                            image.channels.push(channel(&attributes(e)?)?);
                        }
                    }
                    "TiffData" => {
                        if let Some(image) = current.as_mut() {
                            image.tiff_data.push(tiff_data(&attributes(e)?)?);
                        }
                    }
                    "UUID" => {
                        let attrs = attributes(e)?;
                        if let Some(entry) = current.as_mut().and_then(|i| i.tiff_data.last_mut()) {
                            entry.file_name = attrs.get("FileName").cloned();
                        }
                        in_uuid = !is_empty;
                    }
                    "ROIRef" => {
                        if let (Some(image), Some(id)) = (current.as_mut(), attributes(e)?.remove("ID")) {
                            image.roi_refs.push(id);
                        }
                    }
                    "ROI" => {
                        let attrs = attributes(e)?;
                        let roi = Roi {
                            id: attrs.get("ID").cloned().unwrap_or_default(),
                            name: attrs.get("Name").cloned(),
                            shapes: Vec::new(),
                        };
                        if is_empty {
                            rois.push(roi);
                        } else {
                            current_roi = Some(roi);
                        }
                    }
                    shape if is_shape_element(shape) => {
                        if let Some(roi) = current_roi.as_mut() {
                            if let Some(parsed) = parse_shape_or_skip(shape, &attributes(e)?) {
                                roi.shapes.push(parsed);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref text) if in_uuid => {
                let uuid = text
                    .unescape()
                    .map_err(|e| ManifestError::Xml(e.to_string()))?
                    .trim()
                    .to_string();
                if let Some(entry) = current.as_mut().and_then(|i| i.tiff_data.last_mut()) {
                    entry.uuid = Some(uuid);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"Image" => {
                    if let Some(image) = current.take() {
                        builders.push(image);
                    }
                }
                b"UUID" => in_uuid = false,
                b"ROI" => {
                    if let Some(roi) = current_roi.take() {
                        rois.push(roi);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if builders.is_empty() {
        return Err(ManifestError::NoImages);
    }

    let by_id: HashMap<String, Roi> = rois.iter().map(|r| (r.id.clone(), r.clone())).collect();
    let images = builders
        .into_iter()
        .map(|b| b.build(&by_id))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(images = images.len(), rois = rois.len(), "parsed OME-XML");
    Ok(OmeDocument { images, rois })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Shape;

    const SINGLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0" Name="cells">
    <Pixels ID="Pixels:0" DimensionOrder="XYZCT" Type="uint16"
            SizeX="512" SizeY="256" SizeZ="3" SizeC="2" SizeT="1"
            PhysicalSizeX="0.65" PhysicalSizeXUnit="µm" PhysicalSizeY="0.65">
      <Channel ID="Channel:0:0" Name="DAPI" Color="-16776961" SamplesPerPixel="1"/>
      <Channel ID="Channel:0:1" Name="GFP &amp; co" Color="16711935"/>
      <TiffData IFD="0" PlaneCount="6"/>
    </Pixels>
    <ROIRef ID="ROI:1"/>
  </Image>
  <ROI ID="ROI:1" Name="nucleus">
    <Union>
      <Rectangle ID="Shape:1" X="10" Y="20" Width="30" Height="40" TheZ="1"/>
      <Ellipse ID="Shape:2" X="5" Y="5"/>
    </Union>
  </ROI>
</OME>"#;

    #[test]
    fn test_single_image() {
        let doc = parse_ome_xml(SINGLE).unwrap();
        assert_eq!(doc.images.len(), 1);
        let image = &doc.images[0];
        assert_eq!(image.name.as_deref(), Some("cells"));
        assert_eq!(image.dimension_order, DimensionOrder::Xyzct);
        assert_eq!((image.size_x, image.size_y, image.size_z, image.size_c, image.size_t), (512, 256, 3, 2, 1));
        assert!(!image.interleaved);
        assert_eq!(image.shape(), vec![1, 2, 3, 256, 512]);
        assert_eq!(image.tiff_data[0].plane_count, Some(6));
    }

    #[test]
    fn test_physical_sizes_need_unit() {
        let image = &parse_ome_xml(SINGLE).unwrap().images[0];
        assert_eq!(image.physical_sizes.len(), 1);
        assert_eq!(image.physical_sizes["x"].unit, "µm");
        assert!((image.physical_sizes["x"].size - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_channel_colors_are_signed_rgba() {
        let image = &parse_ome_xml(SINGLE).unwrap().images[0];
        assert_eq!(image.channels[0].color, Some([255, 0, 0, 255]));
        assert_eq!(image.channels[1].color, Some([0, 255, 0, 255]));
        assert_eq!(image.channels[1].name.as_deref(), Some("GFP & co"));
    }

    #[test]
    fn test_rois_attached_and_invalid_shapes_skipped() {
        let doc = parse_ome_xml(SINGLE).unwrap();
        let image = &doc.images[0];
        assert_eq!(image.rois.len(), 1);
        assert_eq!(image.rois[0].shapes.len(), 1);
        assert!(matches!(image.rois[0].shapes[0].shape, Shape::Rectangle { .. }));
        assert_eq!(image.rois[0].shapes[0].the_z, Some(1));
    }

    #[test]
    fn test_multi_file_tiff_data() {
        let xml = r#"<OME><Image ID="Image:0"><Pixels DimensionOrder="XYCZT" Type="uint8"
            SizeX="8" SizeY="8" SizeZ="1" SizeC="2" SizeT="1">
            <TiffData FirstC="0" IFD="0" PlaneCount="1"><UUID FileName="a.ome.tif">urn:uuid:1</UUID></TiffData>
            <TiffData FirstC="1" IFD="0" PlaneCount="1"><UUID FileName="b.ome.tif">urn:uuid:2</UUID></TiffData>
            </Pixels></Image></OME>"#;
        let image = parse_ome_xml(xml).unwrap().into_image(0).unwrap();
        assert_eq!(image.tiff_data.len(), 2);
        assert_eq!(image.tiff_data[1].file_name.as_deref(), Some("b.ome.tif"));
        assert_eq!(image.tiff_data[1].uuid.as_deref(), Some("urn:uuid:2"));
        assert!(image.tiff_data[1].has_first);
        assert_eq!(image.tiff_data[1].first_c, 1);
    }

    #[test]
    fn test_interleaved_from_samples_per_pixel() {
        let xml = r#"<OME><Image><Pixels DimensionOrder="XYCZT" Type="uint8"
            SizeX="4" SizeY="4" SizeZ="1" SizeC="3" SizeT="1">
            <Channel SamplesPerPixel="3"/></Pixels></Image></OME>"#;
        let image = parse_ome_xml(xml).unwrap().into_image(0).unwrap();
        assert!(image.interleaved);
        assert_eq!(image.labels().as_slice().last().map(String::as_str), Some("_c"));
        // Three samples in one stored plane
        assert_eq!(image.shape(), vec![1, 1, 1, 4, 4, 3]);
    }

    #[test]
    fn test_multiple_series() {
        let xml = r#"<OME>
            <Image ID="Image:0"><Pixels DimensionOrder="XYZCT" Type="uint8" SizeX="4" SizeY="4" SizeZ="1" SizeC="1" SizeT="1"/></Image>
            <Image ID="Image:1"><Pixels DimensionOrder="XYZCT" Type="float" SizeX="2" SizeY="2" SizeZ="1" SizeC="1" SizeT="1"/></Image>
            </OME>"#;
        let doc = parse_ome_xml(xml).unwrap();
        assert_eq!(doc.images.len(), 2);
        assert_eq!(doc.image(1).unwrap().pixel_type, "float");
        assert!(matches!(
            doc.image(2),
            Err(ManifestError::ImageIndexOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_ome_xml("<OME></OME>"), Err(ManifestError::NoImages)));
        assert!(matches!(
            parse_ome_xml(r#"<OME><Image><Pixels DimensionOrder="XYZCT" Type="uint8" SizeX="4"/></Image></OME>"#),
            Err(ManifestError::MissingField(ref f)) if f == "SizeY"
        ));
        assert!(matches!(
            parse_ome_xml(r#"<OME><Image><Pixels DimensionOrder="YXZCT" Type="uint8" SizeX="1" SizeY="1" SizeZ="1" SizeC="1" SizeT="1"/></Image></OME>"#),
            Err(ManifestError::UnsupportedDimensionOrder(_))
        ));
        assert!(matches!(parse_ome_xml("<OME><Image></Pixels></OME>"), Err(ManifestError::Xml(_))));
    }
}
