//! Zarr v2 array and group metadata (`.zarray`, `.zattrs`).

use serde::Deserialize;
use serde_json::Value;

use crate::manifest::ChannelInfo;

/// Contents of a `.zarray` document.
#[derive(Debug, Clone, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u8,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dtype: String,
    #[serde(default)]
    pub compressor: Option<CompressorConfig>,
    #[serde(default)]
    pub fill_value: Value,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default)]
    pub filters: Option<Vec<Value>>,
    #[serde(default)]
    pub dimension_separator: Option<String>,
}

fn default_order() -> String {
    "C".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressorConfig {
    pub id: String,
}

impl ArrayMetadata {
    /// Fill value as a number; `null` reads as 0.
    pub fn fill_value(&self) -> f64 {
        match &self.fill_value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => match s.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ => 0.0,
            },
            Value::Bool(b) => *b as u8 as f64,
            _ => 0.0,
        }
    }

    /// Separator between chunk indices in keys (`.` unless declared).
    pub fn separator(&self) -> &str {
        self.dimension_separator.as_deref().unwrap_or(".")
    }
}

/// Contents of a `.zattrs` document; unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupAttributes {
    #[serde(default)]
    pub multiscales: Vec<Multiscale>,
    #[serde(default)]
    pub omero: Option<Omero>,
    #[serde(default, rename = "bioformats2raw.layout")]
    pub bioformats2raw_layout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Multiscale {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub axes: Option<Vec<Axis>>,
    pub datasets: Vec<Dataset>,
}

/// An axis, either a bare name (NGFF 0.3) or an object (0.4+).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Axis {
    Name(String),
    Object {
        name: String,
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        unit: Option<String>,
    },
}

impl Axis {
    pub fn name(&self) -> &str {
        match self {
            Axis::Name(name) => name,
            Axis::Object { name, .. } => name,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            Axis::Name(_) => None,
            Axis::Object { unit, .. } => unit.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub path: String,
    #[serde(default, rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<CoordinateTransformation>,
}

impl Dataset {
    /// The `scale` transformation, if any.
    pub fn scale(&self) -> Option<&[f64]> {
        self.coordinate_transformations
            .iter()
            .find(|t| t.kind == "scale")
            .and_then(|t| t.scale.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinateTransformation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub scale: Option<Vec<f64>>,
}

/// OMERO rendering metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Omero {
    #[serde(default)]
    pub channels: Vec<OmeroChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OmeroChannel {
    #[serde(default)]
    pub label: Option<String>,
    /// Hex `RRGGBB`
    #[serde(default)]
    pub color: Option<String>,
}

impl Omero {
    pub fn channel_infos(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|c| ChannelInfo {
                id: None,
                name: c.label.clone(),
                color: c.color.as_deref().and_then(parse_hex_color),
                samples_per_pixel: None,
            })
            .collect()
    }
}

fn parse_hex_color(hex: &str) -> Option<[u8; 4]> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    let [_, r, g, b] = value.to_be_bytes();
    Some([r, g, b, 255])
}
