//! Region-of-interest annotations.
//!
//! Shapes are parsed opportunistically: one that lacks a required numeric
//! attribute is dropped with a debug log, the rest of the document still
//! loads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Geometry of one annotation, in level-0 pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Point {
        x: f64,
        y: f64,
    },
    Polygon {
        points: Vec<[f64; 2]>,
    },
    Polyline {
        points: Vec<[f64; 2]>,
    },
    /// A text label anchored at a point
    Label {
        x: f64,
        y: f64,
        text: String,
    },
}

/// A shape plus the plane it is attached to, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiShape {
    pub shape: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_t: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_c: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub the_z: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub shapes: Vec<RoiShape>,
}

/// Element names that describe shapes.
pub(crate) fn is_shape_element(name: &str) -> bool {
    matches!(
        name,
        "Rectangle" | "Ellipse" | "Line" | "Point" | "Polygon" | "Polyline" | "Label"
    )
}

/// Build a shape from an element name and its attributes.
pub(crate) fn parse_shape(kind: &str, attrs: &HashMap<String, String>) -> Option<RoiShape> {
    let num = |key: &str| attrs.get(key).and_then(|v| v.trim().parse::<f64>().ok());
    let index = |key: &str| attrs.get(key).and_then(|v| v.trim().parse::<u32>().ok());
    let text = attrs.get("Text").cloned();

    let shape = match kind {
        "Rectangle" => Some(Shape::Rectangle {
            x: num("X")?,
            y: num("Y")?,
            width: num("Width")?,
            height: num("Height")?,
        }),
        "Ellipse" => Some(Shape::Ellipse {
            x: num("X")?,
            y: num("Y")?,
            radius_x: num("RadiusX")?,
            radius_y: num("RadiusY")?,
        }),
        "Line" => Some(Shape::Line {
            x1: num("X1")?,
            y1: num("Y1")?,
            x2: num("X2")?,
            y2: num("Y2")?,
        }),
        "Point" => Some(Shape::Point {
            x: num("X")?,
            y: num("Y")?,
        }),
        "Polygon" => parse_points(attrs.get("Points")?).map(|points| Shape::Polygon { points }),
        "Polyline" => parse_points(attrs.get("Points")?).map(|points| Shape::Polyline { points }),
        "Label" => Some(Shape::Label {
            x: num("X")?,
            y: num("Y")?,
            text: text.clone().unwrap_or_default(),
        }),
        _ => None,
    }?;

    Some(RoiShape {
        shape,
        text,
        the_t: index("TheT"),
        the_c: index("TheC"),
        the_z: index("TheZ"),
    })
}

/// Like [`parse_shape`], logging what was dropped.
pub(crate) fn parse_shape_or_skip(
    kind: &str,
    attrs: &HashMap<String, String>,
) -> Option<RoiShape> {
    let shape = parse_shape(kind, attrs);
    if shape.is_none() {
        debug!(kind, id = ?attrs.get("ID"), "skipping ROI shape with missing or invalid fields");
    }
    shape
}

/// Parse `"x1,y1 x2,y2 ..."`; at least one point is required.
fn parse_points(value: &str) -> Option<Vec<[f64; 2]>> {
    let points = value
        .split_whitespace()
        .map(|pair| {
            let (x, y) = pair.split_once(',')?;
            Some([x.trim().parse().ok()?, y.trim().parse().ok()?])
        })
        .collect::<Option<Vec<_>>>()?;
    (!points.is_empty()).then_some(points)
}
