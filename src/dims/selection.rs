use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::INTERLEAVE_LABEL;
use crate::error::{ManifestError, SourceError};

// =============================================================================
// Selection
// =============================================================================

/// Coordinates of one 2-D plane.
///
/// On the wire a named selection is a plain mapping such as
/// `{"t": 0, "c": 2, "z": 5}`; omitted dimensions default to 0. Callers that
/// already hold positional indices can pass them through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    /// Dimension name to index
    Named(BTreeMap<String, u32>),
    /// One index per label, outermost first
    Positional(Vec<u32>),
}

impl Selection {
    /// The empty named selection, i.e. the first plane.
    pub fn new() -> Self {
        Selection::Named(BTreeMap::new())
    }

    /// Build a positional selection.
    pub fn positional(indices: Vec<u32>) -> Self {
        Selection::Positional(indices)
    }

    /// Set a named coordinate.
    ///
    /// A positional selection is left untouched.
    pub fn with(mut self, name: impl Into<String>, index: u32) -> Self {
        if let Selection::Named(map) = &mut self {
            map.insert(name.into(), index);
        }
        self
    }

    /// Shorthand for the common `{t, c, z}` triple.
    pub fn tcz(t: u32, c: u32, z: u32) -> Self {
        Self::new().with("t", t).with("c", c).with("z", z)
    }

    /// Named coordinate, 0 when absent or when the selection is positional.
    pub fn get(&self, name: &str) -> u32 {
        match self {
            Selection::Named(map) => map.get(name).copied().unwrap_or(0),
            Selection::Positional(_) => 0,
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, u32)> for Selection {
    fn from_iter<I: IntoIterator<Item = (K, u32)>>(iter: I) -> Self {
        Selection::Named(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// =============================================================================
// Labels
// =============================================================================

/// Ordered, unique dimension names, outermost to innermost.
///
/// The spatial axes `y`, `x` come last, optionally followed by the hidden
/// interleave axis `_c` for RGB(A)-like pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Labels(Vec<String>);

impl Labels {
    /// Create labels, rejecting duplicates.
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self, SourceError> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(SourceError::MalformedMetadata(format!(
                    "duplicate dimension label {:?} in {:?}",
                    name, names
                )));
            }
        }
        Ok(Labels(names))
    }

    /// The `t, c, z, y, x` convention used when a store carries no axis names.
    pub fn tczyx() -> Self {
        Labels(["t", "c", "z", "y", "x"].map(String::from).to_vec())
    }

    /// Labels implied by a dimension order, with `_c` appended if interleaved.
    pub fn from_order(order: DimensionOrder, interleaved: bool) -> Self {
        let mut names: Vec<String> = order.labels().iter().map(|s| s.to_string()).collect();
        if interleaved {
            names.push(INTERLEAVE_LABEL.to_string());
        }
        Labels(names)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Position of a label.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|l| l == name)
    }

    /// True when the innermost axis is the hidden samples axis.
    pub fn is_interleaved(&self) -> bool {
        self.0.last().is_some_and(|l| l == INTERLEAVE_LABEL)
    }

    /// Resolve a selection into one index per label.
    ///
    /// Named selections fill unspecified axes with 0 and reject names that
    /// are not labels. Positional selections pass through but must have one
    /// entry per label.
    pub fn resolve(&self, selection: &Selection) -> Result<Vec<u32>, SourceError> {
        match selection {
            Selection::Named(map) => {
                let mut indices = vec![0u32; self.0.len()];
                for (name, &index) in map {
                    let pos = self.position(name).ok_or_else(|| SourceError::UnknownDimension {
                        name: name.clone(),
                        labels: self.0.clone(),
                    })?;
                    indices[pos] = index;
                }
                Ok(indices)
            }
            Selection::Positional(indices) => {
                if indices.len() != self.0.len() {
                    return Err(SourceError::InvalidSelection(format!(
                        "positional selection has {} entries, labels {:?} need {}",
                        indices.len(),
                        self.0,
                        self.0.len()
                    )));
                }
                Ok(indices.clone())
            }
        }
    }

    /// Resolve a selection and check every non-spatial index against `shape`.
    pub fn resolve_within(
        &self,
        selection: &Selection,
        shape: &[u32],
    ) -> Result<Vec<u32>, SourceError> {
        let indices = self.resolve(selection)?;
        for ((label, &index), &extent) in self.0.iter().zip(&indices).zip(shape) {
            if matches!(label.as_str(), "x" | "y" | INTERLEAVE_LABEL) {
                continue;
            }
            if index >= extent {
                return Err(SourceError::InvalidSelection(format!(
                    "index {} on {:?} is outside extent {}",
                    index, label, extent
                )));
            }
        }
        Ok(indices)
    }
}

impl TryFrom<Vec<String>> for Labels {
    type Error = SourceError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Labels::new(names)
    }
}

impl From<Labels> for Vec<String> {
    fn from(labels: Labels) -> Self {
        labels.0
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

// =============================================================================
// Plane coordinates
// =============================================================================

/// One of the three non-spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneAxis {
    T,
    C,
    Z,
}

impl PlaneAxis {
    pub const fn label(self) -> &'static str {
        match self {
            PlaneAxis::T => "t",
            PlaneAxis::C => "c",
            PlaneAxis::Z => "z",
        }
    }
}

/// A `(t, c, z)` plane key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PlaneCoord {
    pub t: u32,
    pub c: u32,
    pub z: u32,
}

impl PlaneCoord {
    pub const fn new(t: u32, c: u32, z: u32) -> Self {
        Self { t, c, z }
    }

    /// Pick `t`, `c`, `z` out of a resolved index vector; absent axes are 0.
    pub fn from_indices(labels: &Labels, indices: &[u32]) -> Self {
        let at = |name: &str| {
            labels
                .position(name)
                .and_then(|pos| indices.get(pos).copied())
                .unwrap_or(0)
        };
        Self::new(at("t"), at("c"), at("z"))
    }

    #[inline]
    pub fn get(&self, axis: PlaneAxis) -> u32 {
        match axis {
            PlaneAxis::T => self.t,
            PlaneAxis::C => self.c,
            PlaneAxis::Z => self.z,
        }
    }

    #[inline]
    fn set(&mut self, axis: PlaneAxis, value: u32) {
        match axis {
            PlaneAxis::T => self.t = value,
            PlaneAxis::C => self.c = value,
            PlaneAxis::Z => self.z = value,
        }
    }
}

impl fmt::Display for PlaneCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}, c={}, z={}", self.t, self.c, self.z)
    }
}

/// Extents of the three non-spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneSizes {
    pub t: u32,
    pub c: u32,
    pub z: u32,
}

impl PlaneSizes {
    pub const fn new(t: u32, c: u32, z: u32) -> Self {
        Self { t, c, z }
    }

    #[inline]
    pub fn get(&self, axis: PlaneAxis) -> u32 {
        match axis {
            PlaneAxis::T => self.t,
            PlaneAxis::C => self.c,
            PlaneAxis::Z => self.z,
        }
    }

    /// Number of planes, `T * C * Z`.
    pub fn plane_count(&self) -> u64 {
        self.t as u64 * self.c as u64 * self.z as u64
    }

    pub fn contains(&self, coord: PlaneCoord) -> bool {
        coord.t < self.t && coord.c < self.c && coord.z < self.z
    }

    /// Every coordinate in `[0,T) x [0,C) x [0,Z)`.
    pub fn iter(&self) -> impl Iterator<Item = PlaneCoord> + '_ {
        (0..self.t).flat_map(move |t| {
            (0..self.c).flat_map(move |c| (0..self.z).map(move |z| PlaneCoord::new(t, c, z)))
        })
    }
}

// =============================================================================
// DimensionOrder
// =============================================================================

/// The six permutations of `XY{Z,C,T}` allowed by OME.
///
/// Read left to right the order runs innermost to outermost, so `XYZCT`
/// stores all Z planes of a channel before moving to the next channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DimensionOrder {
    Xyzct,
    Xyztc,
    Xyctz,
    Xyczt,
    Xytcz,
    Xytzc,
}

impl DimensionOrder {
    pub const ALL: [DimensionOrder; 6] = [
        DimensionOrder::Xyzct,
        DimensionOrder::Xyztc,
        DimensionOrder::Xyctz,
        DimensionOrder::Xyczt,
        DimensionOrder::Xytcz,
        DimensionOrder::Xytzc,
    ];

    /// Parse an order string such as `"XYZCT"` (case-insensitive).
    pub fn parse(value: &str) -> Result<Self, ManifestError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "XYZCT" => Ok(DimensionOrder::Xyzct),
            "XYZTC" => Ok(DimensionOrder::Xyztc),
            "XYCTZ" => Ok(DimensionOrder::Xyctz),
            "XYCZT" => Ok(DimensionOrder::Xyczt),
            "XYTCZ" => Ok(DimensionOrder::Xytcz),
            "XYTZC" => Ok(DimensionOrder::Xytzc),
            _ => Err(ManifestError::UnsupportedDimensionOrder(value.to_string())),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DimensionOrder::Xyzct => "XYZCT",
            DimensionOrder::Xyztc => "XYZTC",
            DimensionOrder::Xyctz => "XYCTZ",
            DimensionOrder::Xyczt => "XYCZT",
            DimensionOrder::Xytcz => "XYTCZ",
            DimensionOrder::Xytzc => "XYTZC",
        }
    }

    /// Non-spatial axes, innermost first.
    pub const fn plane_axes(self) -> [PlaneAxis; 3] {
        use PlaneAxis::{C, T, Z};
        match self {
            DimensionOrder::Xyzct => [Z, C, T],
            DimensionOrder::Xyztc => [Z, T, C],
            DimensionOrder::Xyctz => [C, T, Z],
            DimensionOrder::Xyczt => [C, Z, T],
            DimensionOrder::Xytcz => [T, C, Z],
            DimensionOrder::Xytzc => [T, Z, C],
        }
    }

    /// Labels outermost first: the order string reversed and lower-cased.
    pub fn labels(self) -> [&'static str; 5] {
        let [inner, middle, outer] = self.plane_axes();
        [outer.label(), middle.label(), inner.label(), "y", "x"]
    }

    /// Linear plane index of `coord` in a file written in this order.
    ///
    /// `index = a0 + S(a0) * (a1 + S(a1) * a2)` with `a0` the innermost axis.
    pub fn plane_index(self, coord: PlaneCoord, sizes: PlaneSizes) -> u64 {
        let [a0, a1, a2] = self.plane_axes();
        let (s0, s1) = (sizes.get(a0) as u64, sizes.get(a1) as u64);
        coord.get(a0) as u64 + s0 * (coord.get(a1) as u64 + s1 * coord.get(a2) as u64)
    }

    /// Inverse of [`plane_index`](Self::plane_index).
    pub fn plane_coord(self, index: u64, sizes: PlaneSizes) -> PlaneCoord {
        let [a0, a1, a2] = self.plane_axes();
        let (s0, s1) = (sizes.get(a0).max(1) as u64, sizes.get(a1).max(1) as u64);
        let mut coord = PlaneCoord::default();
        coord.set(a0, (index % s0) as u32);
        coord.set(a1, ((index / s0) % s1) as u32);
        coord.set(a2, (index / (s0 * s1)) as u32);
        coord
    }
}

impl fmt::Display for DimensionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DimensionOrder {
    type Error = ManifestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DimensionOrder::parse(&value)
    }
}

impl From<DimensionOrder> for String {
    fn from(order: DimensionOrder) -> Self {
        order.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels(names: &[&str]) -> Labels {
        Labels::new(names.iter().copied()).unwrap()
    }

    #[test]
    fn test_resolve_fills_zeros() {
        let l = labels(&["t", "c", "z", "y", "x"]);
        let sel = Selection::new().with("c", 2);
        assert_eq!(l.resolve(&sel).unwrap(), vec![0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_resolve_is_order_independent() {
        let l = labels(&["c", "t", "z", "y", "x"]);
        let a: Selection = [("z", 4), ("t", 1)].into_iter().collect();
        let b = Selection::new().with("t", 1).with("z", 4);
        assert_eq!(l.resolve(&a).unwrap(), l.resolve(&b).unwrap());
        assert_eq!(l.resolve(&a).unwrap(), vec![0, 1, 4, 0, 0]);
    }

    #[test]
    fn test_resolve_unknown_dimension() {
        let l = labels(&["c", "y", "x"]);
        let err = l.resolve(&Selection::new().with("t", 1)).unwrap_err();
        assert!(matches!(err, SourceError::UnknownDimension { ref name, .. } if name == "t"));
    }

    #[test]
    fn test_positional_pass_through() {
        let l = labels(&["t", "c", "z", "y", "x"]);
        let sel = Selection::positional(vec![1, 2, 3, 0, 0]);
        assert_eq!(l.resolve(&sel).unwrap(), vec![1, 2, 3, 0, 0]);

        let short = Selection::positional(vec![1, 2]);
        assert!(matches!(
            l.resolve(&short),
            Err(SourceError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_resolve_within_checks_extents() {
        let l = labels(&["t", "c", "z", "y", "x"]);
        let shape = [1, 3, 2, 512, 512];
        assert!(l.resolve_within(&Selection::tcz(0, 2, 1), &shape).is_ok());
        assert!(matches!(
            l.resolve_within(&Selection::tcz(0, 3, 0), &shape),
            Err(SourceError::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        assert!(Labels::new(["c", "c", "y", "x"]).is_err());
    }

    #[test]
    fn test_selection_json() {
        let sel: Selection = serde_json::from_str(r#"{"t": 0, "c": 2, "z": 5}"#).unwrap();
        assert_eq!(sel, Selection::tcz(0, 2, 5));

        let pos: Selection = serde_json::from_str("[0, 1, 0, 0, 0]").unwrap();
        assert_eq!(pos, Selection::positional(vec![0, 1, 0, 0, 0]));
    }

    #[test]
    fn test_order_labels() {
        assert_eq!(DimensionOrder::Xyzct.labels(), ["t", "c", "z", "y", "x"]);
        assert_eq!(DimensionOrder::Xyctz.labels(), ["z", "t", "c", "y", "x"]);
        let l = Labels::from_order(DimensionOrder::Xyczt, true);
        assert_eq!(l.as_slice(), ["t", "z", "c", "y", "x", "_c"]);
        assert!(l.is_interleaved());
    }

    #[test]
    fn test_order_parse() {
        assert_eq!(DimensionOrder::parse("xytzc").unwrap(), DimensionOrder::Xytzc);
        assert!(matches!(
            DimensionOrder::parse("XYZCTQ"),
            Err(ManifestError::UnsupportedDimensionOrder(_))
        ));
        assert!(DimensionOrder::parse("ZCTXY").is_err());
    }

    #[test]
    fn test_xyzct_index_matches_closed_form() {
        let sizes = PlaneSizes::new(2, 3, 4);
        let coord = PlaneCoord::new(1, 2, 3);
        // z + Z*c + Z*C*t
        assert_eq!(
            DimensionOrder::Xyzct.plane_index(coord, sizes),
            3 + 4 * 2 + 4 * 3
        );
        // c + C*z + C*Z*t
        assert_eq!(
            DimensionOrder::Xyczt.plane_index(coord, sizes),
            2 + 3 * 3 + 3 * 4
        );
    }

    #[test]
    fn test_plane_index_bijection_for_all_orders() {
        let sizes = PlaneSizes::new(3, 2, 5);
        for order in DimensionOrder::ALL {
            let mut seen = HashSet::new();
            for coord in sizes.iter() {
                let index = order.plane_index(coord, sizes);
                assert!(index < sizes.plane_count(), "{order}: {index} out of range");
                assert!(seen.insert(index), "{order}: {index} hit twice");
                assert_eq!(order.plane_coord(index, sizes), coord);
            }
            assert_eq!(seen.len() as u64, sizes.plane_count());
        }
    }
}
