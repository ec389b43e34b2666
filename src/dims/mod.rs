//! Named dimensions, selections and resolution-level geometry.
//!
//! Everything here is pure: no I/O, no caches. Every pixel source resolves
//! a caller's [`Selection`] against its [`Labels`] once, then works with the
//! dense index vector.

mod level;
mod selection;

pub use level::{prev_power_of_two, shape_at_level, tile_grid, tile_window, TileWindow};
pub use selection::{DimensionOrder, Labels, PlaneAxis, PlaneCoord, PlaneSizes, Selection};

/// Label of the hidden samples-per-pixel axis of interleaved images.
pub const INTERLEAVE_LABEL: &str = "_c";
