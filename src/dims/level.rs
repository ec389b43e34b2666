use crate::error::{TileBoundsError, TileBoundsReason};

use super::Labels;

/// Shape of pyramid level `level`, assuming 2x downsampling per level.
///
/// Only the `x` and `y` extents shrink; every other axis is unchanged.
pub fn shape_at_level(labels: &Labels, shape: &[u32], level: u32) -> Vec<u32> {
    let spatial = [labels.position("x"), labels.position("y")];
    shape
        .iter()
        .enumerate()
        .map(|(i, &extent)| {
            if spatial.contains(&Some(i)) {
                extent.checked_shr(level).unwrap_or(0)
            } else {
                extent
            }
        })
        .collect()
}

/// Largest power of two not exceeding `n` (0 for 0).
#[inline]
pub fn prev_power_of_two(n: u32) -> u32 {
    if n == 0 {
        0
    } else {
        1 << (31 - n.leading_zeros())
    }
}

/// Number of tile columns and rows covering a `width` x `height` level.
pub fn tile_grid(tile_size: u32, width: u32, height: u32) -> (u32, u32) {
    if tile_size == 0 {
        return (0, 0);
    }
    (width.div_ceil(tile_size), height.div_ceil(tile_size))
}

/// Pixel window of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileWindow {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
}

impl TileWindow {
    #[inline]
    pub fn x1(&self) -> u32 {
        self.x0 + self.width
    }

    #[inline]
    pub fn y1(&self) -> u32 {
        self.y0 + self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Compute the pixel window of tile `(x, y)` on a `width` x `height` level.
///
/// Interior tiles are `tile_size` square. Tiles in the last column (row) are
/// `width mod tile_size` wide (high), or a full `tile_size` when the extent
/// divides evenly.
pub fn tile_window(
    x: u32,
    y: u32,
    tile_size: u32,
    width: u32,
    height: u32,
) -> Result<TileWindow, TileBoundsError> {
    let fail = |reason| TileBoundsError { x, y, reason };

    if tile_size == 0 || width == 0 || height == 0 {
        return Err(fail(TileBoundsReason::ZeroSized));
    }

    let (cols, rows) = tile_grid(tile_size, width, height);
    if x >= cols || y >= rows {
        return Err(fail(TileBoundsReason::OutOfBounds));
    }

    let w = edge_extent(x, cols, tile_size, width);
    let h = edge_extent(y, rows, tile_size, height);

    Ok(TileWindow {
        x0: x * tile_size,
        y0: y * tile_size,
        width: w,
        height: h,
    })
}

#[inline]
fn edge_extent(index: u32, count: u32, tile_size: u32, extent: u32) -> u32 {
    if index == count - 1 {
        let remainder = extent % tile_size;
        if remainder == 0 {
            tile_size
        } else {
            remainder
        }
    } else {
        tile_size
    }
}
