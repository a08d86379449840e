//! Coordinate conversion module
//!
//! Pure conversions between projected Web Mercator positions and the
//! integer tile grid, plus the inverse mapping from tile coordinates back
//! to projected bounding rectangles.

mod types;

pub use types::{
    CoordError, MercatorBounds, MercatorPos, TileCoord, TileKey, HALF_EXTENT, MAX_ZOOM, MIN_ZOOM,
};

use std::f64::consts::PI;

/// Converts a projected position to tile coordinates.
///
/// The position is normalized into `[0, 2^zoom)` on both axes using the
/// projection's total extent, then floored to integers. Row 0 is the
/// northernmost row.
///
/// # Errors
///
/// Returns an error if the position lies outside the projected plane or the
/// zoom level is out of range.
#[inline]
pub fn to_tile_coord(pos: &MercatorPos, zoom: u8) -> Result<TileCoord, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    if !(-HALF_EXTENT..=HALF_EXTENT).contains(&pos.x)
        || !(-HALF_EXTENT..=HALF_EXTENT).contains(&pos.y)
    {
        return Err(CoordError::OutOfExtent { x: pos.x, y: pos.y });
    }

    let n = (1u32 << zoom) as f64;
    let full = 2.0 * HALF_EXTENT;

    // Normalize into [0, 1), then scale to the grid. The clamp handles the
    // single position exactly on the east/south edge of the plane.
    let norm_x = (pos.x + HALF_EXTENT) / full;
    let norm_y = (HALF_EXTENT - pos.y) / full;

    let max_index = (1u32 << zoom) - 1;
    let col = ((norm_x * n).floor() as u32).min(max_index);
    let row = ((norm_y * n).floor() as u32).min(max_index);

    Ok(TileCoord { zoom, col, row })
}

/// Returns the projected bounding rectangle covered by one tile.
///
/// Both edges of every tile are computed from the same `index / n`
/// expression, so adjacent tiles share bit-exact boundary coordinates:
/// `tile_bounds(z, x, y).max_x == tile_bounds(z, x + 1, y).min_x`.
#[inline]
pub fn tile_bounds(coord: &TileCoord) -> MercatorBounds {
    let n = (1u32 << coord.zoom) as f64;
    let full = 2.0 * HALF_EXTENT;

    let edge_x = |col: f64| col / n * full - HALF_EXTENT;
    let edge_y = |row: f64| HALF_EXTENT - row / n * full;

    MercatorBounds {
        min_x: edge_x(coord.col as f64),
        max_x: edge_x(coord.col as f64 + 1.0),
        max_y: edge_y(coord.row as f64),
        min_y: edge_y(coord.row as f64 + 1.0),
    }
}

/// Converts a projected position to geographic latitude/longitude degrees.
///
/// Used when building bounding-box queries for endpoints that speak
/// lat/lon rather than projected meters.
#[inline]
pub fn mercator_to_lat_lon(pos: &MercatorPos) -> (f64, f64) {
    let lon = pos.x / HALF_EXTENT * 180.0;
    let lat = (pos.y / HALF_EXTENT * PI).sinh().atan() * 180.0 / PI;
    (lat, lon)
}
