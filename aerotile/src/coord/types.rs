//! Coordinate type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Half-extent of the Web Mercator projection plane in meters.
///
/// The projected world spans `[-HALF_EXTENT, HALF_EXTENT)` on both axes.
pub const HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Zoom levels supported by the tile grid.
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 22;

/// A projected observer position in Web Mercator (EPSG:3857) meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorPos {
    /// Easting in meters, 0 at the prime meridian.
    pub x: f64,
    /// Northing in meters, 0 at the equator.
    pub y: f64,
}

impl MercatorPos {
    /// Create a position from projected meters.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Integer tile-grid coordinates at a given zoom level.
///
/// Row 0 is the northernmost row, column 0 the westernmost column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level (0-22)
    pub zoom: u8,
    /// X coordinate (east-west), 0 at west
    pub col: u32,
    /// Y coordinate (north-south), 0 at north
    pub row: u32,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// Canonical string key for a tile: `"zoom:col:row"`.
///
/// `TileKey` and [`TileCoord`] are bijective: every coordinate encodes to
/// exactly one key and every well-formed key decodes back to the same
/// coordinate. Parsing an ill-formed key is a hard error, never coerced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey(String);

impl TileKey {
    /// Encode a tile coordinate as its canonical key.
    pub fn from_coord(coord: &TileCoord) -> Self {
        Self(format!("{}:{}:{}", coord.zoom, coord.col, coord.row))
    }

    /// Decode a key back into a tile coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`CoordError::InvalidKey`] if the string does not consist of
    /// exactly three colon-separated integers. A malformed key indicates an
    /// internal invariant violation, so callers should propagate the error
    /// rather than substitute a default.
    pub fn parse(&self) -> Result<TileCoord, CoordError> {
        Self::decode(&self.0)
    }

    /// Decode an arbitrary string in `"zoom:col:row"` form.
    pub fn decode(raw: &str) -> Result<TileCoord, CoordError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(CoordError::InvalidKey(raw.to_string()));
        }

        let zoom: u8 = parts[0]
            .parse()
            .map_err(|_| CoordError::InvalidKey(raw.to_string()))?;
        let col: u32 = parts[1]
            .parse()
            .map_err(|_| CoordError::InvalidKey(raw.to_string()))?;
        let row: u32 = parts[2]
            .parse()
            .map_err(|_| CoordError::InvalidKey(raw.to_string()))?;

        Ok(TileCoord { zoom, col, row })
    }

    /// The key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&TileCoord> for TileKey {
    fn from(coord: &TileCoord) -> Self {
        TileKey::from_coord(coord)
    }
}

/// Axis-aligned rectangle in projected Web Mercator meters.
///
/// The geographic extent of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MercatorBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MercatorBounds {
    /// True if the position lies inside (or on the edge of) the rectangle.
    pub fn contains(&self, pos: &MercatorPos) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.y >= self.min_y && pos.y <= self.max_y
    }

    /// Width of the rectangle in meters.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the rectangle in meters.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Position is outside the Web Mercator plane.
    #[error("Position ({x}, {y}) is outside the projected extent ±{HALF_EXTENT}")]
    OutOfExtent { x: f64, y: f64 },

    /// Zoom level is outside the valid range.
    #[error("Invalid zoom level: {0} (must be between {MIN_ZOOM} and {MAX_ZOOM})")]
    InvalidZoom(u8),

    /// Tile key is not three colon-separated integers.
    #[error("Invalid tile key: '{0}' (expected \"zoom:col:row\")")]
    InvalidKey(String),
}
