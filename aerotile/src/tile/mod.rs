//! Tile data model
//!
//! A [`DataTile`] is one grid cell's worth of geographic data: the tile
//! coordinate, its projected bounding rectangle, and a kind-specific
//! payload. The two payload kinds are [`ElevationGrid`] (raster elevation
//! samples) and [`FeatureCollection`] (classified vector map features).

mod elevation;
mod features;

pub use elevation::{ElevationGrid, GRID_SIZE};
pub use features::{FeatureCategory, FeatureCollection, FeatureGeometry, MapFeature};

use crate::coord::{tile_bounds, MercatorBounds, TileCoord, TileKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Marker trait for tile payload kinds.
///
/// The `KIND` string namespaces persistent storage so elevation and vector
/// entries for the same coordinate never collide.
pub trait TilePayload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable identifier for this payload kind.
    const KIND: &'static str;
}

impl TilePayload for ElevationGrid {
    const KIND: &'static str = "elevation";
}

impl TilePayload for FeatureCollection {
    const KIND: &'static str = "features";
}

/// One finished tile of geographic data.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct DataTile<P> {
    /// Grid coordinate of this tile.
    pub coord: TileCoord,
    /// Projected extent covered by this tile.
    pub bounds: MercatorBounds,
    /// Kind-specific payload.
    pub payload: P,
}

impl<P: TilePayload> DataTile<P> {
    /// Create a tile, deriving the bounds from the coordinate.
    pub fn new(coord: TileCoord, payload: P) -> Self {
        Self {
            coord,
            bounds: tile_bounds(&coord),
            payload,
        }
    }

    /// Canonical key for this tile.
    pub fn key(&self) -> TileKey {
        TileKey::from_coord(&self.coord)
    }
}
