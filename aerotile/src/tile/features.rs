//! Classified vector map features.

use serde::{Deserialize, Serialize};

/// Visual category assigned to a map feature during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureCategory {
    Building,
    Road,
    Railway,
    Water,
    Vegetation,
    Airport,
}

impl FeatureCategory {
    /// Display color for this category as RGB.
    pub fn color(&self) -> [u8; 3] {
        match self {
            FeatureCategory::Building => [158, 149, 140],
            FeatureCategory::Road => [90, 90, 94],
            FeatureCategory::Railway => [60, 54, 52],
            FeatureCategory::Water => [70, 130, 180],
            FeatureCategory::Vegetation => [88, 129, 87],
            FeatureCategory::Airport => [180, 178, 194],
        }
    }
}

/// Geometry of a map feature in geographic coordinates.
///
/// Vertices are `(latitude, longitude)` degree pairs. Polygons are closed
/// rings; the first and last vertex are the same point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureGeometry {
    Point { lat: f64, lon: f64 },
    Line { vertices: Vec<(f64, f64)> },
    Polygon { ring: Vec<(f64, f64)> },
}

/// One classified map feature inside a tile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapFeature {
    /// Upstream element id.
    pub id: i64,
    /// Visual category from tag classification.
    pub category: FeatureCategory,
    /// RGB display color derived from the category.
    pub color: [u8; 3],
    /// Geometry in lat/lon degrees.
    pub geometry: FeatureGeometry,
}

impl MapFeature {
    /// Create a feature, deriving the color from the category.
    pub fn new(id: i64, category: FeatureCategory, geometry: FeatureGeometry) -> Self {
        Self {
            id,
            category,
            color: category.color(),
            geometry,
        }
    }
}

/// The vector payload of one tile: every classified feature inside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<MapFeature>,
}

impl FeatureCollection {
    /// Number of features in the collection.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when the tile contains no classified features.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Iterator over features of one category.
    pub fn of_category(
        &self,
        category: FeatureCategory,
    ) -> impl Iterator<Item = &MapFeature> {
        self.features
            .iter()
            .filter(move |f| f.category == category)
    }
}
