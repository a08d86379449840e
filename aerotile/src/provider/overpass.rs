//! Vector map-feature fetcher.
//!
//! Issues one Overpass-QL `POST` per tile, requesting bounded sets of
//! tagged elements (buildings, roads, railways, water, vegetation,
//! airports) inside the tile's lat/lon bounding box, then filters and
//! classifies the response into a [`FeatureCollection`].
//!
//! When a rate-limit oracle is attached, every fetch waits for the next
//! request slot before touching the network.

use super::http::AsyncHttpClient;
use super::types::ProviderError;
use super::TileFetcher;
use crate::coord::{mercator_to_lat_lon, tile_bounds, MercatorPos, TileCoord};
use crate::oracle::StatusOracle;
use crate::tile::{DataTile, FeatureCategory, FeatureCollection, FeatureGeometry, MapFeature};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Query timeout requested from the Overpass server, in seconds.
const QUERY_TIMEOUT_SECS: u32 = 25;

/// Raw Overpass JSON response.
#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

/// One typed element (node/way/relation) with tags and coordinates.
#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    nodes: Option<Vec<i64>>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Fetcher for classified vector map features.
pub struct OverpassFetcher<C> {
    client: Arc<C>,
    endpoint: String,
    oracle: Option<StatusOracle<C>>,
}

impl<C: AsyncHttpClient> OverpassFetcher<C> {
    /// Create a fetcher for the given interpreter endpoint.
    pub fn new(client: Arc<C>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            oracle: None,
        }
    }

    /// Attach a rate-limit oracle consulted before every request.
    pub fn with_oracle(mut self, oracle: StatusOracle<C>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Build the Overpass-QL query for one tile.
    fn build_query(coord: &TileCoord) -> String {
        let bounds = tile_bounds(coord);
        let (south, west) = mercator_to_lat_lon(&MercatorPos::new(bounds.min_x, bounds.min_y));
        let (north, east) = mercator_to_lat_lon(&MercatorPos::new(bounds.max_x, bounds.max_y));
        let bbox = format!("{south},{west},{north},{east}");

        format!(
            "[out:json][timeout:{QUERY_TIMEOUT_SECS}];\
            (\
                way[\"building\"]({bbox});\
                way[\"highway\"][\"highway\"!~\"footway|path|steps|corridor|bridleway\"]({bbox});\
                way[\"railway\"]({bbox});\
                way[\"natural\"~\"water|wetland|coastline\"]({bbox});\
                way[\"waterway\"~\"riverbank|dock|canal\"]({bbox});\
                way[\"landuse\"~\"forest|grass|meadow|reservoir|basin\"]({bbox});\
                way[\"natural\"~\"wood|scrub|grassland\"]({bbox});\
                way[\"leisure\"~\"park|golf_course|nature_reserve\"]({bbox});\
                way[\"aeroway\"]({bbox});\
            );\
            out body;\
            >;\
            out skel qt;"
        )
    }

    /// Classify a tagged element into a visual category.
    ///
    /// Returns `None` for elements outside the requested vocabulary; those
    /// are dropped from the tile.
    fn classify(tags: &HashMap<String, String>) -> Option<FeatureCategory> {
        if tags.contains_key("aeroway") {
            return Some(FeatureCategory::Airport);
        }
        if tags.contains_key("building") {
            return Some(FeatureCategory::Building);
        }
        if tags.contains_key("railway") {
            return Some(FeatureCategory::Railway);
        }
        if tags.contains_key("highway") {
            return Some(FeatureCategory::Road);
        }
        if tags.contains_key("waterway")
            || tags
                .get("natural")
                .is_some_and(|v| v == "water" || v == "wetland" || v == "coastline")
            || tags
                .get("landuse")
                .is_some_and(|v| v == "reservoir" || v == "basin")
        {
            return Some(FeatureCategory::Water);
        }
        if tags.contains_key("landuse") || tags.contains_key("leisure") || tags.contains_key("natural")
        {
            return Some(FeatureCategory::Vegetation);
        }
        None
    }

    /// Categories rendered as filled areas when their way is closed.
    fn is_area_category(category: FeatureCategory) -> bool {
        matches!(
            category,
            FeatureCategory::Building
                | FeatureCategory::Water
                | FeatureCategory::Vegetation
                | FeatureCategory::Airport
        )
    }

    /// Parse and classify an Overpass JSON body into features.
    fn parse_features(body: &[u8]) -> Result<FeatureCollection, ProviderError> {
        let response: OverpassResponse = serde_json::from_slice(body)
            .map_err(|e| ProviderError::Decode(format!("Invalid Overpass JSON: {}", e)))?;

        // First pass: index node coordinates for way assembly.
        let mut node_coords: HashMap<i64, (f64, f64)> = HashMap::new();
        for element in &response.elements {
            if element.element_type == "node" {
                if let (Some(lat), Some(lon)) = (element.lat, element.lon) {
                    node_coords.insert(element.id, (lat, lon));
                }
            }
        }

        let mut features = Vec::new();
        for element in &response.elements {
            let Some(category) = Self::classify(&element.tags) else {
                continue;
            };

            match element.element_type.as_str() {
                "node" => {
                    if let (Some(lat), Some(lon)) = (element.lat, element.lon) {
                        features.push(MapFeature::new(
                            element.id,
                            category,
                            FeatureGeometry::Point { lat, lon },
                        ));
                    }
                }
                "way" => {
                    let Some(node_ids) = &element.nodes else {
                        continue;
                    };
                    let vertices: Vec<(f64, f64)> = node_ids
                        .iter()
                        .filter_map(|id| node_coords.get(id).copied())
                        .collect();
                    if vertices.len() < 2 {
                        continue;
                    }

                    let closed = vertices.len() >= 4 && vertices.first() == vertices.last();
                    let geometry = if closed && Self::is_area_category(category) {
                        FeatureGeometry::Polygon { ring: vertices }
                    } else {
                        FeatureGeometry::Line { vertices }
                    };
                    features.push(MapFeature::new(element.id, category, geometry));
                }
                _ => {
                    // Relations are not requested; skip defensively.
                }
            }
        }

        Ok(FeatureCollection { features })
    }
}

impl<C: AsyncHttpClient> TileFetcher for OverpassFetcher<C> {
    type Payload = FeatureCollection;

    async fn fetch(&self, coord: &TileCoord) -> Result<DataTile<FeatureCollection>, ProviderError> {
        if let Some(oracle) = &self.oracle {
            oracle.wait_for_slot().await;
        }

        let query = Self::build_query(coord);
        trace!(tile = %coord, "Fetching vector tile");

        let body = self.client.post(&self.endpoint, query).await?;
        let collection = Self::parse_features(&body)?;

        debug!(
            tile = %coord,
            features = collection.len(),
            "Vector tile decoded"
        );
        Ok(DataTile::new(*coord, collection))
    }
}
