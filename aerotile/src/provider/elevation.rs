//! Raster elevation tile fetcher.
//!
//! Fetches PNG tiles whose pixel channels encode elevation and decodes
//! them into an [`ElevationGrid`]. The encoding is fixed:
//!
//! ```text
//! elevation = R * 256 + G + B / 256 - 32768
//! ```
//!
//! which is exact to the bit for round-trip testing.

use super::http::AsyncHttpClient;
use super::types::ProviderError;
use super::TileFetcher;
use crate::coord::TileCoord;
use crate::tile::{DataTile, ElevationGrid, GRID_SIZE};
use image::GenericImageView;
use std::sync::Arc;
use tracing::trace;

/// Offset applied to the packed pixel value when decoding elevation.
const ELEVATION_OFFSET: f64 = 32_768.0;

/// Decode one pixel's channels into an elevation in meters.
#[inline]
pub fn decode_pixel(r: u8, g: u8, b: u8) -> f64 {
    (r as f64) * 256.0 + (g as f64) + (b as f64) / 256.0 - ELEVATION_OFFSET
}

/// Fetcher for pixel-encoded elevation rasters.
///
/// The URL template uses `{z}`, `{x}` and `{y}` placeholders, e.g.
/// `https://tiles.example.com/terrain/{z}/{x}/{y}.png`.
pub struct ElevationFetcher<C> {
    client: Arc<C>,
    url_template: String,
}

impl<C: AsyncHttpClient> ElevationFetcher<C> {
    /// Create a fetcher for the given endpoint template.
    pub fn new(client: Arc<C>, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    fn tile_url(&self, coord: &TileCoord) -> String {
        self.url_template
            .replace("{z}", &coord.zoom.to_string())
            .replace("{x}", &coord.col.to_string())
            .replace("{y}", &coord.row.to_string())
    }

    /// Decode a PNG body into an elevation grid.
    fn decode_grid(bytes: &[u8]) -> Result<ElevationGrid, ProviderError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| ProviderError::Decode(format!("Invalid elevation image: {}", e)))?;

        let (width, height) = img.dimensions();
        if width != GRID_SIZE || height != GRID_SIZE {
            return Err(ProviderError::Decode(format!(
                "Unexpected raster size {}x{} (expected {}x{})",
                width, height, GRID_SIZE, GRID_SIZE
            )));
        }

        let rgba = img.to_rgba8();
        let mut samples = Vec::with_capacity((GRID_SIZE * GRID_SIZE) as usize);
        for pixel in rgba.pixels() {
            let [r, g, b, _] = pixel.0;
            samples.push(decode_pixel(r, g, b));
        }

        ElevationGrid::from_samples(samples)
            .ok_or_else(|| ProviderError::Decode("Sample count mismatch".to_string()))
    }
}

impl<C: AsyncHttpClient> TileFetcher for ElevationFetcher<C> {
    type Payload = ElevationGrid;

    async fn fetch(&self, coord: &TileCoord) -> Result<DataTile<ElevationGrid>, ProviderError> {
        let url = self.tile_url(coord);
        trace!(tile = %coord, url = %url, "Fetching elevation tile");

        let bytes = self.client.get(&url).await?;
        let grid = Self::decode_grid(&bytes)?;

        Ok(DataTile::new(*coord, grid))
    }
}
