//! Raster elevation payload.

use serde::{Deserialize, Serialize};

/// Side length of every elevation grid, in samples.
pub const GRID_SIZE: u32 = 256;

/// A fixed-size square grid of elevation samples in meters.
///
/// Samples are stored row-major, northwest corner first, matching the
/// pixel order of the source raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationGrid {
    samples: Vec<f64>,
}

impl ElevationGrid {
    /// Build a grid from row-major samples.
    ///
    /// Returns `None` unless exactly `GRID_SIZE * GRID_SIZE` samples are
    /// supplied.
    pub fn from_samples(samples: Vec<f64>) -> Option<Self> {
        if samples.len() != (GRID_SIZE * GRID_SIZE) as usize {
            return None;
        }
        Some(Self { samples })
    }

    /// A grid where every sample has the same elevation.
    pub fn flat(elevation: f64) -> Self {
        Self {
            samples: vec![elevation; (GRID_SIZE * GRID_SIZE) as usize],
        }
    }

    /// Elevation at grid position `(x, y)`, `(0, 0)` being northwest.
    ///
    /// Returns `None` when either index is outside the grid.
    pub fn sample(&self, x: u32, y: u32) -> Option<f64> {
        if x >= GRID_SIZE || y >= GRID_SIZE {
            return None;
        }
        Some(self.samples[(y * GRID_SIZE + x) as usize])
    }

    /// All samples in row-major order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Minimum and maximum elevation in the grid.
    pub fn range(&self) -> (f64, f64) {
        self.samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), &sample| (min.min(sample), max.max(sample)),
        )
    }
}
