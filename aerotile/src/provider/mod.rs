//! Tile data providers.
//!
//! A provider turns a tile coordinate into one fully-decoded payload by
//! talking to a remote endpoint. Two concrete fetchers exist: a raster
//! elevation fetcher ([`ElevationFetcher`]) and an Overpass vector
//! fetcher ([`OverpassFetcher`]). Both sit behind the same
//! [`TileFetcher`] trait so the retry and caching layers above stay
//! payload-agnostic.

mod elevation;
mod http;
mod overpass;
mod types;

pub use elevation::{decode_pixel, ElevationFetcher};
pub use http::{AsyncHttpClient, AsyncReqwestClient};
pub use overpass::OverpassFetcher;
pub use types::ProviderError;

#[cfg(test)]
pub use http::tests::MockHttpClient;

use crate::coord::TileCoord;
use crate::tile::{DataTile, TilePayload};
use std::future::Future;

/// Trait for fetching one tile's payload from a remote source.
///
/// Implementations perform the network round trip and full decode; a
/// successful return is a ready-to-use tile. Transient failures surface
/// as [`ProviderError`] and are retried by the layer above.
pub trait TileFetcher: Send + Sync + 'static {
    /// The payload kind this fetcher produces.
    type Payload: TilePayload;

    /// Fetches and decodes the tile at `coord`.
    fn fetch(
        &self,
        coord: &TileCoord,
    ) -> impl Future<Output = Result<DataTile<Self::Payload>, ProviderError>> + Send;
}
