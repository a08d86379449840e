//! Tile loading pipeline.
//!
//! A [`TileLoader`] resolves one coordinate to a finished tile or to
//! nothing. The standard implementation, [`CachingLoader`], consults the
//! persistent store first and only goes to the network on a miss,
//! retrying under a [`RetryPolicy`] and writing successful fetches back
//! to the store.

mod retry;

pub use retry::{load_with_retry, RetryPolicy};

use crate::coord::{TileCoord, TileKey};
use crate::provider::TileFetcher;
use crate::store::TileStore;
use crate::tile::{DataTile, TilePayload};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Trait for resolving one tile coordinate to a tile.
///
/// A `None` result means the tile could not be produced; the caller
/// decides whether to re-request it later.
pub trait TileLoader: Send + Sync + 'static {
    /// The payload kind this loader produces.
    type Payload: TilePayload;

    /// Loads the tile at `coord`, from cache or network.
    fn load(
        &self,
        coord: &TileCoord,
    ) -> impl Future<Output = Option<DataTile<Self::Payload>>> + Send;
}

/// Store-backed loader wrapping a fetcher with retries.
pub struct CachingLoader<F: TileFetcher> {
    fetcher: F,
    store: Arc<TileStore<F::Payload>>,
    policy: RetryPolicy,
}

impl<F: TileFetcher> CachingLoader<F> {
    /// Creates a loader over the given fetcher and store.
    pub fn new(fetcher: F, store: Arc<TileStore<F::Payload>>, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            store,
            policy,
        }
    }
}

impl<F: TileFetcher> TileLoader for CachingLoader<F> {
    type Payload = F::Payload;

    async fn load(&self, coord: &TileCoord) -> Option<DataTile<F::Payload>> {
        let key = TileKey::from_coord(coord);

        if let Some(tile) = self.store.get(&key) {
            debug!(key = %key, "Tile served from store");
            return Some(tile);
        }

        let tile = load_with_retry(&self.fetcher, coord, &self.policy).await?;
        self.store.set(&tile);
        Some(tile)
    }
}
