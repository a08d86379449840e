//! High-level service facade.
//!
//! [`AerotileService`] wires the full acquisition pipeline for both
//! payload kinds: an HTTP client shared by all fetchers, a rate-limit
//! oracle for the Overpass endpoint, a persistent store, and one ring
//! cache manager per kind, each on its own task. The caller feeds it
//! observer positions and consumes two [`TileEvent`] streams.
//!
//! ```ignore
//! use aerotile::config::AerotileConfig;
//! use aerotile::coord::MercatorPos;
//! use aerotile::service::AerotileService;
//!
//! let mut service = AerotileService::start(AerotileConfig::default())?;
//! let elevation_events = service.elevation_events().unwrap();
//!
//! service.update_position(MercatorPos::new(1_200_000.0, 6_000_000.0)).await;
//! ```

use crate::config::AerotileConfig;
use crate::coord::MercatorPos;
use crate::fetch::{CachingLoader, TileLoader};
use crate::oracle::StatusOracle;
use crate::provider::{AsyncReqwestClient, ElevationFetcher, OverpassFetcher, ProviderError};
use crate::ring::{RingCacheManager, TileEvent};
use crate::scheduler::{ConcurrencyLimiter, LoadScheduler};
use crate::store::TileStore;
use crate::tile::{ElevationGrid, FeatureCollection, TilePayload};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Capacity of the observer position channels. Positions arrive at frame
/// rate but only boundary crossings matter, so a small buffer suffices.
const POSITION_CHANNEL_CAPACITY: usize = 32;

/// Errors raised while starting the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The HTTP client could not be constructed.
    #[error("Failed to initialize HTTP client: {0}")]
    Client(#[from] ProviderError),
}

/// Running acquisition pipeline for both payload kinds.
pub struct AerotileService {
    positions: mpsc::Sender<MercatorPos>,
    elevation_events: Option<mpsc::UnboundedReceiver<TileEvent<ElevationGrid>>>,
    feature_events: Option<mpsc::UnboundedReceiver<TileEvent<FeatureCollection>>>,
    oracle: StatusOracle<AsyncReqwestClient>,
    ring_cancels: Vec<CancellationToken>,
}

impl AerotileService {
    /// Starts the pipeline under the current Tokio runtime.
    pub fn start(config: AerotileConfig) -> Result<Self, ServiceError> {
        let client = Arc::new(AsyncReqwestClient::new()?);
        let oracle = StatusOracle::new(Arc::clone(&client), config.oracle().clone());

        let elevation_loader = Arc::new(CachingLoader::new(
            ElevationFetcher::new(Arc::clone(&client), config.elevation_url()),
            open_store::<ElevationGrid>(&config),
            config.retry(),
        ));
        let feature_loader = Arc::new(CachingLoader::new(
            OverpassFetcher::new(Arc::clone(&client), config.overpass_url())
                .with_oracle(oracle.clone()),
            open_store::<FeatureCollection>(&config),
            config.retry(),
        ));

        let mut ring_cancels = Vec::new();
        let (elevation_tx, elevation_events) =
            spawn_ring(&config, elevation_loader, "elevation", &mut ring_cancels);
        let (feature_tx, feature_events) =
            spawn_ring(&config, feature_loader, "features", &mut ring_cancels);

        // Fan positions out to both rings so they stay in lockstep.
        let (positions_tx, mut positions_rx) = mpsc::channel(POSITION_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(position) = positions_rx.recv().await {
                if elevation_tx.send(position).await.is_err() {
                    break;
                }
                if feature_tx.send(position).await.is_err() {
                    break;
                }
            }
            debug!("Position fan-out stopped");
        });

        info!(
            zoom = config.ring().zoom,
            radius = config.ring().radius,
            "Tile acquisition service started"
        );
        Ok(Self {
            positions: positions_tx,
            elevation_events: Some(elevation_events),
            feature_events: Some(feature_events),
            oracle,
            ring_cancels,
        })
    }

    /// Publishes a new observer position to both rings.
    ///
    /// Returns `false` after shutdown.
    pub async fn update_position(&self, position: MercatorPos) -> bool {
        self.positions.send(position).await.is_ok()
    }

    /// Takes the elevation event stream. Yields `None` after the first call.
    pub fn elevation_events(&mut self) -> Option<mpsc::UnboundedReceiver<TileEvent<ElevationGrid>>> {
        self.elevation_events.take()
    }

    /// Takes the vector feature event stream. Yields `None` after the first call.
    pub fn feature_events(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<TileEvent<FeatureCollection>>> {
        self.feature_events.take()
    }

    /// Rate-limit oracle for the Overpass endpoint, for health checks.
    pub fn oracle(&self) -> &StatusOracle<AsyncReqwestClient> {
        &self.oracle
    }

    /// Stops both rings and the oracle poll loop.
    ///
    /// Each ring evicts its resident tiles on the way down, so consumers
    /// see a `Removed` event for everything they were shown.
    pub fn shutdown(&self) {
        info!("Tile acquisition service shutting down");
        for cancel in &self.ring_cancels {
            cancel.cancel();
        }
        self.oracle.shutdown();
    }
}

/// Opens the persistent store for one payload kind, sweeping expired
/// entries in the background.
fn open_store<P: TilePayload>(config: &AerotileConfig) -> Arc<TileStore<P>> {
    let store = match config.store_root() {
        Some(root) => Arc::new(TileStore::open(root, config.store_ttl())),
        None => Arc::new(TileStore::disabled()),
    };

    let sweep = Arc::clone(&store);
    tokio::task::spawn_blocking(move || {
        sweep.cleanup_expired();
    });
    store
}

/// Builds one payload kind's scheduler and ring manager and starts it.
fn spawn_ring<L: TileLoader>(
    config: &AerotileConfig,
    loader: Arc<L>,
    label: &str,
    cancels: &mut Vec<CancellationToken>,
) -> (
    mpsc::Sender<MercatorPos>,
    mpsc::UnboundedReceiver<TileEvent<L::Payload>>,
) {
    let limiter = Arc::new(ConcurrencyLimiter::new(config.max_concurrent_loads(), label));
    let (scheduler, completions) = LoadScheduler::new(loader, limiter, config.queue_timeout());
    let (manager, events) = RingCacheManager::new(config.ring(), scheduler, completions);

    cancels.push(manager.cancellation_token());

    let (positions_tx, positions_rx) = mpsc::channel(POSITION_CHANNEL_CAPACITY);
    tokio::spawn(manager.run(positions_rx));

    (positions_tx, events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingConfig;

    #[tokio::test]
    async fn test_service_starts_and_shuts_down() {
        let config = AerotileConfig::builder()
            .ring(RingConfig { zoom: 13, radius: 1 })
            .without_store()
            .build();

        let mut service = AerotileService::start(config).expect("service should start");

        let elevation = service.elevation_events();
        assert!(elevation.is_some());
        // The stream can only be taken once.
        assert!(service.elevation_events().is_none());
        assert!(service.feature_events().is_some());

        service.shutdown();
        // Position updates fail once the fan-out is gone.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_position_updates_accepted_while_running() {
        let config = AerotileConfig::builder().without_store().build();
        let service = AerotileService::start(config).expect("service should start");

        assert!(service.update_position(MercatorPos::new(0.0, 0.0)).await);
        service.shutdown();
    }
}
