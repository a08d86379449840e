//! Ring cache management.
//!
//! The [`RingCacheManager`] keeps a square ring of tiles centered on the
//! observer's current tile resident in memory. When the observer crosses
//! a tile boundary the manager diffs the desired ring against the cache,
//! evicts tiles that fell out, and schedules loads for tiles that came
//! in. Every mutation is published as a [`TileEvent`] so the consumer's
//! scene stays an exact mirror of the cache.
//!
//! Loads complete asynchronously; a result whose tile is no longer in
//! the desired ring by the time it arrives is discarded, never cached.

mod events;

pub use events::TileEvent;

use crate::coord::{to_tile_coord, CoordError, MercatorPos, TileCoord, TileKey};
use crate::fetch::TileLoader;
use crate::scheduler::{LoadOutcome, LoadScheduler};
use crate::tile::DataTile;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Ring shape: a fixed zoom level and a radius in tiles.
///
/// A radius of R keeps a (2R+1) by (2R+1) square centered on the
/// observer's tile, clamped at the grid edges.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub zoom: u8,
    pub radius: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { zoom: 13, radius: 2 }
    }
}

impl RingConfig {
    /// Number of tiles in an unclamped ring.
    pub fn ring_size(&self) -> usize {
        let side = 2 * self.radius as usize + 1;
        side * side
    }
}

/// Maintains the resident tile ring for one payload kind.
pub struct RingCacheManager<L: TileLoader> {
    config: RingConfig,
    scheduler: LoadScheduler<L>,
    completions: mpsc::UnboundedReceiver<LoadOutcome<L::Payload>>,
    /// Tile the observer currently occupies, if known.
    center: Option<TileCoord>,
    /// Keys the ring should contain for the current center.
    desired: HashSet<TileKey>,
    cache: HashMap<TileKey, Arc<DataTile<L::Payload>>>,
    events: mpsc::UnboundedSender<TileEvent<L::Payload>>,
    cancel: CancellationToken,
}

impl<L: TileLoader> RingCacheManager<L> {
    /// Creates a manager and the event stream its consumer subscribes to.
    pub fn new(
        config: RingConfig,
        scheduler: LoadScheduler<L>,
        completions: mpsc::UnboundedReceiver<LoadOutcome<L::Payload>>,
    ) -> (Self, mpsc::UnboundedReceiver<TileEvent<L::Payload>>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            scheduler,
            completions,
            center: None,
            desired: HashSet::new(),
            cache: HashMap::new(),
            events: events_tx,
            cancel: CancellationToken::new(),
        };
        (manager, events_rx)
    }

    /// Tiles the ring should hold around `center`, clamped to the grid.
    fn desired_ring(&self, center: &TileCoord) -> Vec<TileCoord> {
        let radius = self.config.radius;
        let max_index = (1u32 << self.config.zoom) - 1;

        let col_lo = center.col.saturating_sub(radius);
        let col_hi = center.col.saturating_add(radius).min(max_index);
        let row_lo = center.row.saturating_sub(radius);
        let row_hi = center.row.saturating_add(radius).min(max_index);

        let mut ring = Vec::with_capacity(self.config.ring_size());
        for col in col_lo..=col_hi {
            for row in row_lo..=row_hi {
                ring.push(TileCoord {
                    zoom: self.config.zoom,
                    col,
                    row,
                });
            }
        }
        ring
    }

    /// Updates the ring for a new observer position.
    ///
    /// Positions within the current center tile are a no-op, so this is
    /// safe to call at frame rate. Crossing a tile boundary triggers one
    /// reconciliation: evictions first, then load submissions.
    pub fn on_observer_moved(&mut self, position: &MercatorPos) -> Result<(), CoordError> {
        let center = to_tile_coord(position, self.config.zoom)?;
        if self.center == Some(center) {
            return Ok(());
        }

        debug!(
            from = ?self.center.map(|c| c.to_string()),
            to = %center,
            "Observer crossed tile boundary"
        );
        self.center = Some(center);
        self.reconcile(&center);
        Ok(())
    }

    /// Diffs the desired ring against the cache and acts on the gap.
    fn reconcile(&mut self, center: &TileCoord) {
        let ring = self.desired_ring(center);
        let desired: HashSet<TileKey> = ring.iter().map(TileKey::from_coord).collect();

        // Evict tiles that fell out of the ring.
        let evicted: Vec<TileKey> = self
            .cache
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in evicted {
            self.cache.remove(&key);
            trace!(key = %key, "Tile evicted from ring");
            let _ = self.events.send(TileEvent::Removed { key });
        }

        // Schedule loads for the gap. The scheduler deduplicates keys
        // already in flight from a previous reconciliation.
        let mut submitted = 0;
        for coord in &ring {
            let key = TileKey::from_coord(coord);
            if !self.cache.contains_key(&key) && self.scheduler.submit(*coord) {
                submitted += 1;
            }
        }

        self.desired = desired;
        info!(
            center = %center,
            resident = self.cache.len(),
            submitted = submitted,
            "Ring reconciled"
        );
    }

    /// Applies one finished load to the cache.
    ///
    /// Results for tiles that left the ring while loading are dropped;
    /// failed loads leave the gap open until the next reconciliation.
    pub fn handle_completion(&mut self, outcome: LoadOutcome<L::Payload>) {
        if !self.desired.contains(&outcome.key) {
            trace!(key = %outcome.key, "Discarding stale load result");
            return;
        }

        match outcome.tile {
            Some(tile) => {
                self.cache.insert(outcome.key.clone(), Arc::clone(&tile));
                let _ = self.events.send(TileEvent::Added {
                    key: outcome.key,
                    tile,
                });
            }
            None => {
                warn!(key = %outcome.key, "Tile load produced no tile");
            }
        }
    }

    /// Number of tiles currently resident.
    pub fn resident_count(&self) -> usize {
        self.cache.len()
    }

    /// Resident tile for `key`, if loaded.
    pub fn cached(&self, key: &TileKey) -> Option<&Arc<DataTile<L::Payload>>> {
        self.cache.get(key)
    }

    /// Drives the manager from a position stream until cancelled.
    ///
    /// Positions and load completions are interleaved on one task, so
    /// cache mutations are strictly ordered and the event stream mirrors
    /// them exactly.
    pub async fn run(mut self, mut positions: mpsc::Receiver<MercatorPos>) {
        info!(
            zoom = self.config.zoom,
            radius = self.config.radius,
            "Ring cache manager running"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                position = positions.recv() => match position {
                    Some(position) => {
                        if let Err(e) = self.on_observer_moved(&position) {
                            warn!(error = %e, "Ignoring invalid observer position");
                        }
                    }
                    None => break,
                },

                outcome = self.completions.recv() => match outcome {
                    Some(outcome) => self.handle_completion(outcome),
                    None => break,
                },
            }
        }

        self.dispose();
    }

    /// Handle used to stop a running manager.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Evicts everything and stops the scheduler.
    pub fn dispose(&mut self) {
        info!(resident = self.cache.len(), "Ring cache disposing");
        self.scheduler.shutdown();
        self.desired.clear();

        for (key, _) in self.cache.drain() {
            let _ = self.events.send(TileEvent::Removed { key });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ConcurrencyLimiter;
    use crate::scheduler::DEFAULT_QUEUE_TIMEOUT;
    use crate::tile::ElevationGrid;

    /// Loader that always succeeds immediately.
    struct InstantLoader;

    impl TileLoader for InstantLoader {
        type Payload = ElevationGrid;

        async fn load(&self, coord: &TileCoord) -> Option<DataTile<ElevationGrid>> {
            Some(DataTile::new(*coord, ElevationGrid::flat(0.0)))
        }
    }

    fn manager(
        config: RingConfig,
    ) -> (
        RingCacheManager<InstantLoader>,
        mpsc::UnboundedReceiver<TileEvent<ElevationGrid>>,
    ) {
        let limiter = Arc::new(ConcurrencyLimiter::new(4, "test"));
        let (scheduler, completions) =
            LoadScheduler::new(Arc::new(InstantLoader), limiter, DEFAULT_QUEUE_TIMEOUT);
        RingCacheManager::new(config, scheduler, completions)
    }

    fn drain_events(
        rx: &mut mpsc::UnboundedReceiver<TileEvent<ElevationGrid>>,
    ) -> Vec<TileEvent<ElevationGrid>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn pump<L: TileLoader>(manager: &mut RingCacheManager<L>) {
        // Let spawned load tasks run, then apply their completions.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        while let Ok(outcome) = manager.completions.try_recv() {
            manager.handle_completion(outcome);
        }
    }

    #[tokio::test]
    async fn test_ring_at_origin_is_nine_tiles() {
        let (mut manager, mut events) = manager(RingConfig { zoom: 13, radius: 1 });

        manager.on_observer_moved(&MercatorPos::new(0.0, 0.0)).unwrap();
        pump(&mut manager).await;

        assert_eq!(manager.resident_count(), 9);
        let added = drain_events(&mut events);
        assert_eq!(added.len(), 9);

        // The origin sits on the corner of tile 4096,4096; the ring is
        // the 3x3 block around it.
        for col in 4095..=4097u32 {
            for row in 4095..=4097u32 {
                let key = TileKey::from_coord(&TileCoord { zoom: 13, col, row });
                assert!(manager.cached(&key).is_some(), "missing {}", key);
            }
        }
    }

    #[tokio::test]
    async fn test_same_tile_movement_is_a_noop() {
        let (mut manager, mut events) = manager(RingConfig { zoom: 13, radius: 1 });

        manager.on_observer_moved(&MercatorPos::new(10.0, 10.0)).unwrap();
        pump(&mut manager).await;
        drain_events(&mut events);

        // A second position inside the same tile must not mutate anything.
        manager.on_observer_moved(&MercatorPos::new(20.0, 20.0)).unwrap();
        pump(&mut manager).await;

        assert!(drain_events(&mut events).is_empty());
        assert_eq!(manager.resident_count(), 9);
    }

    #[tokio::test]
    async fn test_boundary_crossing_evicts_and_loads() {
        let zoom = 13u8;
        let tile_width = crate::coord::HALF_EXTENT * 2.0 / (1u64 << zoom) as f64;
        let (mut manager, mut events) = manager(RingConfig { zoom, radius: 1 });

        manager.on_observer_moved(&MercatorPos::new(10.0, 10.0)).unwrap();
        pump(&mut manager).await;
        drain_events(&mut events);

        // Step one tile east.
        manager
            .on_observer_moved(&MercatorPos::new(10.0 + tile_width, 10.0))
            .unwrap();
        pump(&mut manager).await;

        let mut added = 0;
        let mut removed = 0;
        for event in drain_events(&mut events) {
            match event {
                TileEvent::Added { .. } => added += 1,
                TileEvent::Removed { .. } => removed += 1,
            }
        }

        // One column of three leaves, one column of three arrives.
        assert_eq!(removed, 3);
        assert_eq!(added, 3);
        assert_eq!(manager.resident_count(), 9);
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let zoom = 13u8;
        let tile_width = crate::coord::HALF_EXTENT * 2.0 / (1u64 << zoom) as f64;
        let (mut manager, mut events) = manager(RingConfig { zoom, radius: 1 });

        manager.on_observer_moved(&MercatorPos::new(10.0, 10.0)).unwrap();
        // Move far away before any completion is applied; everything
        // submitted for the first center is now stale.
        manager
            .on_observer_moved(&MercatorPos::new(10.0 + 100.0 * tile_width, 10.0))
            .unwrap();

        let stale = TileCoord {
            zoom,
            col: 4096,
            row: 4096,
        };
        manager.handle_completion(LoadOutcome {
            key: TileKey::from_coord(&stale),
            coord: stale,
            tile: Some(Arc::new(DataTile::new(stale, ElevationGrid::flat(0.0)))),
        });

        assert!(manager.cached(&TileKey::from_coord(&stale)).is_none());
        assert!(drain_events(&mut events)
            .iter()
            .all(|e| !matches!(e, TileEvent::Added { key, .. } if *key == TileKey::from_coord(&stale))));
    }

    #[tokio::test]
    async fn test_ring_clamps_at_grid_corner() {
        let (mut manager, _events) = manager(RingConfig { zoom: 13, radius: 1 });

        // North-west corner of the extent.
        let pos = MercatorPos::new(
            -crate::coord::HALF_EXTENT + 1.0,
            crate::coord::HALF_EXTENT - 1.0,
        );
        manager.on_observer_moved(&pos).unwrap();
        pump(&mut manager).await;

        // Corner tile has only a 2x2 neighborhood inside the grid.
        assert_eq!(manager.resident_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_gap_until_next_reconcile() {
        struct FlakyLoader;
        impl TileLoader for FlakyLoader {
            type Payload = ElevationGrid;
            async fn load(&self, coord: &TileCoord) -> Option<DataTile<ElevationGrid>> {
                // Only the center tile ever loads.
                (coord.col == 4096 && coord.row == 4096)
                    .then(|| DataTile::new(*coord, ElevationGrid::flat(0.0)))
            }
        }

        let limiter = Arc::new(ConcurrencyLimiter::new(4, "test"));
        let (scheduler, completions) =
            LoadScheduler::new(Arc::new(FlakyLoader), limiter, DEFAULT_QUEUE_TIMEOUT);
        let (mut manager, _events) = RingCacheManager::new(
            RingConfig { zoom: 13, radius: 1 },
            scheduler,
            completions,
        );

        manager.on_observer_moved(&MercatorPos::new(10.0, 10.0)).unwrap();
        pump(&mut manager).await;

        assert_eq!(manager.resident_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_evicts_everything() {
        let (mut manager, mut events) = manager(RingConfig { zoom: 13, radius: 1 });

        manager.on_observer_moved(&MercatorPos::new(10.0, 10.0)).unwrap();
        pump(&mut manager).await;
        drain_events(&mut events);

        manager.dispose();

        assert_eq!(manager.resident_count(), 0);
        let removals = drain_events(&mut events);
        assert_eq!(removals.len(), 9);
        assert!(removals
            .iter()
            .all(|e| matches!(e, TileEvent::Removed { .. })));
    }
}
