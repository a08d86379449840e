//! Cache change notifications.

use crate::coord::TileKey;
use crate::tile::DataTile;
use std::sync::Arc;

/// Emitted whenever the ring cache gains or loses a tile.
///
/// Consumers mirror these events into their own scene state; the
/// sequence of events always reflects cache mutations in order.
#[derive(Debug, Clone)]
pub enum TileEvent<P> {
    /// A tile finished loading and entered the cache.
    Added {
        key: TileKey,
        tile: Arc<DataTile<P>>,
    },
    /// A tile left the ring and was evicted.
    Removed { key: TileKey },
}

impl<P> TileEvent<P> {
    /// Key of the tile this event concerns.
    pub fn key(&self) -> &TileKey {
        match self {
            TileEvent::Added { key, .. } => key,
            TileEvent::Removed { key } => key,
        }
    }
}
