//! Persistent tile store.
//!
//! Tiles are written as one JSON file per key under a per-payload-kind
//! directory, with a time-to-live stamped into each entry. Expired
//! entries are deleted lazily when read and in bulk by
//! [`TileStore::cleanup_expired`].
//!
//! The store degrades silently: if the root directory cannot be created
//! the store stays disabled and every operation becomes a no-op, so a
//! broken disk never takes the acquisition pipeline down.

use crate::coord::TileKey;
use crate::tile::{DataTile, TilePayload};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Counters describing store activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub expirations: u64,
}

/// On-disk envelope wrapping a tile with its lifetime stamps.
///
/// Timestamps are unix seconds so entries stay valid across process
/// restarts and clock representations.
#[derive(Serialize, Deserialize)]
struct CachedEntry<P> {
    stored_at: i64,
    expires_at: i64,
    tile: DataTile<P>,
}

/// File-backed store for one payload kind.
pub struct TileStore<P: TilePayload> {
    /// Kind directory, or `None` when the store is disabled.
    dir: Option<PathBuf>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    expirations: AtomicU64,
    _payload: PhantomData<P>,
}

impl<P: TilePayload> TileStore<P> {
    /// Opens (or creates) the store rooted at `root`.
    ///
    /// Entries live under `root/<kind>/`, so stores for different payload
    /// kinds can share one root without colliding. A root that cannot be
    /// created yields a disabled store rather than an error.
    pub fn open(root: impl AsRef<Path>, ttl: Duration) -> Self {
        let dir = root.as_ref().join(P::KIND);
        let dir = match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to open tile store, persistence disabled"
                );
                None
            }
        };

        Self {
            dir,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            _payload: PhantomData,
        }
    }

    /// Creates a store that never persists anything.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            ttl: DEFAULT_TTL,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            _payload: PhantomData,
        }
    }

    /// Whether the backing directory opened successfully.
    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Activity counters since the store was opened.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// File path for a key. Colons are not portable in file names.
    fn entry_path(&self, key: &TileKey) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key.as_str().replace(':', "_"))))
    }

    /// Retrieves a tile, deleting it if the entry has expired.
    pub fn get(&self, key: &TileKey) -> Option<DataTile<P>> {
        let path = self.entry_path(key)?;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let entry: CachedEntry<P> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt store entry, removing");
                let _ = fs::remove_file(&path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.expires_at <= Utc::now().timestamp() {
            trace!(key = %key, "Store entry expired");
            let _ = fs::remove_file(&path);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.tile)
    }

    /// Persists a tile, stamping its expiry from the store TTL.
    ///
    /// Failures are logged and swallowed; the tile is still usable from
    /// memory.
    pub fn set(&self, tile: &DataTile<P>) {
        let key = tile.key();
        let Some(path) = self.entry_path(&key) else {
            return;
        };

        let now = Utc::now().timestamp();
        let entry = CachedEntry {
            stored_at: now,
            expires_at: now + self.ttl.as_secs() as i64,
            tile: tile.clone(),
        };

        match serde_json::to_vec(&entry).map(|json| fs::write(&path, json)) {
            Ok(Ok(())) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Tile persisted");
            }
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to write store entry"),
            Err(e) => warn!(key = %key, error = %e, "Failed to serialize store entry"),
        }
    }

    /// Removes a tile's entry if present.
    pub fn delete(&self, key: &TileKey) {
        if let Some(path) = self.entry_path(key) {
            let _ = fs::remove_file(path);
        }
    }

    /// Scans the kind directory and deletes every expired entry.
    ///
    /// Returns the number of entries removed. Unreadable files count as
    /// expired and are removed too.
    pub fn cleanup_expired(&self) -> usize {
        let Some(dir) = &self.dir else {
            return 0;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };

        let now = Utc::now().timestamp();
        let mut removed = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let expired = match fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<CachedEntry<P>>(&bytes).ok())
            {
                Some(cached) => cached.expires_at <= now,
                None => true,
            };

            if expired && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(kind = P::KIND, removed = removed, "Expired entries cleaned up");
        }
        removed
    }
}
