//! Load scheduling.
//!
//! The [`LoadScheduler`] accepts tile load requests, deduplicates them
//! per key, bounds how many run at once, and streams results back on a
//! completion channel. A request that cannot start within the queue-wait
//! timeout completes with no tile rather than blocking the queue.

mod limiter;

pub use limiter::{ConcurrencyLimiter, ConcurrencyPermit};

use crate::coord::{TileCoord, TileKey};
use crate::fetch::TileLoader;
use crate::tile::DataTile;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default bound on how long a request may wait for a load slot.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one scheduled load, successful or not.
///
/// `tile` is `None` when the load failed or timed out waiting for a
/// slot; the key still identifies which request finished.
#[derive(Debug, Clone)]
pub struct LoadOutcome<P> {
    pub key: TileKey,
    pub coord: TileCoord,
    pub tile: Option<Arc<DataTile<P>>>,
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Default)]
struct StatsCounters {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Bounded, deduplicating scheduler over a [`TileLoader`].
pub struct LoadScheduler<L: TileLoader> {
    loader: Arc<L>,
    limiter: Arc<ConcurrencyLimiter>,
    queue_timeout: Duration,
    /// Keys with a load currently queued or running.
    pending: Arc<Mutex<HashSet<TileKey>>>,
    completions: mpsc::UnboundedSender<LoadOutcome<L::Payload>>,
    cancel: CancellationToken,
    stats: Arc<StatsCounters>,
}

impl<L: TileLoader> LoadScheduler<L> {
    /// Creates a scheduler and its completion channel.
    ///
    /// # Arguments
    ///
    /// * `loader` - Resolves individual tile coordinates
    /// * `limiter` - Caps simultaneous loads
    /// * `queue_timeout` - How long a request may wait for a load slot
    pub fn new(
        loader: Arc<L>,
        limiter: Arc<ConcurrencyLimiter>,
        queue_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<LoadOutcome<L::Payload>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            loader,
            limiter,
            queue_timeout,
            pending: Arc::new(Mutex::new(HashSet::new())),
            completions: tx,
            cancel: CancellationToken::new(),
            stats: Arc::new(StatsCounters::default()),
        };
        (scheduler, rx)
    }

    /// Submits a load request for `coord`.
    ///
    /// Returns `false` when a load for the same key is already queued or
    /// running; the in-flight load's result will serve both requests.
    pub fn submit(&self, coord: TileCoord) -> bool {
        let key = TileKey::from_coord(&coord);

        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            if !pending.insert(key.clone()) {
                trace!(key = %key, "Load already in flight, deduplicated");
                self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let loader = Arc::clone(&self.loader);
        let limiter = Arc::clone(&self.limiter);
        let pending = Arc::clone(&self.pending);
        let completions = self.completions.clone();
        let cancel = self.cancel.clone();
        let stats = Arc::clone(&self.stats);
        let queue_timeout = self.queue_timeout;

        tokio::spawn(async move {
            let tile = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    pending.lock().expect("pending lock poisoned").remove(&key);
                    return;
                }
                slot = timeout(queue_timeout, limiter.acquire()) => match slot {
                    Ok(_permit) => {
                        let result = loader.load(&coord).await;
                        match &result {
                            Some(_) => stats.completed.fetch_add(1, Ordering::Relaxed),
                            None => stats.failed.fetch_add(1, Ordering::Relaxed),
                        };
                        result.map(Arc::new)
                    }
                    Err(_) => {
                        warn!(
                            key = %key,
                            timeout_secs = queue_timeout.as_secs(),
                            "Load request timed out waiting for a slot"
                        );
                        stats.timed_out.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                },
            };

            // Clear the key before publishing so a re-request arriving
            // right after the completion is accepted, not deduplicated.
            pending.lock().expect("pending lock poisoned").remove(&key);
            let _ = completions.send(LoadOutcome { key, coord, tile });
        });

        true
    }

    /// Whether a load for `key` is currently queued or running.
    pub fn is_pending(&self, key: &TileKey) -> bool {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .contains(key)
    }

    /// Number of loads currently queued or running.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Snapshot of activity counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            deduplicated: self.stats.deduplicated.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Cancels queued loads. In-flight fetches finish but their results
    /// are discarded by the closed channel.
    pub fn shutdown(&self) {
        debug!("Load scheduler shutting down");
        self.cancel.cancel();
    }
}
