//! Rate-limit status oracle.
//!
//! Periodically polls the shared status endpoint of the vector-tile
//! service, caches the parsed slot report, and answers two questions for
//! the fetch path: when is the next request slot available, and is that
//! knowledge fresh enough to trust.
//!
//! The poll loop is self-rescheduling: a new poll is scheduled a fixed
//! interval after every completed poll, success or failure. A failed poll
//! never clobbers the previously cached status.

mod status;

pub use status::{parse_status, RateSlot, RateStatus};

use crate::provider::AsyncHttpClient;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Upper bound on a single slot wait, so a skewed server clock can never
/// stall the fetch path indefinitely.
const MAX_SLOT_WAIT: Duration = Duration::from_secs(60);

/// Oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Status endpoint URL.
    pub url: String,
    /// Interval between scheduled polls.
    pub poll_interval: Duration,
    /// Age below which the cached status is served without a refresh.
    pub status_ttl: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "https://overpass-api.de/api/status".to_string(),
            poll_interval: Duration::from_secs(15),
            status_ttl: Duration::from_secs(5),
        }
    }
}

struct CachedStatus {
    status: RateStatus,
    fetched_at: Instant,
}

struct OracleInner<C> {
    client: Arc<C>,
    config: OracleConfig,
    cached: Mutex<Option<CachedStatus>>,
    refreshing: AtomicBool,
}

impl<C: AsyncHttpClient> OracleInner<C> {
    /// Fetch and parse the status endpoint once.
    ///
    /// On success the cached status is overwritten; on any failure the
    /// previous cache is left untouched.
    async fn poll(&self) {
        match self.client.get(&self.config.url).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                match parse_status(&text) {
                    Some(status) => {
                        trace!(
                            slots = status.slots.len(),
                            running = status.running_queries,
                            "Rate-limit status updated"
                        );
                        let mut cached = self.cached.lock().unwrap();
                        *cached = Some(CachedStatus {
                            status,
                            fetched_at: Instant::now(),
                        });
                    }
                    None => {
                        debug!("Status report had no current time, keeping previous status");
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Status poll failed, keeping previous status");
            }
        }
    }
}

/// Cached, periodically refreshed view of the remote rate-limit state.
///
/// Cloning shares the same cache and poll loop. Dropping the last handle
/// (or calling [`StatusOracle::shutdown`]) stops the loop and aborts any
/// in-flight status fetch.
pub struct StatusOracle<C> {
    inner: Arc<OracleInner<C>>,
    cancel: CancellationToken,
}

impl<C: AsyncHttpClient> StatusOracle<C> {
    /// Create the oracle and start its poll loop.
    ///
    /// The first poll runs immediately so the cache warms before the
    /// first tile fetch; each subsequent poll is scheduled one interval
    /// after the previous one completes.
    pub fn new(client: Arc<C>, config: OracleConfig) -> Self {
        let inner = Arc::new(OracleInner {
            client,
            config,
            cached: Mutex::new(None),
            refreshing: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        // The loop holds only a weak reference so dropping the last user
        // handle tears the oracle down.
        let weak = Arc::downgrade(&inner);
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else { break };
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => {
                        debug!("Rate-limit oracle shutting down");
                        break;
                    }
                    _ = inner.poll() => {}
                }
                let poll_interval = inner.config.poll_interval;
                drop(inner);
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        });
        info!(url = %inner.config.url, "Rate-limit oracle started");

        Self { inner, cancel }
    }

    /// Returns the cached status without blocking.
    ///
    /// A status older than its TTL is still returned, but a background
    /// refresh is triggered so a later caller sees fresher data.
    pub fn status(&self) -> Option<RateStatus> {
        let (status, stale) = {
            let cached = self.inner.cached.lock().unwrap();
            match cached.as_ref() {
                Some(c) => (
                    Some(c.status.clone()),
                    c.fetched_at.elapsed() >= self.inner.config.status_ttl,
                ),
                None => (None, true),
            }
        };

        if stale {
            self.trigger_refresh();
        }
        status
    }

    /// Earliest timestamp at which a request slot is available, from the
    /// cached status.
    pub fn next_available_slot(&self) -> Option<DateTime<Utc>> {
        self.status().and_then(|s| s.next_available_slot())
    }

    /// True only if the cached status is younger than twice its TTL.
    ///
    /// This is the coarser staleness bound deciding whether to trust the
    /// oracle at all versus proceeding without rate-limit awareness.
    pub fn is_healthy(&self) -> bool {
        let cached = self.inner.cached.lock().unwrap();
        match cached.as_ref() {
            Some(c) => c.fetched_at.elapsed() < 2 * self.inner.config.status_ttl,
            None => false,
        }
    }

    /// True when any status is cached, regardless of age.
    pub fn has_cached_status(&self) -> bool {
        self.inner.cached.lock().unwrap().is_some()
    }

    /// Sleep until the next request slot opens, according to the cached
    /// status.
    ///
    /// When the oracle is unhealthy this returns immediately: proceeding
    /// without rate-limit awareness is preferred over stalling on stale
    /// knowledge. Waits are capped at [`MAX_SLOT_WAIT`].
    pub async fn wait_for_slot(&self) {
        if !self.is_healthy() {
            trace!("Oracle unhealthy, proceeding without rate-limit wait");
            return;
        }

        let wait = {
            let cached = self.inner.cached.lock().unwrap();
            let Some(c) = cached.as_ref() else { return };
            let Some(slot) = c.status.next_available_slot() else {
                return;
            };

            // The slot timestamp is relative to the server's report time;
            // subtract what has already elapsed since we fetched it.
            let until_slot = slot
                .signed_duration_since(c.status.current_time)
                .to_std()
                .unwrap_or(Duration::ZERO);
            until_slot.saturating_sub(c.fetched_at.elapsed())
        };

        if wait > Duration::ZERO {
            let wait = wait.min(MAX_SLOT_WAIT);
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for request slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Stop the poll loop and abort any in-flight status fetch.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn trigger_refresh(&self) {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // refresh already in flight
        }
        if self.cancel.is_cancelled() {
            self.inner.refreshing.store(false, Ordering::SeqCst);
            return;
        }

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = inner.poll() => {}
            }
            inner.refreshing.store(false, Ordering::SeqCst);
        });
    }
}

impl<C> Clone for StatusOracle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C> Drop for StatusOracle<C> {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockHttpClient, ProviderError};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const STATUS_TWO_SLOTS: &str = "\
Current time: 2026-08-25T14:00:39Z
Slot available after: 2026-08-25T14:01:07Z, in 28 seconds.
Slot available after: 2026-08-25T14:01:12Z, in 33 seconds.
Currently running queries (pid, space limit, time limit, start time):
";

    fn config(poll_interval: Duration, ttl: Duration) -> OracleConfig {
        OracleConfig {
            url: "http://localhost/status".to_string(),
            poll_interval,
            status_ttl: ttl,
        }
    }

    async fn settle() {
        // Let the spawned poll task run to completion.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_warms_cache() {
        let client = Arc::new(MockHttpClient::always(Ok(STATUS_TWO_SLOTS.into())));
        let oracle = StatusOracle::new(client, config(Duration::from_secs(600), Duration::from_secs(5)));
        settle().await;

        assert!(oracle.has_cached_status());
        assert!(oracle.is_healthy());

        let slot = oracle.next_available_slot().unwrap();
        assert_eq!(slot.to_rfc3339(), "2026-08-25T14:01:07+00:00");

        oracle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_keeps_previous_status() {
        let client = Arc::new(MockHttpClient::new(vec![
            Ok(STATUS_TWO_SLOTS.into()),
            Err(ProviderError::Http("HTTP 504".into())),
        ]));
        let oracle = StatusOracle::new(
            client,
            config(Duration::from_secs(10), Duration::from_secs(60)),
        );
        settle().await;
        assert!(oracle.has_cached_status());

        // Second poll fires after the interval and fails; the cache survives.
        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;

        assert!(oracle.has_cached_status());
        assert!(oracle.status().is_some());

        oracle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_report_keeps_previous_status() {
        let client = Arc::new(MockHttpClient::new(vec![
            Ok(STATUS_TWO_SLOTS.into()),
            Ok(b"no usable lines here".to_vec()),
        ]));
        let oracle = StatusOracle::new(
            client,
            config(Duration::from_secs(10), Duration::from_secs(60)),
        );
        settle().await;

        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;

        assert!(oracle.status().is_some());
        oracle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_healthy_uses_double_ttl_bound() {
        // TTL 5s, fetched at t=0; at t=11s the status is still cached but
        // the oracle must no longer report healthy.
        let client = Arc::new(MockHttpClient::always(Ok(STATUS_TWO_SLOTS.into())));
        let oracle = StatusOracle::new(
            client,
            config(Duration::from_secs(600), Duration::from_secs(5)),
        );
        settle().await;
        assert!(oracle.is_healthy());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!oracle.is_healthy());
        assert!(oracle.has_cached_status());

        oracle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fetched_is_unhealthy() {
        let client = Arc::new(MockHttpClient::always(Err(ProviderError::Http(
            "connection refused".into(),
        ))));
        let oracle = StatusOracle::new(
            client,
            config(Duration::from_secs(600), Duration::from_secs(5)),
        );
        settle().await;

        assert!(!oracle.is_healthy());
        assert!(!oracle.has_cached_status());
        assert_eq!(oracle.next_available_slot(), None);

        // An unhealthy oracle never delays the fetch path.
        oracle.wait_for_slot().await;

        oracle.shutdown();
    }

    /// Client that parks every request at a gate until released.
    struct GatedClient {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    impl AsyncHttpClient for GatedClient {
        async fn get(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(STATUS_TWO_SLOTS.into())
        }

        async fn post(&self, _url: &str, _body: String) -> Result<Vec<u8>, ProviderError> {
            unreachable!("the status oracle only issues GET requests")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_status_triggers_one_background_refresh() {
        let client = Arc::new(MockHttpClient::always(Ok(STATUS_TWO_SLOTS.into())));
        let oracle = StatusOracle::new(
            Arc::clone(&client),
            config(Duration::from_secs(600), Duration::from_secs(5)),
        );
        settle().await;
        assert_eq!(client.calls(), 1);

        // A fresh status is served without touching the network.
        assert!(oracle.status().is_some());
        settle().await;
        assert_eq!(client.calls(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;

        // Past the TTL the cached status is still served, but a refresh
        // runs in the background. Back-to-back stale reads coalesce into
        // a single refresh.
        assert!(oracle.status().is_some());
        assert!(oracle.status().is_some());
        settle().await;
        assert_eq!(client.calls(), 2);

        // The refreshed cache is fresh again; no further fetches.
        assert!(oracle.status().is_some());
        settle().await;
        assert_eq!(client.calls(), 2);

        oracle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_in_flight_refresh() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(GatedClient {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let oracle = StatusOracle::new(
            Arc::clone(&client),
            config(Duration::from_secs(600), Duration::from_secs(5)),
        );

        // Let the first poll reach the gate, then release it.
        settle().await;
        gate.notify_one();
        settle().await;
        assert!(oracle.is_healthy());

        // Go stale and kick off a refresh that parks at the gate.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(oracle.status().is_some());
        settle().await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        oracle.shutdown();
        gate.notify_one();
        settle().await;

        // The aborted refresh never updated the cache: five more seconds
        // put the original fetch past the health bound. Had the refresh
        // landed, the status would only be five seconds old and healthy.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!oracle.is_healthy());
        assert!(oracle.has_cached_status());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_slot_sleeps_until_slot() {
        let client = Arc::new(MockHttpClient::always(Ok(STATUS_TWO_SLOTS.into())));
        let oracle = StatusOracle::new(
            client,
            config(Duration::from_secs(600), Duration::from_secs(600)),
        );
        settle().await;

        // Earliest slot is 28 seconds after the report's current time.
        let started = Instant::now();
        oracle.wait_for_slot().await;
        let waited = started.elapsed();

        assert!(waited >= Duration::from_secs(27), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(29), "waited {:?}", waited);

        oracle.shutdown();
    }
}
