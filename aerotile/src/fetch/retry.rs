//! Retry policy for tile fetches.
//!
//! Transient fetch failures are retried with exponential backoff. A
//! rate-limit rejection is treated differently: it gets exactly one
//! retry after a fixed, longer pause, because hammering a throttled
//! endpoint with short backoffs only extends the penalty.

use crate::coord::TileCoord;
use crate::provider::TileFetcher;
use crate::tile::DataTile;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behavior for a single tile load.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total fetch attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub backoff_base: Duration,
    /// Fixed pause before the single rate-limit retry.
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry following the nth generic failure.
    fn backoff(&self, failures: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(failures)
    }
}

/// Fetches one tile under the given policy.
///
/// Returns `None` when every attempt failed; the failure is logged, not
/// propagated, so one bad tile never poisons the surrounding ring.
pub async fn load_with_retry<F: TileFetcher>(
    fetcher: &F,
    coord: &TileCoord,
    policy: &RetryPolicy,
) -> Option<DataTile<F::Payload>> {
    let mut rate_limit_retried = false;
    let mut generic_failures = 0u32;

    for attempt in 0..policy.max_attempts {
        match fetcher.fetch(coord).await {
            Ok(tile) => return Some(tile),
            Err(e) if e.is_rate_limited() => {
                // A delay is only worth paying if a retry follows it.
                if rate_limit_retried || attempt + 1 >= policy.max_attempts {
                    warn!(tile = %coord, "Rate limited with no retry left, giving up");
                    return None;
                }
                rate_limit_retried = true;
                debug!(
                    tile = %coord,
                    delay_secs = policy.rate_limit_delay.as_secs(),
                    "Rate limited, pausing before single retry"
                );
                tokio::time::sleep(policy.rate_limit_delay).await;
            }
            Err(e) => {
                if attempt + 1 >= policy.max_attempts {
                    warn!(
                        tile = %coord,
                        attempts = policy.max_attempts,
                        error = %e,
                        "Tile fetch failed after all attempts"
                    );
                    return None;
                }
                // The exponential schedule is indexed by generic failures
                // only, so a rate-limit pass does not skip the first step.
                let backoff = policy.backoff(generic_failures);
                generic_failures += 1;
                debug!(
                    tile = %coord,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Tile fetch failed, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ElevationFetcher, MockHttpClient, ProviderError};
    use crate::tile::GRID_SIZE;
    use image::RgbImage;
    use std::io::Cursor;
    use std::sync::Arc;

    fn flat_png() -> Vec<u8> {
        let img = RgbImage::new(GRID_SIZE, GRID_SIZE);
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn coord() -> TileCoord {
        TileCoord {
            zoom: 13,
            col: 4096,
            row: 4096,
        }
    }

    fn fetcher(mock: MockHttpClient) -> ElevationFetcher<MockHttpClient> {
        ElevationFetcher::new(Arc::new(mock), "http://tiles.test/{z}/{x}/{y}.png")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_does_not_sleep() {
        let fetcher = fetcher(MockHttpClient::always(Ok(flat_png())));
        let start = tokio::time::Instant::now();

        let tile = load_with_retry(&fetcher, &coord(), &RetryPolicy::default()).await;

        assert!(tile.is_some());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let fetcher = fetcher(MockHttpClient::new(vec![
            Err(ProviderError::Http("HTTP 500".into())),
            Err(ProviderError::Http("HTTP 502".into())),
            Ok(flat_png()),
        ]));
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(15),
        };
        let start = tokio::time::Instant::now();

        let tile = load_with_retry(&fetcher, &coord(), &policy).await;

        assert!(tile.is_some());
        // 500ms after the first failure, 1000ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_none_without_final_sleep() {
        let mock = MockHttpClient::always(Err(ProviderError::Http("HTTP 500".into())));
        let fetcher = ElevationFetcher::new(
            Arc::new(mock),
            "http://tiles.test/{z}/{x}/{y}.png",
        );
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(15),
        };
        let start = tokio::time::Instant::now();

        let tile = load_with_retry(&fetcher, &coord(), &policy).await;

        assert!(tile.is_none());
        // Only the two inter-attempt backoffs; no sleep after the last try.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gets_exactly_one_retry() {
        let mock = MockHttpClient::always(Err(ProviderError::RateLimited));
        let fetcher = ElevationFetcher::new(
            Arc::new(mock),
            "http://tiles.test/{z}/{x}/{y}.png",
        );
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();

        let tile = load_with_retry(&fetcher, &coord(), &policy).await;

        assert!(tile.is_none());
        assert_eq!(start.elapsed(), policy.rate_limit_delay);
        assert_eq!(fetcher_calls(&fetcher), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_on_final_attempt_fails_without_delay() {
        // No retry can follow, so the fixed pause must be skipped too.
        let mock = MockHttpClient::always(Err(ProviderError::RateLimited));
        let fetcher = ElevationFetcher::new(
            Arc::new(mock),
            "http://tiles.test/{z}/{x}/{y}.png",
        );
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let start = tokio::time::Instant::now();

        let tile = load_with_retry(&fetcher, &coord(), &policy).await;

        assert!(tile.is_none());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(fetcher_calls(&fetcher), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_restarts_at_base_after_rate_limit_pass() {
        let fetcher = fetcher(MockHttpClient::new(vec![
            Err(ProviderError::RateLimited),
            Err(ProviderError::Http("HTTP 500".into())),
            Ok(flat_png()),
        ]));
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(15),
        };
        let start = tokio::time::Instant::now();

        let tile = load_with_retry(&fetcher, &coord(), &policy).await;

        assert!(tile.is_some());
        // The rate-limit pause, then the first exponential step.
        assert_eq!(
            start.elapsed(),
            Duration::from_secs(15) + Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retry_can_succeed() {
        let fetcher = fetcher(MockHttpClient::new(vec![
            Err(ProviderError::RateLimited),
            Ok(flat_png()),
        ]));
        let policy = RetryPolicy::default();

        let tile = load_with_retry(&fetcher, &coord(), &policy).await;
        assert!(tile.is_some());
    }

    fn fetcher_calls(fetcher: &ElevationFetcher<MockHttpClient>) -> usize {
        fetcher.client().calls()
    }
}
