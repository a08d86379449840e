//! Semaphore-based concurrency limiter for tile loads.
//!
//! Caps the number of simultaneous network fetches so a burst of ring
//! reconciliation never exhausts sockets or trips remote rate limits.
//! Peak tracking is kept for tuning the cap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits concurrent operations and records utilization.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    /// Label for logging, e.g. "elevation" or "features".
    label: String,
}

impl ConcurrencyLimiter {
    /// Creates a limiter allowing at most `max_concurrent` operations.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0.
    pub fn new(max_concurrent: usize, label: impl Into<String>) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be > 0");

        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_permits: max_concurrent,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            label: label.into(),
        }
    }

    /// Acquires a permit, waiting until one is available.
    ///
    /// The permit is released when dropped.
    pub async fn acquire(&self) -> ConcurrencyPermit<'_> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed unexpectedly");

        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.update_peak(current);

        ConcurrencyPermit {
            _permit: permit,
            in_flight: &self.in_flight,
        }
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    /// Current number of in-flight operations.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest concurrency observed since creation (or the last reset).
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Resets the peak counter for periodic stats windows.
    pub fn reset_peak(&self) {
        self.peak_in_flight.store(0, Ordering::Relaxed);
    }
}

/// Held for the duration of one limited operation.
pub struct ConcurrencyPermit<'a> {
    _permit: OwnedSemaphorePermit,
    in_flight: &'a AtomicUsize,
}

impl Drop for ConcurrencyPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
