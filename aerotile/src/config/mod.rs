//! Service configuration types.

use crate::fetch::RetryPolicy;
use crate::oracle::OracleConfig;
use crate::ring::RingConfig;
use crate::scheduler::DEFAULT_QUEUE_TIMEOUT;
use crate::store::DEFAULT_TTL;
use std::path::PathBuf;
use std::time::Duration;

/// Default elevation tile endpoint (terrarium-encoded PNG rasters).
pub const DEFAULT_ELEVATION_URL: &str =
    "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png";

/// Default Overpass interpreter endpoint.
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Default cap on simultaneous loads per payload kind.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 4;

/// Configuration for the tile acquisition service.
///
/// # Example
///
/// ```
/// use aerotile::config::AerotileConfig;
/// use aerotile::ring::RingConfig;
///
/// let config = AerotileConfig::builder()
///     .ring(RingConfig { zoom: 13, radius: 1 })
///     .max_concurrent_loads(2)
///     .build();
///
/// assert_eq!(config.ring().radius, 1);
/// ```
#[derive(Debug, Clone)]
pub struct AerotileConfig {
    /// Elevation endpoint template with `{z}`, `{x}`, `{y}` placeholders
    elevation_url: String,
    /// Overpass interpreter endpoint
    overpass_url: String,
    /// Ring shape shared by both payload kinds
    ring: RingConfig,
    /// Cap on simultaneous loads per payload kind
    max_concurrent_loads: usize,
    /// How long a load request may wait for a slot
    queue_timeout: Duration,
    /// Persistent store root, `None` disables persistence
    store_root: Option<PathBuf>,
    /// Persistent entry lifetime
    store_ttl: Duration,
    /// Retry behavior for tile fetches
    retry: RetryPolicy,
    /// Rate-limit oracle settings for the Overpass endpoint
    oracle: OracleConfig,
}

impl AerotileConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AerotileConfigBuilder {
        AerotileConfigBuilder::default()
    }

    pub fn elevation_url(&self) -> &str {
        &self.elevation_url
    }

    pub fn overpass_url(&self) -> &str {
        &self.overpass_url
    }

    pub fn ring(&self) -> RingConfig {
        self.ring
    }

    pub fn max_concurrent_loads(&self) -> usize {
        self.max_concurrent_loads
    }

    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }

    /// Persistent store root, if persistence is enabled.
    pub fn store_root(&self) -> Option<&PathBuf> {
        self.store_root.as_ref()
    }

    pub fn store_ttl(&self) -> Duration {
        self.store_ttl
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn oracle(&self) -> &OracleConfig {
        &self.oracle
    }
}

impl Default for AerotileConfig {
    fn default() -> Self {
        AerotileConfigBuilder::default().build()
    }
}

/// Builder for [`AerotileConfig`].
#[derive(Debug, Clone, Default)]
pub struct AerotileConfigBuilder {
    elevation_url: Option<String>,
    overpass_url: Option<String>,
    ring: Option<RingConfig>,
    max_concurrent_loads: Option<usize>,
    queue_timeout: Option<Duration>,
    store_root: Option<PathBuf>,
    store_disabled: bool,
    store_ttl: Option<Duration>,
    retry: Option<RetryPolicy>,
    oracle: Option<OracleConfig>,
}

impl AerotileConfigBuilder {
    /// Set the elevation endpoint template.
    pub fn elevation_url(mut self, url: impl Into<String>) -> Self {
        self.elevation_url = Some(url.into());
        self
    }

    /// Set the Overpass interpreter endpoint.
    pub fn overpass_url(mut self, url: impl Into<String>) -> Self {
        self.overpass_url = Some(url.into());
        self
    }

    /// Set the ring shape.
    pub fn ring(mut self, ring: RingConfig) -> Self {
        self.ring = Some(ring);
        self
    }

    /// Set the cap on simultaneous loads per payload kind.
    pub fn max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = Some(max);
        self
    }

    /// Set how long a load request may wait for a slot.
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }

    /// Set the persistent store root.
    pub fn store_root(mut self, root: PathBuf) -> Self {
        self.store_root = Some(root);
        self
    }

    /// Disable persistence entirely.
    pub fn without_store(mut self) -> Self {
        self.store_disabled = true;
        self
    }

    /// Set the persistent entry lifetime.
    pub fn store_ttl(mut self, ttl: Duration) -> Self {
        self.store_ttl = Some(ttl);
        self
    }

    /// Set the retry behavior for tile fetches.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the rate-limit oracle settings.
    pub fn oracle(mut self, oracle: OracleConfig) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Build the configuration with defaults for unset values.
    ///
    /// The default store root is the platform cache directory; building
    /// with `without_store()` leaves persistence off.
    pub fn build(self) -> AerotileConfig {
        let store_root = if self.store_disabled {
            None
        } else {
            self.store_root
                .or_else(|| dirs::cache_dir().map(|dir| dir.join("aerotile")))
        };

        AerotileConfig {
            elevation_url: self
                .elevation_url
                .unwrap_or_else(|| DEFAULT_ELEVATION_URL.to_string()),
            overpass_url: self
                .overpass_url
                .unwrap_or_else(|| DEFAULT_OVERPASS_URL.to_string()),
            ring: self.ring.unwrap_or_default(),
            max_concurrent_loads: self
                .max_concurrent_loads
                .unwrap_or(DEFAULT_MAX_CONCURRENT_LOADS),
            queue_timeout: self.queue_timeout.unwrap_or(DEFAULT_QUEUE_TIMEOUT),
            store_root,
            store_ttl: self.store_ttl.unwrap_or(DEFAULT_TTL),
            retry: self.retry.unwrap_or_default(),
            oracle: self.oracle.unwrap_or_default(),
        }
    }
}
