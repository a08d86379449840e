//! Provider error taxonomy.

use thiserror::Error;

/// Errors from a remote tile fetch attempt.
///
/// Every variant except `RateLimited` is retried on the generic
/// exponential-backoff schedule; rate-limit responses are special-cased by
/// the retry controller.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transport failure or non-success HTTP status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint reported a rate limit (HTTP 429).
    #[error("Rate limited by remote endpoint")]
    RateLimited,

    /// Response body could not be decoded into a tile payload.
    #[error("Failed to decode tile payload: {0}")]
    Decode(String),
}

impl ProviderError {
    /// True for rate-limit responses, which get special retry handling.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}
