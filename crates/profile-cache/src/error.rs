//! Error types for the profile cache.

use std::time::Duration;

/// Profile cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Snapshot could not be decoded (malformed, truncated or empty).
    #[error("snapshot decode error: {message}")]
    Decode { message: String },

    /// Filesystem operation failed.
    #[error("io error: {message}")]
    Io { message: String },

    /// Upstream directory lookup failed.
    #[error("upstream lookup failed: {message}")]
    Upstream { message: String },

    /// Upstream directory did not answer in time.
    #[error("upstream lookup timed out after {timeout:?}")]
    UpstreamTimeout { timeout: Duration },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl CacheError {
    /// Whether the failure came from the on-disk snapshot rather than a collaborator.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Io { .. })
    }

    /// Whether a later attempt may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Upstream { .. } | Self::UpstreamTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
