//! Orchestration platform seam
//!
//! The coordinator consumes the container orchestration platform as a
//! black box: "launch N tasks of image X in region R" and "report task
//! status". The [`TaskPlatform`] trait is that seam; implementations handle
//! the actual transport (HTTP endpoint, in-memory mock for tests) while
//! presenting a unified interface to the launcher and poller.

pub mod http;
pub mod mock;

pub use http::HttpPlatform;
pub use mock::MockPlatform;

use crate::status::TaskStatus;
use async_trait::async_trait;
use thiserror::Error;

/// Platform error categories for retry and abort logic
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Rate limit exceeded (retryable with backoff)
    #[error("rate limited by orchestration platform in {region}")]
    Throttled { region: String },

    /// The platform endpoint could not be reached (retryable; fatal to the
    /// run when it holds for every region at launch time)
    #[error("orchestration platform unreachable: {message}")]
    Unavailable { message: String },

    /// The platform rejected the request or returned an unusable response
    #[error("orchestration platform error ({code}): {message}")]
    Api { code: String, message: String },
}

impl PlatformError {
    /// Check if this error is worth retrying in place
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Throttled { .. } | PlatformError::Unavailable { .. }
        )
    }

    /// Check if this error means the platform could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PlatformError::Unavailable { .. })
    }
}

/// Classify an HTTP response status from the orchestration platform
pub fn classify_http_status(status: u16, region: &str, message: String) -> PlatformError {
    match status {
        429 => PlatformError::Throttled {
            region: region.to_string(),
        },
        502 | 503 | 504 => PlatformError::Unavailable { message },
        code => PlatformError::Api {
            code: code.to_string(),
            message,
        },
    }
}

/// External orchestration platform capability
///
/// `launch` requests task executions and returns one handle per task the
/// platform accepted; it may return fewer handles than requested (regional
/// quota) without erroring. `describe` reports the current status of the
/// given handles. Neither call awaits task completion.
#[async_trait]
pub trait TaskPlatform: Send + Sync {
    /// Request `count` executions of `image` in `region`, tagged with `tags`
    async fn launch(
        &self,
        region: &str,
        image: &str,
        count: u32,
        tags: &[(String, String)],
    ) -> Result<Vec<String>, PlatformError>;

    /// Report the current status of every handle in `handles`
    async fn describe(
        &self,
        region: &str,
        handles: &[String],
    ) -> Result<Vec<(String, TaskStatus)>, PlatformError>;
}
