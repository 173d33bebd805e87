//! Client error types.

use http::HeaderMap;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// Errors surfaced by the client.
///
/// Every variant is `Clone` so that coalesced callers waiting on the same
/// in-flight request can observe the identical outcome.
#[derive(Debug, Clone, Error)]
pub enum HttpClientError {
    /// The server responded with a failure status.
    #[error("HTTP {status} {status_text} for {url}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        status_text: String,
        /// Final request URL.
        url: String,
        /// Response headers, kept so callers and the retry loop can read
        /// `Retry-After` and friends.
        headers: HeaderMap,
        /// Truncated response body, when one was read.
        body: Option<String>,
    },

    /// The transport failed before a complete response was received.
    #[error("Network error for {url}: {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Cause description.
        message: String,
    },

    /// The request exceeded its time budget and was cancelled by the
    /// timeout governor.
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout {
        /// Request URL.
        url: String,
        /// Budget that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// A caller-supplied token aborted the request.
    #[error("Request to {url} was cancelled")]
    Cancelled {
        /// Request URL.
        url: String,
    },

    /// Circuit breaker is open, rejecting requests.
    #[error("Circuit breaker is open, request rejected")]
    CircuitOpen,

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request building error.
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// Request body exceeds the configured limit.
    #[error("Request body of {size} bytes exceeds limit of {limit} bytes")]
    RequestTooLarge {
        /// Body size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Interceptor error.
    #[error("Interceptor error: {0}")]
    Interceptor(String),
}

impl HttpClientError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error came from an external cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Get the HTTP status code if the server responded with one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The request URL this error relates to, when known.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http { url, .. }
            | Self::Network { url, .. }
            | Self::Timeout { url, .. }
            | Self::Cancelled { url } => Some(url),
            _ => None,
        }
    }
}
