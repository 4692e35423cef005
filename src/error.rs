//! Client error types.

use bytes::Bytes;
use http::HeaderMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the invocation pipeline.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed call inputs. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network or protocol fault below the HTTP status level.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response completed with an error status (>= 400), decoded by the
    /// status classifier. The body is buffered up to the configured cap.
    #[error("HTTP fault: status {status}")]
    HttpFault {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: HeaderMap,
        /// Response body, truncated at the classifier's buffering cap.
        body: Bytes,
        /// Server-provided retry hint, if any.
        retry_after: Option<Duration>,
    },

    /// The server resolver produced no usable address. Never retried.
    #[error("No available server for service '{0}'")]
    NoAvailableServer(String),

    /// Retry budget exhausted; wraps the last underlying error.
    #[error("Out of retries after {attempts} attempts: {source}")]
    OutOfRetries {
        /// Total transport attempts made.
        attempts: u32,
        /// Last error observed before giving up.
        source: Box<ClientError>,
    },

    /// The circuit breaker rejected the call without attempting it.
    #[error("Circuit breaker is open, call rejected")]
    CircuitOpen,

    /// Body encoding or decoding failure.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Call against a method key that was never registered.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl ClientError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::HttpFault { status, .. } => {
                // Retry on 5xx server errors, request timeout, and rate limit
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Get the HTTP status code if this is a classified fault.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpFault { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::OutOfRetries { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Get the server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpFault { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
