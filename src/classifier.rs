//! Response status classification.

use crate::descriptor::MethodKey;
use crate::{ClientError, Response, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of classifying one response.
pub enum Classification {
    /// The response decodes to an error.
    Fault(ClientError),
    /// The response is success; it is handed back untouched so the body
    /// stays deliverable to the caller.
    Pass(Response),
}

/// Maps a response status to success or a decoded error.
///
/// Classifiers compose first-match-wins: the composite tries each handler in
/// registration order and uses the first whose `should_handle` returns true.
/// A classifier may buffer the response body to decode it into an error
/// value; this is acceptable only on the error path. A handler that declines
/// must return the response inside [`Classification::Pass`].
#[async_trait]
pub trait StatusClassifier: Send + Sync {
    /// Whether this classifier handles the given status.
    fn should_handle(&self, status: StatusCode) -> bool;

    /// Decode the response into an error, or pass it back as success.
    async fn classify(&self, key: &MethodKey, response: Response) -> Result<Classification>;
}

/// Default classifier: any status >= 400 becomes an [`ClientError::HttpFault`]
/// carrying status, headers, and the body buffered up to `max_body` bytes.
#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    max_body: usize,
}

impl DefaultClassifier {
    /// Create a default classifier with the given error-body buffering cap.
    pub fn new(max_body: usize) -> Self {
        Self { max_body }
    }
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[async_trait]
impl StatusClassifier for DefaultClassifier {
    fn should_handle(&self, status: StatusCode) -> bool {
        status.as_u16() >= 400
    }

    async fn classify(&self, key: &MethodKey, response: Response) -> Result<Classification> {
        let retry_after = parse_retry_after(&response);
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_bytes_capped(self.max_body).await?;
        tracing::debug!(
            method = %key,
            status = status.as_u16(),
            body_len = body.len(),
            "Classified response as HTTP fault"
        );
        Ok(Classification::Fault(ClientError::HttpFault {
            status: status.as_u16(),
            headers,
            body,
            retry_after,
        }))
    }
}

/// Parse a `Retry-After` header in delta-seconds form. HTTP-date values are
/// ignored and fall back to computed backoff.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .header(http::header::RETRY_AFTER.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Ordered list of classifiers, first-match-wins. No match means success.
pub struct CompositeClassifier {
    handlers: Vec<Arc<dyn StatusClassifier>>,
}

impl CompositeClassifier {
    /// Create a composite from handlers in registration order.
    pub fn new(handlers: Vec<Arc<dyn StatusClassifier>>) -> Self {
        Self { handlers }
    }

    /// Whether any registered handler claims this status.
    pub fn should_handle(&self, status: StatusCode) -> bool {
        self.handlers.iter().any(|h| h.should_handle(status))
    }

    /// Run the first matching handler. With no match, or when the matching
    /// handler declines, the response comes back untouched.
    pub async fn classify(&self, key: &MethodKey, response: Response) -> Result<Classification> {
        let status = response.status();
        for handler in &self.handlers {
            if handler.should_handle(status) {
                return handler.classify(key, response).await;
            }
        }
        Ok(Classification::Pass(response))
    }
}
