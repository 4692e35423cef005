//! Inbound response wrapper.

use crate::Result;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use std::fmt;

/// Lazy response body: a stream of chunks as the transport produces them.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// One attempt's response. Created by the terminal executor, consumed at
/// most once by the status classifier or the caller.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyStream,
}

impl Response {
    /// Create a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a response with a fixed body. Mostly useful for tests and
    /// fallback values.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let bytes = body.into();
        Self::new(status, headers, futures::stream::iter([Ok(bytes)]).boxed())
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value as a string.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Consume the response and return its chunk stream.
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Split the response into headers-side parts and the body stream.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, BodyStream) {
        (self.status, self.headers, self.body)
    }

    /// Buffer the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Buffer at most `limit` bytes of the body, discarding the remainder.
    /// Used on the error path only; success bodies stay streamable.
    pub async fn into_bytes_capped(self, limit: usize) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if buf.len() < limit {
                let room = limit - buf.len();
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
        }
        Ok(buf.freeze())
    }
}

/// Drain a body stream into a single buffer.
pub(crate) async fn drain(mut body: BodyStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_into_bytes_concatenates_chunks() {
        let chunks = vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))];
        let resp = Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            futures::stream::iter(chunks).boxed(),
        );
        assert_eq!(resp.into_bytes().await.unwrap(), Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_capped_buffering_truncates() {
        let chunks = vec![Ok(Bytes::from("aaaa")), Ok(Bytes::from("bbbb"))];
        let resp = Response::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            futures::stream::iter(chunks).boxed(),
        );
        let body = resp.into_bytes_capped(6).await.unwrap();
        assert_eq!(body, Bytes::from("aaaabb"));
    }
}
