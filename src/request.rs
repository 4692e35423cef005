//! Outbound request value.

use crate::{ClientError, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Producer of streaming upload chunks. Re-invoked for every attempt so
/// retried calls can replay the upload from the start.
pub type ChunkProducer = Arc<dyn Fn() -> BoxStream<'static, Result<Bytes>> + Send + Sync>;

/// Request body: a fixed byte sequence or a replayable chunk stream.
#[derive(Clone)]
pub enum Body {
    /// Fixed body bytes.
    Bytes(Bytes),
    /// Streaming body; the producer is invoked once per attempt.
    Streaming(ChunkProducer),
}

impl Body {
    /// Create a fixed body from bytes.
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Create a streaming body from a chunk producer.
    pub fn streaming<F>(producer: F) -> Self
    where
        F: Fn() -> BoxStream<'static, Result<Bytes>> + Send + Sync + 'static,
    {
        Self::Streaming(Arc::new(producer))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// Immutable outbound request. Method, path, query, headers, and body are
/// fixed at construction; only the authority may be replaced, producing a
/// new value via [`Request::with_authority`].
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
}

impl Request {
    /// Create a request builder.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Get the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the request body, if any.
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Logical service name encoded in the URL authority.
    pub fn service_name(&self) -> Result<&str> {
        self.url
            .host_str()
            .ok_or_else(|| ClientError::InvalidRequest("request URL has no authority".into()))
    }

    /// Return a new request identical to this one except for the authority.
    pub fn with_authority(&self, host: &str, port: u16) -> Result<Request> {
        let mut url = self.url.clone();
        url.set_host(Some(host))
            .map_err(|e| ClientError::InvalidRequest(format!("invalid authority host: {e}")))?;
        url.set_port(Some(port))
            .map_err(|_| ClientError::InvalidRequest("URL cannot carry a port".into()))?;
        Ok(Request {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

/// Builder for [`Request`] values.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    url: Option<String>,
    headers: HeaderMap,
    body: Option<Body>,
}

impl RequestBuilder {
    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the target URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Append a header. Repeated names keep their insertion order.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Merge a prepared header map.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Build the request. Fails if method or URL are absent or the URL does
    /// not parse; body is the only optional field.
    pub fn build(self) -> Result<Request> {
        let method = self
            .method
            .ok_or_else(|| ClientError::InvalidRequest("request method is required".into()))?;
        let url = self
            .url
            .ok_or_else(|| ClientError::InvalidRequest("request URL is required".into()))?;
        let url = Url::parse(&url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid request URL: {e}")))?;
        Ok(Request {
            method,
            url,
            headers: self.headers,
            body: self.body,
        })
    }
}
