//! Transport contract and the reqwest-backed adapter.

use crate::config::ClientConfig;
use crate::request::{Body, Request};
use crate::{ClientError, Response, Result};
use async_trait::async_trait;
use futures::StreamExt;

/// The wire-level collaborator the pipeline drives. One call performs one
/// request/response exchange; retry and load balancing are layered outside.
/// Dropping the returned future releases in-flight network work.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single exchange.
    async fn execute(&self, request: Request) -> Result<Response>;
}

/// Transport backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none());

        if config.gzip {
            builder = builder.gzip(true);
        }
        if config.brotli {
            builder = builder.brotli(true);
        }

        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let mut outbound = self
            .inner
            .request(request.method().clone(), request.url().clone());

        for (name, value) in request.headers().iter() {
            outbound = outbound.header(name, value);
        }

        match request.body() {
            Some(Body::Bytes(bytes)) => {
                outbound = outbound.body(bytes.clone());
            }
            Some(Body::Streaming(producer)) => {
                outbound = outbound.body(reqwest::Body::wrap_stream(producer()));
            }
            None => {}
        }

        let response = outbound.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed();

        Ok(Response::new(status, headers, body))
    }
}
