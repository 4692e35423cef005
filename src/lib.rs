//! # Girder Client
//!
//! A typed HTTP API client core built around a composable, fully
//! asynchronous invocation pipeline. Each logical method call traverses a
//! per-method decorator chain (fallback, circuit breaker, retry with
//! backoff, load-balanced endpoint selection) down to a pluggable transport,
//! with response status classification at the transport boundary and
//! single-value vs. element-stream result adaptation on the way out.
//!
//! ## Features
//!
//! - **Retry with Backoff**: exponential backoff with cap, attempt budgets,
//!   and server `Retry-After` hints
//! - **Load Balancing**: per-attempt service-name resolution and authority
//!   rewrite behind a pluggable resolver
//! - **Circuit Breaker**: per-method breakers with half-open probing and
//!   automatic recovery
//! - **Fallback**: substitute results from an alternate implementation on
//!   failure, including open-circuit rejections
//! - **Status Classification**: composable first-match-wins mapping from
//!   status codes to typed errors
//! - **Streaming Results**: multi-valued methods decode newline-delimited
//!   elements as they arrive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use girder_client::{
//!     Arity, Client, ClientConfig, Method, MethodDescriptor, MethodKey, RequestTemplate,
//!     RetryConfig,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .timeout(Duration::from_secs(30))
//!         .retry(RetryConfig::new(3, Duration::from_millis(100)))
//!         .build();
//!
//!     let client = Client::builder(config)
//!         .register(
//!             MethodDescriptor::new(MethodKey::new("UserApi", "get"), Arity::Single),
//!             RequestTemplate::new(Method::GET, "https://api.example.com/users/1"),
//!         )
//!         .build()?;
//!
//!     let user: serde_json::Value = client
//!         .method(&MethodKey::new("UserApi", "get"))?
//!         .single()
//!         .await?;
//!
//!     println!("{user}");
//!     Ok(())
//! }
//! ```

mod circuit_breaker;
mod classifier;
mod client;
mod config;
mod descriptor;
mod error;
mod fallback;
mod invoker;
mod load_balancer;
mod pipeline;
mod reply;
mod request;
mod response;
mod retry;
mod transport;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerFactory, CircuitState,
};
pub use classifier::{Classification, CompositeClassifier, DefaultClassifier, StatusClassifier};
pub use client::{Client, ClientBuilder, MethodHandle, RequestTemplate};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use descriptor::{Arity, MethodDescriptor, MethodKey};
pub use error::{ClientError, Result};
pub use fallback::Fallback;
pub use invoker::{Call, Invoker, Outcome, Payload};
pub use load_balancer::{BalancingStrategy, ServerAddress, ServerResolver, StaticResolver};
pub use reply::{Framing, NdjsonFraming, Reply};
pub use request::{Body, ChunkProducer, Request, RequestBuilder};
pub use response::{BodyStream, Response};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{ReqwestTransport, Transport};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use girder_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::classifier::{Classification, DefaultClassifier, StatusClassifier};
    pub use crate::client::{Client, ClientBuilder, MethodHandle, RequestTemplate};
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::descriptor::{Arity, MethodDescriptor, MethodKey};
    pub use crate::error::{ClientError, Result};
    pub use crate::fallback::Fallback;
    pub use crate::load_balancer::{
        BalancingStrategy, ServerAddress, ServerResolver, StaticResolver,
    };
    pub use crate::reply::Reply;
    pub use crate::request::{Body, Request};
    pub use crate::response::Response;
    pub use crate::retry::{RetryConfig, RetryPolicy};
    pub use crate::transport::Transport;
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
