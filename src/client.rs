//! Typed client façade: build-time method registration and invocation.

use crate::circuit_breaker::CircuitBreakerFactory;
use crate::classifier::{CompositeClassifier, DefaultClassifier, StatusClassifier};
use crate::config::ClientConfig;
use crate::descriptor::{Arity, MethodDescriptor, MethodKey};
use crate::fallback::Fallback;
use crate::invoker::{Call, Invoker};
use crate::load_balancer::ServerResolver;
use crate::pipeline::{self, PipelineParts};
use crate::reply::{Framing, NdjsonFraming, Reply};
use crate::request::{Body, Request};
use crate::retry::RetryPolicy;
use crate::transport::{ReqwestTransport, Transport};
use crate::{ClientError, Result};
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-method request template, supplied by the contract source and
/// consumed once at build time. The URI authority is the logical service
/// name the load balancer resolves.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    uri: String,
    headers: HeaderMap,
}

impl RequestTemplate {
    /// Create a template for a method and logical URI.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Append a template header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            self.headers.append(name, value);
        }
        self
    }
}

/// One registered method: immutable descriptor, prepared template, and the
/// assembled chain, shared across all invocations.
struct BoundMethod {
    descriptor: Arc<MethodDescriptor>,
    template: RequestTemplate,
    base_headers: HeaderMap,
    chain: Arc<dyn Invoker>,
    framing: Arc<dyn Framing>,
}

impl BoundMethod {
    fn request(&self, body: Option<Body>) -> Result<Request> {
        let mut builder = Request::builder()
            .method(self.template.method.clone())
            .url(self.template.uri.clone())
            .headers(self.base_headers.clone());
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder.build()
    }
}

/// Builder for [`Client`]: registers descriptor+template pairs and wires
/// the collaborators, then assembles one pipeline per method.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn ServerResolver>>,
    fallback: Option<Arc<dyn Fallback>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    classifiers: Vec<Arc<dyn StatusClassifier>>,
    framing: Arc<dyn Framing>,
    methods: Vec<(MethodDescriptor, RequestTemplate)>,
}

impl ClientBuilder {
    /// Create a builder with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            resolver: None,
            fallback: None,
            retry_policy: None,
            classifiers: Vec::new(),
            framing: Arc::new(NdjsonFraming),
            methods: Vec::new(),
        }
    }

    /// Replace the transport (defaults to [`ReqwestTransport`]).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the server resolver, enabling the load-balancing layer.
    pub fn resolver(mut self, resolver: Arc<dyn ServerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the fallback binding, enabling the fallback layer.
    pub fn fallback(mut self, fallback: Arc<dyn Fallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Replace the retry policy derived from the configuration.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Register a status classifier. Classifiers run in registration order,
    /// first match wins; the default >= 400 classifier always runs last.
    pub fn classifier(mut self, classifier: Arc<dyn StatusClassifier>) -> Self {
        self.classifiers.push(classifier);
        self
    }

    /// Replace the element framing used for multi-valued methods.
    pub fn framing(mut self, framing: Arc<dyn Framing>) -> Self {
        self.framing = framing;
        self
    }

    /// Register one logical method.
    pub fn register(mut self, descriptor: MethodDescriptor, template: RequestTemplate) -> Self {
        self.methods.push((descriptor, template));
        self
    }

    /// Assemble every registered method's pipeline and build the client.
    pub fn build(self) -> Result<Client> {
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        let mut classifiers = self.classifiers;
        classifiers.push(Arc::new(DefaultClassifier::new(self.config.max_error_body)));
        let classifier = Arc::new(CompositeClassifier::new(classifiers));

        let retry = self.retry_policy.or_else(|| {
            self.config
                .retry
                .clone()
                .map(|c| Arc::new(c) as Arc<dyn RetryPolicy>)
        });
        let breakers = self
            .config
            .circuit_breaker
            .clone()
            .map(|c| Arc::new(CircuitBreakerFactory::new(c)));

        let parts = PipelineParts {
            transport,
            classifier,
            resolver: self.resolver,
            retry,
            breakers,
            fallback: self.fallback,
        };

        let mut base_headers = HeaderMap::new();
        for (name, value) in &self.config.default_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                base_headers.append(name, value);
            }
        }

        let mut registry = HashMap::new();
        for (descriptor, template) in self.methods {
            let chain = pipeline::assemble(&parts, &descriptor);
            let mut headers = base_headers.clone();
            for (name, value) in template.headers.iter() {
                headers.append(name.clone(), value.clone());
            }
            let key = descriptor.key().clone();
            registry.insert(
                key,
                Arc::new(BoundMethod {
                    descriptor: Arc::new(descriptor),
                    template,
                    base_headers: headers,
                    chain,
                    framing: self.framing.clone(),
                }),
            );
        }

        Ok(Client {
            registry: Arc::new(registry),
        })
    }
}

/// Typed API client: a read-only registry of assembled per-method
/// pipelines, safe to share across concurrent calls.
#[derive(Clone)]
pub struct Client {
    registry: Arc<HashMap<MethodKey, Arc<BoundMethod>>>,
}

impl Client {
    /// Create a client builder.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Look up the handle for a registered method.
    pub fn method(&self, key: &MethodKey) -> Result<MethodHandle> {
        self.registry
            .get(key)
            .cloned()
            .map(|bound| MethodHandle { bound })
            .ok_or_else(|| ClientError::UnknownMethod(key.to_string()))
    }

    /// Registered method keys.
    pub fn methods(&self) -> impl Iterator<Item = &MethodKey> {
        self.registry.keys()
    }
}

/// Invocable handle for one logical method.
#[derive(Clone)]
pub struct MethodHandle {
    bound: Arc<BoundMethod>,
}

impl std::fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("descriptor", &self.bound.descriptor)
            .finish_non_exhaustive()
    }
}

impl MethodHandle {
    /// The method's descriptor.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.bound.descriptor
    }

    /// Drive one logical call with an optional prepared body and adapt the
    /// outcome to the declared arity.
    pub async fn invoke<T>(&self, body: Option<Body>) -> Result<Reply<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let request = self.bound.request(body)?;
        let call = Call::new(self.bound.descriptor.clone(), request);
        let outcome = self.bound.chain.invoke(call).await?;
        crate::reply::adapt(
            outcome,
            self.bound.descriptor.arity(),
            self.bound.framing.clone(),
        )
        .await
    }

    /// Invoke a single-valued method without a body.
    pub async fn single<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.require_arity(Arity::Single)?;
        self.invoke(None).await?.into_single()
    }

    /// Invoke a single-valued method with JSON-encoded arguments.
    pub async fn single_json<A, T>(&self, args: &A) -> Result<T>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.require_arity(Arity::Single)?;
        self.invoke(Some(json_body(args)?)).await?.into_single()
    }

    /// Invoke a multi-valued method without a body.
    pub async fn stream<T>(&self) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.require_arity(Arity::Multi)?;
        Ok(self.invoke(None).await?.into_stream())
    }

    /// Invoke a multi-valued method with JSON-encoded arguments.
    pub async fn stream_json<A, T>(&self, args: &A) -> Result<BoxStream<'static, Result<T>>>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.require_arity(Arity::Multi)?;
        Ok(self.invoke(Some(json_body(args)?)).await?.into_stream())
    }

    fn require_arity(&self, expected: Arity) -> Result<()> {
        let declared = self.bound.descriptor.arity();
        if declared == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidRequest(format!(
                "method {} declares {declared:?} results",
                self.bound.descriptor.key()
            )))
        }
    }
}

/// Encode arguments as a JSON body.
fn json_body<A: Serialize + ?Sized>(args: &A) -> Result<Body> {
    let bytes = serde_json::to_vec(args).map_err(|e| ClientError::Codec(e.to_string()))?;
    Ok(Body::bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Response;
    use async_trait::async_trait;
    use http::StatusCode;

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn execute(&self, request: Request) -> Result<Response> {
            let body = format!("\"{}\"", request.url());
            Ok(Response::from_bytes(StatusCode::OK, HeaderMap::new(), body))
        }
    }

    fn client() -> Client {
        Client::builder(ClientConfig::default())
            .transport(Arc::new(EchoTransport))
            .register(
                MethodDescriptor::new(MethodKey::new("UserApi", "get"), Arity::Single),
                RequestTemplate::new(Method::GET, "http://users/api/v1/users/1"),
            )
            .register(
                MethodDescriptor::new(MethodKey::new("UserApi", "list"), Arity::Multi),
                RequestTemplate::new(Method::GET, "http://users/api/v1/users"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_registered_method_invokes() {
        let client = client();
        let handle = client.method(&MethodKey::new("UserApi", "get")).unwrap();
        let value: String = handle.single().await.unwrap();
        assert_eq!(value, "http://users/api/v1/users/1");
    }

    #[tokio::test]
    async fn test_unknown_method_fails() {
        let client = client();
        let err = client
            .method(&MethodKey::new("UserApi", "missing"))
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownMethod(_)));
    }

    #[tokio::test]
    async fn test_arity_mismatch_rejected() {
        let client = client();
        let handle = client.method(&MethodKey::new("UserApi", "list")).unwrap();
        let err = handle.single::<String>().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }
}
