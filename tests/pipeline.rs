//! Pipeline behavior under deterministic transports: retry budgets and
//! timing, per-attempt load balancing, circuit breaking, fallback
//! substitution, and multi-valued retry semantics.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use girder_client::{
    Arity, BalancingStrategy, Call, CircuitBreakerConfig, Client, ClientConfig, ClientError,
    Fallback, HeaderMap, Method, MethodDescriptor, MethodKey, Payload, Request, RequestTemplate,
    Response, Result, RetryConfig, ServerAddress, StaticResolver, StatusCode, Transport,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted transport exchange.
enum Step {
    /// Respond with a status and a fixed body.
    Respond(u16, &'static str),
    /// Fail before any response.
    ConnectionError,
    /// Respond 200, stream the given lines, then cut the connection.
    BrokenStream(Vec<&'static str>),
    /// Respond 200 streaming the given lines to completion.
    Stream(Vec<&'static str>),
}

struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

fn lines(items: &[&'static str]) -> Vec<Result<Bytes>> {
    items
        .iter()
        .map(|s| Ok(Bytes::from(format!("{s}\n"))))
        .collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(request.url().to_string());

        let step = self
            .steps
            .lock()
            .pop_front()
            .expect("transport called more times than scripted");
        match step {
            Step::Respond(status, body) => Ok(Response::from_bytes(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                body,
            )),
            Step::ConnectionError => Err(ClientError::Transport("connection reset".into())),
            Step::BrokenStream(items) => {
                let mut chunks = lines(&items);
                chunks.push(Err(ClientError::Transport("stream cut".into())));
                Ok(Response::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    stream::iter(chunks).boxed(),
                ))
            }
            Step::Stream(items) => Ok(Response::new(
                StatusCode::OK,
                HeaderMap::new(),
                stream::iter(lines(&items)).boxed(),
            )),
        }
    }
}

fn single_key() -> MethodKey {
    MethodKey::new("UserApi", "get")
}

fn multi_key() -> MethodKey {
    MethodKey::new("UserApi", "list")
}

fn build_client(transport: Arc<ScriptedTransport>, config: ClientConfig) -> Client {
    Client::builder(config)
        .transport(transport)
        .register(
            MethodDescriptor::new(single_key(), Arity::Single),
            RequestTemplate::new(Method::GET, "http://users/api/v1/users/1?verbose=true"),
        )
        .register(
            MethodDescriptor::new(multi_key(), Arity::Multi),
            RequestTemplate::new(Method::GET, "http://users/api/v1/users"),
        )
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn retry_budget_caps_transport_attempts() {
    let transport = ScriptedTransport::new(vec![
        Step::Respond(503, "busy"),
        Step::Respond(503, "busy"),
        Step::Respond(503, "busy"),
    ]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::new(3, Duration::from_millis(100)))
        .build();
    let client = build_client(transport.clone(), config);

    let err = client
        .method(&single_key())
        .unwrap()
        .single::<serde_json::Value>()
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 3);
    match err {
        ClientError::OutOfRetries { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(source.status_code(), Some(503));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_follow_exponential_schedule() {
    let transport = ScriptedTransport::new(vec![
        Step::Respond(503, ""),
        Step::Respond(503, ""),
        Step::Respond(200, "\"ok\""),
    ]);
    let config = ClientConfig::builder()
        .retry(
            RetryConfig::new(3, Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(1000)),
        )
        .build();
    let client = build_client(transport.clone(), config);

    let start = tokio::time::Instant::now();
    let value: String = client
        .method(&single_key())
        .unwrap()
        .single()
        .await
        .unwrap();

    assert_eq!(value, "ok");
    assert_eq!(transport.calls(), 3);
    // 100ms then 150ms of backoff under a paused clock
    assert_eq!(start.elapsed(), Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_fault_fails_fast() {
    let transport = ScriptedTransport::new(vec![Step::Respond(404, "missing")]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::new(5, Duration::from_millis(100)))
        .build();
    let client = build_client(transport.clone(), config);

    let err = client
        .method(&single_key())
        .unwrap()
        .single::<serde_json::Value>()
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    assert!(matches!(err, ClientError::HttpFault { status: 404, .. }));
}

#[tokio::test(start_paused = true)]
async fn single_attempt_stop_propagates_original_error() {
    let transport = ScriptedTransport::new(vec![Step::Respond(503, "busy")]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::new(1, Duration::from_millis(100)))
        .build();
    let client = build_client(transport.clone(), config);

    let err = client
        .method(&single_key())
        .unwrap()
        .single::<serde_json::Value>()
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), 1);
    // No retry happened, so the fault is not wrapped
    assert!(matches!(err, ClientError::HttpFault { status: 503, .. }));
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_backoff_prevents_next_attempt() {
    let transport = ScriptedTransport::new(vec![
        Step::ConnectionError,
        Step::Respond(200, "\"late\""),
    ]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::new(3, Duration::from_secs(1)))
        .build();
    let client = build_client(transport.clone(), config);

    let handle = client.method(&single_key()).unwrap();
    let task = tokio::spawn(async move { handle.single::<String>().await });

    // Let the first attempt run and park in the backoff sleep
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.calls(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // Advancing well past the backoff must not produce another attempt
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn retried_attempts_resolve_to_successive_servers() {
    let transport = ScriptedTransport::new(vec![
        Step::Respond(503, "busy"),
        Step::Respond(200, "\"ok\""),
    ]);
    let resolver = StaticResolver::new(BalancingStrategy::RoundRobin).with_servers(
        "users",
        vec![
            ServerAddress::new("a.internal", 1111),
            ServerAddress::new("b.internal", 2222),
        ],
    );
    let config = ClientConfig::builder()
        .retry(RetryConfig::new(2, Duration::from_millis(10)))
        .build();
    let client = Client::builder(config)
        .transport(transport.clone())
        .resolver(Arc::new(resolver))
        .register(
            MethodDescriptor::new(single_key(), Arity::Single),
            RequestTemplate::new(Method::GET, "http://users/api/v1/users/1?verbose=true"),
        )
        .build()
        .unwrap();

    let value: String = client
        .method(&single_key())
        .unwrap()
        .single()
        .await
        .unwrap();

    assert_eq!(value, "ok");
    assert_eq!(
        transport.urls(),
        vec![
            "http://a.internal:1111/api/v1/users/1?verbose=true",
            "http://b.internal:2222/api/v1/users/1?verbose=true",
        ]
    );
}

#[tokio::test]
async fn open_circuit_rejects_without_transport_attempt() {
    let transport = ScriptedTransport::new(vec![Step::Respond(500, "boom")]);
    let config = ClientConfig::builder()
        .circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(60)))
        .build();
    let client = build_client(transport.clone(), config);
    let handle = client.method(&single_key()).unwrap();

    let err = handle.single::<serde_json::Value>().await.unwrap_err();
    assert!(matches!(err, ClientError::HttpFault { status: 500, .. }));
    assert_eq!(transport.calls(), 1);

    // Breaker is now open: rejected before the transport is touched
    let err = handle.single::<serde_json::Value>().await.unwrap_err();
    assert!(matches!(err, ClientError::CircuitOpen));
    assert_eq!(transport.calls(), 1);
}

struct CannedFallback {
    single_body: &'static str,
    multi_body: &'static str,
}

#[async_trait]
impl Fallback for CannedFallback {
    async fn handle(&self, call: &Call, _error: ClientError) -> Result<Payload> {
        let body = match call.arity() {
            Arity::Single => self.single_body,
            Arity::Multi => self.multi_body,
        };
        Ok(Payload::Full(Bytes::from_static(body.as_bytes())))
    }
}

fn canned_fallback() -> Arc<CannedFallback> {
    Arc::new(CannedFallback {
        single_body: "\"cached\"",
        multi_body: "1\n2\n",
    })
}

#[tokio::test]
async fn open_circuit_with_fallback_returns_substitute() {
    let transport = ScriptedTransport::new(vec![Step::Respond(500, "boom")]);
    let config = ClientConfig::builder()
        .circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(60)))
        .build();
    let client = Client::builder(config)
        .transport(transport.clone())
        .fallback(canned_fallback())
        .register(
            MethodDescriptor::new(single_key(), Arity::Single),
            RequestTemplate::new(Method::GET, "http://users/api/v1/users/1"),
        )
        .build()
        .unwrap();
    let handle = client.method(&single_key()).unwrap();

    // First call fails through to the fallback and opens the circuit
    let value: String = handle.single().await.unwrap();
    assert_eq!(value, "cached");
    assert_eq!(transport.calls(), 1);

    // Second call short-circuits; fallback still answers
    let value: String = handle.single().await.unwrap();
    assert_eq!(value, "cached");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn fallback_preserves_multi_arity() {
    let transport = ScriptedTransport::new(vec![Step::ConnectionError]);
    let client = Client::builder(ClientConfig::default())
        .transport(transport.clone())
        .fallback(canned_fallback())
        .register(
            MethodDescriptor::new(multi_key(), Arity::Multi),
            RequestTemplate::new(Method::GET, "http://users/api/v1/users"),
        )
        .build()
        .unwrap();

    let items: Vec<u32> = client
        .method(&multi_key())
        .unwrap()
        .stream::<u32>()
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(items, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn midstream_failure_retries_whole_call_without_duplication() {
    let transport = ScriptedTransport::new(vec![
        Step::BrokenStream(vec!["1", "2", "3"]),
        Step::Stream(vec!["4", "5", "6"]),
    ]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::new(2, Duration::from_millis(10)))
        .build();
    let client = build_client(transport.clone(), config);

    let items: Vec<u32> = client
        .method(&multi_key())
        .unwrap()
        .stream::<u32>()
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    // The failed attempt's partial elements are discarded wholesale
    assert_eq!(items, vec![4, 5, 6]);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn multi_without_retry_streams_lazily() {
    let transport = ScriptedTransport::new(vec![Step::Stream(vec!["10", "20"])]);
    let client = build_client(transport.clone(), ClientConfig::default());

    let mut elements = client
        .method(&multi_key())
        .unwrap()
        .stream::<u32>()
        .await
        .unwrap();

    assert_eq!(elements.next().await.unwrap().unwrap(), 10);
    assert_eq!(elements.next().await.unwrap().unwrap(), 20);
    assert!(elements.next().await.is_none());
}
