//! Server resolution and the load-balancing decorator.

use crate::invoker::{Call, Invoker, Outcome};
use crate::{ClientError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Concrete server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Host or IP address.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl ServerAddress {
    /// Create a server address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Resolves a logical service name to a concrete endpoint. Server-list
/// management and health checking live behind this trait.
#[async_trait]
pub trait ServerResolver: Send + Sync {
    /// Pick an endpoint for the service, or fail with
    /// [`ClientError::NoAvailableServer`].
    async fn resolve(&self, service: &str) -> Result<ServerAddress>;
}

/// Endpoint selection strategy for [`StaticResolver`].
#[derive(Debug, Clone, Copy)]
pub enum BalancingStrategy {
    /// Rotate through the list.
    RoundRobin,
    /// Pick uniformly at random.
    Random,
    /// Always pick the first entry.
    First,
}

/// In-memory resolver over fixed server lists, mainly for tests and static
/// deployments.
pub struct StaticResolver {
    services: RwLock<HashMap<String, Vec<ServerAddress>>>,
    strategy: BalancingStrategy,
    round_robin_index: AtomicUsize,
}

impl StaticResolver {
    /// Create an empty resolver with the given strategy.
    pub fn new(strategy: BalancingStrategy) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// Create a round-robin resolver.
    pub fn round_robin() -> Self {
        Self::new(BalancingStrategy::RoundRobin)
    }

    /// Register the server list for a service, replacing any previous list.
    pub fn set_servers(&self, service: impl Into<String>, servers: Vec<ServerAddress>) {
        self.services.write().insert(service.into(), servers);
    }

    /// Builder-style registration.
    pub fn with_servers(self, service: impl Into<String>, servers: Vec<ServerAddress>) -> Self {
        self.set_servers(service, servers);
        self
    }
}

#[async_trait]
impl ServerResolver for StaticResolver {
    async fn resolve(&self, service: &str) -> Result<ServerAddress> {
        let services = self.services.read();
        let servers = services
            .get(service)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClientError::NoAvailableServer(service.to_string()))?;

        let server = match self.strategy {
            BalancingStrategy::RoundRobin => {
                let index = self.round_robin_index.fetch_add(1, Ordering::SeqCst);
                &servers[index % servers.len()]
            }
            BalancingStrategy::Random => {
                use rand::Rng;
                let index = rand::rng().random_range(0..servers.len());
                &servers[index]
            }
            BalancingStrategy::First => &servers[0],
        };

        Ok(server.clone())
    }
}

/// Decorator that resolves the logical service name to a concrete endpoint
/// before each attempt and rewrites the request authority. Sits inside the
/// retry layer so every attempt re-resolves.
pub struct LoadBalanceInvoker {
    inner: Arc<dyn Invoker>,
    resolver: Arc<dyn ServerResolver>,
}

impl LoadBalanceInvoker {
    /// Wrap an inner chain with a server resolver.
    pub fn new(inner: Arc<dyn Invoker>, resolver: Arc<dyn ServerResolver>) -> Self {
        Self { inner, resolver }
    }
}

#[async_trait]
impl Invoker for LoadBalanceInvoker {
    async fn invoke(&self, call: Call) -> Result<Outcome> {
        let service = call.request.service_name()?.to_string();
        let address = self.resolver.resolve(&service).await?;
        debug!(
            method = %call.descriptor.key(),
            service = %service,
            host = %address.host,
            port = address.port,
            "Resolved service endpoint"
        );
        let request = call.request.with_authority(&address.host, address.port)?;
        self.inner
            .invoke(Call::new(call.descriptor, request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_robin_rotation() {
        let resolver = StaticResolver::round_robin().with_servers(
            "users",
            vec![
                ServerAddress::new("a", 80),
                ServerAddress::new("b", 80),
            ],
        );

        assert_eq!(resolver.resolve("users").await.unwrap().host, "a");
        assert_eq!(resolver.resolve("users").await.unwrap().host, "b");
        assert_eq!(resolver.resolve("users").await.unwrap().host, "a");
    }

    #[tokio::test]
    async fn test_unknown_service_fails() {
        let resolver = StaticResolver::round_robin();
        let err = resolver.resolve("nowhere").await.unwrap_err();
        assert!(matches!(err, ClientError::NoAvailableServer(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_server_list_fails() {
        let resolver = StaticResolver::round_robin().with_servers("users", vec![]);
        let err = resolver.resolve("users").await.unwrap_err();
        assert!(matches!(err, ClientError::NoAvailableServer(_)));
    }

    #[tokio::test]
    async fn test_first_strategy() {
        let resolver = StaticResolver::new(BalancingStrategy::First).with_servers(
            "users",
            vec![
                ServerAddress::new("a", 80),
                ServerAddress::new("b", 80),
            ],
        );
        assert_eq!(resolver.resolve("users").await.unwrap().host, "a");
        assert_eq!(resolver.resolve("users").await.unwrap().host, "a");
    }
}
