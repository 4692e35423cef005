//! Circuit breaker state machine, per-method factory, and decorator.

use crate::descriptor::MethodKey;
use crate::invoker::{Call, Invoker, Outcome};
use crate::{ClientError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// A limited number of probe calls are allowed.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within the window that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes needed to close the circuit.
    pub success_threshold: u32,
    /// Time an open circuit waits before admitting probes.
    pub reset_timeout: Duration,
    /// Probe budget while half-open.
    pub half_open_requests: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 3,
            failure_window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with the given threshold and reset timeout.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            ..Default::default()
        }
    }

    /// Set the success threshold to close the circuit.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the half-open probe budget.
    pub fn with_half_open_requests(mut self, count: u32) -> Self {
        self.half_open_requests = count;
        self
    }

    /// Set the failure counting window.
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }
}

/// Failure-rate gate for one logical method. Decides per call whether the
/// wrapped chain may run; the whole retry+load-balance chain counts as a
/// single unit of work.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_count: AtomicU32,
    last_failure: RwLock<Option<Instant>>,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_count: AtomicU32::new(0),
            last_failure: RwLock::new(None),
            opened_at: RwLock::new(None),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        *self.state.read()
    }

    /// Check if a call is allowed through.
    pub fn is_allowed(&self) -> bool {
        self.maybe_transition_to_half_open();

        match *self.state.read() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let count = self.half_open_count.fetch_add(1, Ordering::SeqCst);
                count < self.config.half_open_requests
            }
        }
    }

    /// Record a successful unit of work.
    pub fn record_success(&self) {
        // Copy the state out so the read guard drops before close() takes
        // the write lock.
        let state = *self.state.read();
        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {
                debug!("Success recorded while circuit open, ignoring");
            }
        }
    }

    /// Record a failed unit of work.
    pub fn record_failure(&self) {
        let now = Instant::now();

        // Copy the state out so the read guard drops before open() takes
        // the write lock.
        let state = *self.state.read();
        match state {
            CircuitState::Closed => {
                let stale = self
                    .last_failure
                    .read()
                    .map(|t| now.duration_since(t) > self.config.failure_window)
                    .unwrap_or(true);

                let failures = if stale {
                    self.failure_count.store(1, Ordering::SeqCst);
                    1
                } else {
                    self.failure_count.fetch_add(1, Ordering::SeqCst) + 1
                };
                if failures >= self.config.failure_threshold {
                    self.open();
                }

                *self.last_failure.write() = Some(now);
            }
            CircuitState::HalfOpen => {
                // Any failure while half-open reopens the circuit
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Open {
            warn!("Circuit breaker opening");
            *state = CircuitState::Open;
            *self.opened_at.write() = Some(Instant::now());
            self.half_open_count.store(0, Ordering::SeqCst);
            self.success_count.store(0, Ordering::SeqCst);
        }
    }

    fn close(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!("Circuit breaker closing");
            *state = CircuitState::Closed;
            *self.opened_at.write() = None;
            self.failure_count.store(0, Ordering::SeqCst);
            self.success_count.store(0, Ordering::SeqCst);
            self.half_open_count.store(0, Ordering::SeqCst);
        }
    }

    fn maybe_transition_to_half_open(&self) {
        if *self.state.read() != CircuitState::Open {
            return;
        }

        let elapsed = self
            .opened_at
            .read()
            .map(|t| t.elapsed() >= self.config.reset_timeout)
            .unwrap_or(false);
        if elapsed {
            let mut state = self.state.write();
            if *state == CircuitState::Open {
                debug!("Circuit breaker transitioning to half-open");
                *state = CircuitState::HalfOpen;
                self.half_open_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
            }
        }
    }

    /// Current failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Reset the breaker to closed.
    pub fn reset(&self) {
        self.close();
    }
}

/// Hands out one breaker per logical method, created lazily and shared by
/// every invocation of that method.
pub struct CircuitBreakerFactory {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<MethodKey, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerFactory {
    /// Create a factory stamping breakers from one configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a method key.
    pub fn for_key(&self, key: &MethodKey) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }
}

/// Decorator gating the wrapped chain behind a circuit breaker. Short
/// circuits with [`ClientError::CircuitOpen`] when the breaker rejects the
/// call; otherwise records one success or failure per logical call.
pub struct BreakerInvoker {
    inner: Arc<dyn Invoker>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerInvoker {
    /// Wrap an inner chain with a breaker.
    pub fn new(inner: Arc<dyn Invoker>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl Invoker for BreakerInvoker {
    async fn invoke(&self, call: Call) -> Result<Outcome> {
        if !self.breaker.is_allowed() {
            debug!(method = %call.descriptor.key(), "Circuit open, call rejected");
            return Err(ClientError::CircuitOpen);
        }

        match self.inner.invoke(call).await {
            Ok(outcome) => {
                self.breaker.record_success();
                Ok(outcome)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(0),
            ..Default::default()
        });
        cb.record_failure();
        // reset_timeout of zero: next check transitions to half-open
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_allowed());
        cb.record_failure();
        assert_eq!(*cb.state.read(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(0),
            ..Default::default()
        });
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_state_transitions_complete_without_blocking() {
        use std::sync::mpsc;
        use std::thread;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let cb = CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                reset_timeout: Duration::from_millis(0),
                ..Default::default()
            });
            // Failure at threshold opens, half-open success closes; both
            // transitions must return promptly.
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            assert!(cb.is_allowed());
            cb.record_success();
            assert_eq!(cb.state(), CircuitState::Closed);
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("breaker transition did not complete");
    }

    #[test]
    fn test_factory_shares_breaker_per_key() {
        let factory = CircuitBreakerFactory::new(CircuitBreakerConfig::default());
        let a = factory.for_key(&MethodKey::new("UserApi", "get"));
        let b = factory.for_key(&MethodKey::new("UserApi", "get"));
        let c = factory.for_key(&MethodKey::new("UserApi", "list"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
