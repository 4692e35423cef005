//! Fallback binding and decorator.

use crate::invoker::{Call, Invoker, Outcome, Payload};
use crate::{ClientError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Alternate implementation of a logical method, consulted when the wrapped
/// chain fails (including [`ClientError::CircuitOpen`] and
/// [`ClientError::OutOfRetries`]). The binding is resolved lazily per
/// failure via [`Fallback::applies`], and the produced payload must match
/// the method's declared arity. Fallback output is never retried,
/// load-balanced, or circuit-broken.
#[async_trait]
pub trait Fallback: Send + Sync {
    /// Whether this fallback handles the given error. Defaults to handling
    /// every error.
    fn applies(&self, _error: &ClientError) -> bool {
        true
    }

    /// Produce a substitute payload for the failed call.
    async fn handle(&self, call: &Call, error: ClientError) -> Result<Payload>;
}

/// Outermost decorator: on failure, substitutes the bound fallback's result
/// when the binding applies; otherwise the error propagates unchanged.
pub struct FallbackInvoker {
    inner: Arc<dyn Invoker>,
    fallback: Arc<dyn Fallback>,
}

impl FallbackInvoker {
    /// Wrap an inner chain with a fallback binding.
    pub fn new(inner: Arc<dyn Invoker>, fallback: Arc<dyn Fallback>) -> Self {
        Self { inner, fallback }
    }
}

#[async_trait]
impl Invoker for FallbackInvoker {
    async fn invoke(&self, call: Call) -> Result<Outcome> {
        match self.inner.invoke(call.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(error) if self.fallback.applies(&error) => {
                debug!(
                    method = %call.descriptor.key(),
                    error = %error,
                    "Substituting fallback result"
                );
                let payload = self.fallback.handle(&call, error).await?;
                Ok(Outcome::synthetic(payload))
            }
            Err(error) => Err(error),
        }
    }
}
