//! Build-time assembly of the per-method decorator chain.

use crate::circuit_breaker::{BreakerInvoker, CircuitBreakerFactory};
use crate::classifier::CompositeClassifier;
use crate::descriptor::MethodDescriptor;
use crate::fallback::{Fallback, FallbackInvoker};
use crate::invoker::{Invoker, TerminalInvoker};
use crate::load_balancer::{LoadBalanceInvoker, ServerResolver};
use crate::retry::{RetryInvoker, RetryPolicy};
use crate::transport::Transport;
use std::sync::Arc;

/// Shared collaborators the assembly draws from. Read-only after client
/// construction.
pub(crate) struct PipelineParts {
    pub transport: Arc<dyn Transport>,
    pub classifier: Arc<CompositeClassifier>,
    pub resolver: Option<Arc<dyn ServerResolver>>,
    pub retry: Option<Arc<dyn RetryPolicy>>,
    pub breakers: Option<Arc<CircuitBreakerFactory>>,
    pub fallback: Option<Arc<dyn Fallback>>,
}

/// Assemble the chain for one method, outermost first:
/// fallback(circuit-breaker(retry(load-balancer(terminal executor)))).
/// Unconfigured layers are omitted. Runs once per method at build time; the
/// result is shared across all invocations.
pub(crate) fn assemble(parts: &PipelineParts, descriptor: &MethodDescriptor) -> Arc<dyn Invoker> {
    let mut chain: Arc<dyn Invoker> = Arc::new(TerminalInvoker::new(
        parts.transport.clone(),
        parts.classifier.clone(),
    ));

    if let Some(resolver) = &parts.resolver {
        chain = Arc::new(LoadBalanceInvoker::new(chain, resolver.clone()));
    }

    if let Some(policy) = &parts.retry {
        chain = Arc::new(RetryInvoker::new(chain, policy.clone()));
    }

    if let Some(factory) = &parts.breakers {
        let breaker = factory.for_key(descriptor.key());
        chain = Arc::new(BreakerInvoker::new(chain, breaker));
    }

    if let Some(fallback) = &parts.fallback {
        chain = Arc::new(FallbackInvoker::new(chain, fallback.clone()));
    }

    chain
}
