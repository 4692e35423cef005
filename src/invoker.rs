//! Attempt model and the decorator contract the pipeline composes.

use crate::classifier::{Classification, CompositeClassifier};
use crate::descriptor::{Arity, MethodDescriptor};
use crate::request::Request;
use crate::response::BodyStream;
use crate::transport::Transport;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::sync::Arc;

/// One logical call traversing the pipeline: the shared method descriptor
/// plus the request for this traversal. Cheap to clone per attempt.
#[derive(Debug, Clone)]
pub struct Call {
    /// Descriptor of the logical method being invoked.
    pub descriptor: Arc<MethodDescriptor>,
    /// The outbound request (authority may still be a logical service name).
    pub request: Request,
}

impl Call {
    /// Create a call unit.
    pub fn new(descriptor: Arc<MethodDescriptor>, request: Request) -> Self {
        Self {
            descriptor,
            request,
        }
    }

    /// Declared result arity of the method.
    pub fn arity(&self) -> Arity {
        self.descriptor.arity()
    }
}

/// Result payload of a successful traversal.
pub enum Payload {
    /// Fully buffered body. Single-arity outcomes and retry-drained
    /// multi-arity outcomes use this form.
    Full(Bytes),
    /// Lazy chunk stream, delivered in transport order.
    Stream(BodyStream),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(b) => f.debug_tuple("Full").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Successful outcome of a pipeline traversal, before arity adaptation.
#[derive(Debug)]
pub struct Outcome {
    /// Response status (200 for synthetic fallback outcomes).
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body payload.
    pub payload: Payload,
}

impl Outcome {
    /// Synthesize an outcome that did not come from the network, e.g. a
    /// fallback value.
    pub fn synthetic(payload: Payload) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            payload,
        }
    }
}

/// The decorator contract: every pipeline layer wraps another `Invoker`
/// with the same call shape, adding one cross-cutting behavior. Assembled
/// chains are immutable and shared across concurrent invocations.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Drive the call one traversal through this layer and everything below.
    async fn invoke(&self, call: Call) -> Result<Outcome>;
}

/// Innermost layer: performs the exchange through the transport and routes
/// the response through the status classifier.
pub struct TerminalInvoker {
    transport: Arc<dyn Transport>,
    classifier: Arc<CompositeClassifier>,
}

impl TerminalInvoker {
    /// Create the terminal layer.
    pub fn new(transport: Arc<dyn Transport>, classifier: Arc<CompositeClassifier>) -> Self {
        Self {
            transport,
            classifier,
        }
    }
}

#[async_trait]
impl Invoker for TerminalInvoker {
    async fn invoke(&self, call: Call) -> Result<Outcome> {
        let response = self.transport.execute(call.request.clone()).await?;

        // A declining handler passes the response back so the success body
        // stays deliverable.
        let response = if self.classifier.should_handle(response.status()) {
            match self
                .classifier
                .classify(call.descriptor.key(), response)
                .await?
            {
                Classification::Fault(error) => return Err(error),
                Classification::Pass(response) => response,
            }
        } else {
            response
        };

        let (status, headers, body) = response.into_parts();
        let payload = match call.arity() {
            Arity::Single => Payload::Full(crate::response::drain(body).await?),
            Arity::Multi => Payload::Stream(body),
        };

        Ok(Outcome {
            status,
            headers,
            payload,
        })
    }
}
