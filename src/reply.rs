//! Result-arity adaptation: single eventual values vs. element streams.

use crate::descriptor::Arity;
use crate::invoker::{Outcome, Payload};
use crate::response::BodyStream;
use crate::{ClientError, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, stream};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Splits a byte sequence into element frames. Stateless; all buffering
/// lives in the caller's accumulator.
pub trait Framing: Send + Sync {
    /// Extract the next complete frame from the buffer, if any.
    fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>>;

    /// Extract a trailing frame at end of input, if the remainder forms one.
    fn finish(&self, buf: &mut BytesMut) -> Result<Option<Bytes>>;
}

/// Newline-delimited JSON framing. Blank lines are skipped; a final
/// unterminated line counts as a frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NdjsonFraming;

impl Framing for NdjsonFraming {
    fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if !line.is_empty() {
                return Ok(Some(line.freeze()));
            }
        }
        Ok(None)
    }

    fn finish(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        let rest = buf.split();
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            Ok(None)
        } else {
            Ok(Some(rest.freeze()))
        }
    }
}

/// A logical call's normalized result: one eventual value or an ordered
/// element stream.
pub enum Reply<T> {
    /// Exactly one decoded value.
    Single(T),
    /// Zero or more decoded values, in transport order.
    Stream(BoxStream<'static, Result<T>>),
}

impl<T: std::fmt::Debug> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(value) => f.debug_tuple("Single").field(value).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
        }
    }
}

impl<T: Send + 'static> Reply<T> {
    /// Unwrap a single value; fails on a multi-valued reply.
    pub fn into_single(self) -> Result<T> {
        match self {
            Self::Single(value) => Ok(value),
            Self::Stream(_) => Err(ClientError::InvalidRequest(
                "multi-valued reply where a single value was expected".into(),
            )),
        }
    }

    /// View any reply as a stream; a single value becomes a one-item stream.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        match self {
            Self::Single(value) => stream::iter([Ok(value)]).boxed(),
            Self::Stream(s) => s,
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::Codec(e.to_string()))
}

/// Frame and decode a fully buffered body.
fn decode_frames<T: DeserializeOwned>(framing: &dyn Framing, body: Bytes) -> Result<Vec<T>> {
    let mut buf = BytesMut::from(&body[..]);
    let mut items = Vec::new();
    while let Some(frame) = framing.next_frame(&mut buf)? {
        items.push(decode(&frame)?);
    }
    if let Some(frame) = framing.finish(&mut buf)? {
        items.push(decode(&frame)?);
    }
    Ok(items)
}

struct StreamState {
    body: BodyStream,
    buf: BytesMut,
    eof: bool,
}

/// Lazily frame and decode a chunk stream, emitting elements as they arrive.
fn decode_stream<T>(framing: Arc<dyn Framing>, body: BodyStream) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let state = StreamState {
        body,
        buf: BytesMut::new(),
        eof: false,
    };
    stream::try_unfold(state, move |mut state| {
        let framing = framing.clone();
        async move {
            loop {
                if let Some(frame) = framing.next_frame(&mut state.buf)? {
                    return Ok(Some((decode(&frame)?, state)));
                }
                if state.eof {
                    return match framing.finish(&mut state.buf)? {
                        Some(frame) => Ok(Some((decode(&frame)?, state))),
                        None => Ok(None),
                    };
                }
                match state.body.next().await {
                    Some(chunk) => state.buf.extend_from_slice(&chunk?),
                    None => state.eof = true,
                }
            }
        }
    })
    .boxed()
}

/// Normalize a pipeline outcome into the method's declared result shape.
///
/// A single-arity method receiving a streaming payload buffers to the first
/// framed element and discards the rest.
pub(crate) async fn adapt<T>(
    outcome: Outcome,
    arity: Arity,
    framing: Arc<dyn Framing>,
) -> Result<Reply<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    match (arity, outcome.payload) {
        (Arity::Single, Payload::Full(body)) => Ok(Reply::Single(decode(&body)?)),
        (Arity::Single, Payload::Stream(body)) => {
            let mut elements = decode_stream::<T>(framing, body);
            match elements.next().await {
                Some(first) => Ok(Reply::Single(first?)),
                None => Err(ClientError::Codec(
                    "empty stream for single-valued method".into(),
                )),
            }
        }
        (Arity::Multi, Payload::Full(body)) => {
            let items = decode_frames::<T>(framing.as_ref(), body)?;
            Ok(Reply::Stream(stream::iter(items.into_iter().map(Ok)).boxed()))
        }
        (Arity::Multi, Payload::Stream(body)) => Ok(Reply::Stream(decode_stream(framing, body))),
    }
}
