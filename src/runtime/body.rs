//! Outbound body of a streaming response POST.

use crate::fault::ErrorEnvelope;
use crate::response::pipe::{Chunk, PipeReader};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use hyper::body::Frame;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::error;

/// Relays pipe chunks as body frames; a fault becomes the trailer frame.
pub(crate) struct StreamingBody {
    first: Option<Bytes>,
    reader: PipeReader,
    done: bool,
}

impl StreamingBody {
    pub(crate) fn new(first: Bytes, reader: PipeReader) -> Self {
        Self {
            first: Some(first),
            reader,
            done: false,
        }
    }
}

impl hyper::body::Body for StreamingBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(Frame::data(first))));
        }
        if self.done {
            return Poll::Ready(None);
        }
        match self.reader.poll_recv(cx) {
            Poll::Ready(Some(Chunk::Data(bytes))) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
            Poll::Ready(Some(Chunk::Fault(envelope))) => {
                self.done = true;
                Poll::Ready(Some(Ok(Frame::trailers(error_trailers(&envelope)))))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done && self.first.is_none()
    }
}

/// Trailer fields reporting a failure after the header block went out.
pub(crate) fn error_trailers(envelope: &ErrorEnvelope) -> HeaderMap {
    let body = serde_json::to_vec(envelope).unwrap_or_default();
    error!("{}", String::from_utf8_lossy(&body));

    let mut trailers = HeaderMap::new();
    let error_type = HeaderValue::try_from(envelope.error_type.as_str())
        .unwrap_or(HeaderValue::from_static("Error"));
    trailers.insert(
        HeaderName::from_static("lambda-runtime-function-error-type"),
        error_type,
    );
    if let Ok(value) = HeaderValue::try_from(STANDARD.encode(&body)) {
        trailers.insert(
            HeaderName::from_static("lambda-runtime-function-error-body"),
            value,
        );
    }
    trailers
}
