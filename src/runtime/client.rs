//! Control-plane client: poll, dispatch, report.

use super::body::StreamingBody;
use super::config::RuntimeConfig;
use super::invocation::{
    propagate_trace_id, DeadlineGuard, Invocation, HEADER_FUNCTION_RESPONSE_MODE,
    HEADER_REQUEST_ID, TRAILER_ERROR_BODY, TRAILER_ERROR_TYPE,
};
use crate::error::{EventError, RuntimeError};
use crate::event::ProxyEvent;
use crate::fault::ErrorEnvelope;
use crate::handler::{FezzHandler, InvocationContext};
use crate::http::{ContentTyped, FezzRequest, StatusCode};
use crate::response::pipe::{pipe, Chunk, PipeWriter};
use crate::response::{
    BufferedResponse, StreamingResponse, WireResponse, CONTENT_TYPE_HTTP_INTEGRATION_RESPONSE,
    CONTENT_TYPE_JSON,
};
use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{CONTENT_TYPE, TRAILER, USER_AGENT};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

type OutboundBody = UnsyncBoxBody<Bytes, Infallible>;

/// Session against the control plane.
///
/// Invocations are strictly sequential, so the poll buffer is reused from one
/// invocation to the next.
pub struct RuntimeClient {
    base_url: String,
    user_agent: String,
    client: Client<HttpConnector, OutboundBody>,
    buf: BytesMut,
}

impl RuntimeClient {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            base_url: config.invocation_base_url(),
            user_agent: config.user_agent.clone(),
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            buf: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Serve invocations with buffered responses until the control plane
    /// fails or a handler panics.
    pub async fn start<H: FezzHandler>(&mut self, handler: &H) -> Result<(), RuntimeError> {
        loop {
            let invocation = self.next().await?;
            self.handle_invoke(invocation, handler).await?;
        }
    }

    /// Streaming counterpart of [`RuntimeClient::start`].
    pub async fn start_streaming<H: FezzHandler + 'static>(
        &mut self,
        handler: Arc<H>,
    ) -> Result<(), RuntimeError> {
        loop {
            let invocation = self.next().await?;
            self.handle_invoke_streaming(invocation, handler.clone())
                .await?;
        }
    }

    /// Long-poll for the next invocation.
    pub async fn next(&mut self) -> Result<Invocation, RuntimeError> {
        let url = format!("{}next", self.base_url);
        let req = Request::get(&url)
            .header(USER_AGENT, &self.user_agent)
            .body(Empty::<Bytes>::new().boxed_unsync())?;

        let response = self.client.request(req).await?;
        let (parts, mut body) = response.into_parts();
        if parts.status != StatusCode::OK {
            return Err(RuntimeError::UnexpectedStatus {
                url,
                status: parts.status,
            });
        }

        self.buf.clear();
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame?.into_data() {
                self.buf.extend_from_slice(&data);
            }
        }
        let payload = self.buf.split().freeze();

        let id = parts
            .headers
            .get(HEADER_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!("Received invocation {} ({} bytes)", id, payload.len());

        Ok(Invocation {
            id,
            payload,
            headers: parts.headers,
        })
    }

    /// Run one invocation and post its buffered response.
    ///
    /// Returns an error only when the control plane cannot be reached or the
    /// handler panicked.
    pub async fn handle_invoke<H: FezzHandler>(
        &self,
        invocation: Invocation,
        handler: &H,
    ) -> Result<(), RuntimeError> {
        let Some(ctx) = self.prepare(&invocation).await? else {
            return Ok(());
        };
        let _guard = DeadlineGuard::arm(&ctx);

        let outcome = AssertUnwindSafe(serve_buffered(handler, &invocation.payload, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ErrorEnvelope::from_panic(panic)));

        let response = match outcome {
            Ok(response) => response,
            Err(envelope) => return self.fail(&invocation.id, envelope).await,
        };
        let body = match serde_json::to_vec(&response) {
            Ok(body) => body,
            Err(err) => {
                return self
                    .fail(&invocation.id, ErrorEnvelope::from_error(&err))
                    .await
            }
        };
        debug!(
            "Posting response for invocation {} (status {})",
            invocation.id, response.status_code
        );
        self.post(
            &format!("{}/response", invocation.id),
            Bytes::from(body),
            response.content_type(),
        )
        .await
    }

    /// Run one invocation, streaming its response while the handler runs.
    pub async fn handle_invoke_streaming<H: FezzHandler + 'static>(
        &self,
        invocation: Invocation,
        handler: Arc<H>,
    ) -> Result<(), RuntimeError> {
        let Some(ctx) = self.prepare(&invocation).await? else {
            return Ok(());
        };
        let _guard = DeadlineGuard::arm(&ctx);

        let request = match decode_request(&invocation.payload, ctx) {
            Ok(request) => request,
            Err(err) => {
                return self
                    .fail(&invocation.id, ErrorEnvelope::from_error(&err))
                    .await
            }
        };

        let (writer, mut reader) = pipe();
        let task = tokio::spawn(serve_streaming(handler, request, writer));

        // Nothing has been posted yet, so a failure before the header block
        // still goes to the error endpoint.
        let first = match reader.recv().await {
            Some(Chunk::Data(bytes)) => bytes,
            Some(Chunk::Fault(envelope)) => {
                drop(reader);
                task.await?;
                return self.fail(&invocation.id, envelope).await;
            }
            None => {
                task.await?;
                let envelope =
                    ErrorEnvelope::new("response stream closed without a header block", "Error");
                return self.fail(&invocation.id, envelope).await;
            }
        };

        debug!("Streaming response for invocation {}", invocation.id);
        self.post_streaming(
            &format!("{}/response", invocation.id),
            StreamingBody::new(first, reader),
            CONTENT_TYPE_HTTP_INTEGRATION_RESPONSE,
        )
        .await?;

        match task.await? {
            Some(envelope) if envelope.should_exit => {
                Err(RuntimeError::HandlerPanicked(envelope.message))
            }
            _ => Ok(()),
        }
    }

    /// Post an error envelope to the invocation's error endpoint.
    pub async fn report_failure(
        &self,
        invocation_id: &str,
        envelope: &ErrorEnvelope,
    ) -> Result<(), RuntimeError> {
        let body = serde_json::to_vec(envelope)?;
        error!("{}", String::from_utf8_lossy(&body));
        self.post(
            &format!("{}/error", invocation_id),
            Bytes::from(body),
            CONTENT_TYPE_JSON,
        )
        .await
    }

    /// Parse the deadline and set up tracing for an invocation.
    ///
    /// `None` means the deadline was unusable and the failure is already
    /// reported.
    async fn prepare(
        &self,
        invocation: &Invocation,
    ) -> Result<Option<InvocationContext>, RuntimeError> {
        let deadline = match invocation.deadline() {
            Ok(deadline) => deadline,
            Err(err) => {
                self.report_failure(&invocation.id, &ErrorEnvelope::from_error(&err))
                    .await?;
                return Ok(None);
            }
        };
        propagate_trace_id(invocation.trace_id());
        Ok(Some(invocation.context(deadline)))
    }

    /// Report a failure, then turn a fault into a loop-ending error.
    async fn fail(&self, invocation_id: &str, envelope: ErrorEnvelope) -> Result<(), RuntimeError> {
        self.report_failure(invocation_id, &envelope).await?;
        if envelope.should_exit {
            return Err(RuntimeError::HandlerPanicked(envelope.message));
        }
        Ok(())
    }

    async fn post(&self, path: &str, body: Bytes, content_type: &str) -> Result<(), RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let req = Request::post(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(body).boxed_unsync())?;
        self.send(url, req).await
    }

    async fn post_streaming(
        &self,
        path: &str,
        body: StreamingBody,
        content_type: &str,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let req = Request::post(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, content_type)
            .header(HEADER_FUNCTION_RESPONSE_MODE, "streaming")
            .header(TRAILER, format!("{}, {}", TRAILER_ERROR_TYPE, TRAILER_ERROR_BODY))
            .body(body.boxed_unsync())?;
        self.send(url, req).await
    }

    async fn send(&self, url: String, req: Request<OutboundBody>) -> Result<(), RuntimeError> {
        let response = self.client.request(req).await?;
        let status = response.status();
        response.into_body().collect().await?;
        if status != StatusCode::ACCEPTED {
            return Err(RuntimeError::UnexpectedStatus { url, status });
        }
        Ok(())
    }
}

fn decode_request(payload: &[u8], ctx: InvocationContext) -> Result<FezzRequest, EventError> {
    ProxyEvent::from_slice(payload)?.into_request(ctx)
}

async fn serve_buffered<H: FezzHandler>(
    handler: &H,
    payload: &[u8],
    ctx: InvocationContext,
) -> Result<WireResponse, ErrorEnvelope> {
    let event = ProxyEvent::from_slice(payload).map_err(|e| ErrorEnvelope::from_error(&e))?;
    let version = event.version();
    let request = event
        .into_request(ctx)
        .map_err(|e| ErrorEnvelope::from_error(&e))?;

    let mut response = BufferedResponse::new();
    handler
        .serve(request, &mut response)
        .await
        .map_err(|e| ErrorEnvelope::from_error(&e))?;
    Ok(response.render(version))
}

/// Drive a handler against a streaming writer; returns the failure sent down
/// the pipe, if any.
async fn serve_streaming<H: FezzHandler>(
    handler: Arc<H>,
    request: FezzRequest,
    writer: PipeWriter,
) -> Option<ErrorEnvelope> {
    let mut response = StreamingResponse::new(writer);
    let outcome = AssertUnwindSafe(handler.serve(request, &mut response))
        .catch_unwind()
        .await;
    let envelope = match outcome {
        Ok(Ok(())) => {
            if let Err(err) = response.close().await {
                debug!("Response stream ended early: {}", err);
            }
            return None;
        }
        Ok(Err(err)) => ErrorEnvelope::from_error(&err),
        Err(panic) => ErrorEnvelope::from_panic(panic),
    };
    response.close_with_error(envelope.clone()).await;
    Some(envelope)
}
