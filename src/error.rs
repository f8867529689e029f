//! Error types.

use hyper::StatusCode;
use thiserror::Error;

/// Failures of the control-plane loop.
///
/// Any of these ends [`crate::LambdaRuntime::run`]; the host restarts the
/// process.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("http error: {0}")]
    Http(#[from] hyper::http::Error),
    #[error("body error: {0}")]
    Body(#[from] hyper::Error),
    #[error("unexpected status code {status} from {url}")]
    UnexpectedStatus { url: String, status: StatusCode },
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("handler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// The handler panicked and the report was delivered.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

/// An invocation payload that cannot be turned into a request.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("event declares version 2 but has no requestContext.http")]
    MissingHttpContext,
    #[error("invalid http method: {0}")]
    InvalidMethod(String),
}

/// The invocation's deadline header is missing or not a millisecond timestamp.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("missing or invalid Lambda-Runtime-Deadline-Ms header")]
pub struct DeadlineError;
