//! Fezz handler trait and invocation context.

use crate::http::{FezzRequest, ResponseWriter};
use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Execution scope of a single invocation.
///
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Invocation id assigned by the control plane.
    pub request_id: String,
    /// Absolute deadline of the invocation.
    pub deadline: SystemTime,
    /// Trace header value, if the control plane sent one.
    pub trace_id: Option<String>,
    pub invoked_function_arn: Option<String>,
    pub cognito_identity: Option<String>,
    pub client_context: Option<String>,
    pub(crate) cancellation: CancellationToken,
}

impl InvocationContext {
    /// Create a context for the given invocation id and deadline.
    pub fn new(request_id: impl Into<String>, deadline: SystemTime) -> Self {
        Self {
            request_id: request_id.into(),
            deadline,
            trace_id: None,
            invoked_function_arn: None,
            cognito_identity: None,
            client_context: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Set the trace id.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Time left until the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    /// Resolves once the invocation is cancelled (deadline reached).
    ///
    /// Long-running handlers should select on this.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel the scope early.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new("", SystemTime::UNIX_EPOCH)
    }
}

/// HTTP handler run for every invocation.
///
/// The handler receives the reconstructed request and a response sink. It
/// either returns normally (the response is whatever was written to the
/// sink), returns an error (reported, the process keeps serving) or panics
/// (reported with a stack trace, then the process exits).
#[async_trait]
pub trait FezzHandler: Send + Sync {
    /// Error returned by the handler.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serve one request.
    async fn serve(
        &self,
        request: FezzRequest,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let ctx = InvocationContext::new("id", SystemTime::now() + Duration::from_secs(60));
        assert!(!ctx.is_cancelled());
        assert!(ctx.remaining() > Duration::from_secs(50));

        let clone = ctx.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        ctx.cancel();
        tokio_test::assert_ok!(waiter.await);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_remaining_after_deadline() {
        let ctx = InvocationContext::new("id", SystemTime::now() - Duration::from_secs(1));
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
