//! A unit of work received from the control plane.

use crate::error::DeadlineError;
use crate::handler::InvocationContext;
use bytes::Bytes;
use hyper::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::debug;

pub const HEADER_REQUEST_ID: &str = "Lambda-Runtime-Aws-Request-Id";
pub const HEADER_DEADLINE_MS: &str = "Lambda-Runtime-Deadline-Ms";
pub const HEADER_TRACE_ID: &str = "Lambda-Runtime-Trace-Id";
pub const HEADER_COGNITO_IDENTITY: &str = "Lambda-Runtime-Cognito-Identity";
pub const HEADER_CLIENT_CONTEXT: &str = "Lambda-Runtime-Client-Context";
pub const HEADER_INVOKED_FUNCTION_ARN: &str = "Lambda-Runtime-Invoked-Function-Arn";
pub const HEADER_FUNCTION_RESPONSE_MODE: &str = "Lambda-Runtime-Function-Response-Mode";
pub const TRAILER_ERROR_TYPE: &str = "Lambda-Runtime-Function-Error-Type";
pub const TRAILER_ERROR_BODY: &str = "Lambda-Runtime-Function-Error-Body";

/// Environment variable read by tracing agents.
pub const TRACE_ID_ENV: &str = "_X_AMZN_TRACE_ID";

/// One invocation, consumed by exactly one handle call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    pub payload: Bytes,
    pub headers: HeaderMap,
}

impl Invocation {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn owned_header(&self, name: &str) -> Option<String> {
        self.header(name).map(str::to_string)
    }

    /// Absolute deadline from the millisecond-epoch header.
    pub fn deadline(&self) -> Result<SystemTime, DeadlineError> {
        let ms: u64 = self
            .header(HEADER_DEADLINE_MS)
            .and_then(|v| v.trim().parse().ok())
            .ok_or(DeadlineError)?;
        Ok(UNIX_EPOCH + Duration::from_millis(ms))
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.header(HEADER_TRACE_ID)
    }

    /// Build the execution scope for this invocation.
    pub fn context(&self, deadline: SystemTime) -> InvocationContext {
        let mut ctx = InvocationContext::new(self.id.clone(), deadline);
        ctx.trace_id = self.owned_header(HEADER_TRACE_ID);
        ctx.invoked_function_arn = self.owned_header(HEADER_INVOKED_FUNCTION_ARN);
        ctx.cognito_identity = self.owned_header(HEADER_COGNITO_IDENTITY);
        ctx.client_context = self.owned_header(HEADER_CLIENT_CONTEXT);
        ctx
    }
}

/// Mirror the trace id into the process environment.
pub(crate) fn propagate_trace_id(trace_id: Option<&str>) {
    match trace_id {
        Some(id) => std::env::set_var(TRACE_ID_ENV, id),
        None => std::env::remove_var(TRACE_ID_ENV),
    }
}

/// Cancels a context when its deadline passes; stops watching on drop.
pub(crate) struct DeadlineGuard {
    watcher: JoinHandle<()>,
}

impl DeadlineGuard {
    pub(crate) fn arm(ctx: &InvocationContext) -> Self {
        let remaining = ctx.remaining();
        let token = ctx.cancellation.clone();
        let request_id = ctx.request_id.clone();
        let watcher = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            debug!("Deadline reached for invocation {}", request_id);
            token.cancel();
        });
        Self { watcher }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderName, HeaderValue};

    fn invocation(headers: &[(&'static str, &'static str)]) -> Invocation {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_static(v),
            );
        }
        Invocation {
            id: "request-1".to_string(),
            payload: Bytes::new(),
            headers: map,
        }
    }

    #[test]
    fn test_deadline_parse() {
        let inv = invocation(&[(HEADER_DEADLINE_MS, "1700000000123")]);
        assert_eq!(
            inv.deadline().unwrap(),
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_123)
        );
        assert!(invocation(&[(HEADER_DEADLINE_MS, "soon")]).deadline().is_err());
        assert!(invocation(&[]).deadline().is_err());
    }

    #[test]
    fn test_context_metadata() {
        let inv = invocation(&[
            (HEADER_TRACE_ID, "Root=1-5759e988-bd862e3fe1be46a994272793"),
            (HEADER_INVOKED_FUNCTION_ARN, "arn:aws:lambda:us-east-1:123456789012:function:fn"),
            (HEADER_CLIENT_CONTEXT, "{}"),
        ]);
        let ctx = inv.context(UNIX_EPOCH);
        assert_eq!(ctx.request_id, "request-1");
        assert_eq!(
            ctx.trace_id.as_deref(),
            Some("Root=1-5759e988-bd862e3fe1be46a994272793")
        );
        assert_eq!(
            ctx.invoked_function_arn.as_deref(),
            Some("arn:aws:lambda:us-east-1:123456789012:function:fn")
        );
        assert_eq!(ctx.client_context.as_deref(), Some("{}"));
        assert!(ctx.cognito_identity.is_none());
    }

    #[tokio::test]
    async fn test_guard_cancels_at_deadline() {
        let ctx = InvocationContext::new("id", SystemTime::now() + Duration::from_millis(50));
        let _guard = DeadlineGuard::arm(&ctx);
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_drop_stops_watching() {
        let ctx = InvocationContext::new("id", SystemTime::now() + Duration::from_millis(20));
        drop(DeadlineGuard::arm(&ctx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!ctx.is_cancelled());
    }
}
