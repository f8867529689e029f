//! # Fezz Lambda - HTTP handlers on the Lambda runtime API
//!
//! Fezz Lambda runs an ordinary request/response HTTP handler inside a
//! Lambda-style execution environment. Such an environment accepts no
//! inbound connections: the process long-polls a local control plane for the
//! next invocation, runs the handler, and posts the result back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   GET  /invocation/next        ┌───────────────┐
//! │    Control plane     │ ─────────────────────────────▶ │ RuntimeClient │
//! │  (Runtime API, :9001)│ ◀───────────────────────────── │               │
//! └──────────────────────┘   POST /invocation/{id}/...    └───────┬───────┘
//!                                                                 │ event JSON
//!                                                                 ▼
//!                         ┌────────────┐  FezzRequest   ┌──────────────────┐
//!                         │ ProxyEvent │ ─────────────▶ │   FezzHandler    │
//!                         │  (V1 / V2) │                │                  │
//!                         └────────────┘                └────────┬─────────┘
//!                                                                │ writes
//!                                                                ▼
//!                                          BufferedResponse / StreamingResponse
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fezz_lambda::prelude::*;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl FezzHandler for Hello {
//!     type Error = std::io::Error;
//!
//!     async fn serve(
//!         &self,
//!         request: FezzRequest,
//!         response: &mut dyn ResponseWriter,
//!     ) -> Result<(), Self::Error> {
//!         response.headers_mut().set("Content-Type", "text/plain");
//!         response.write_str(&format!("Hello from {}!", request.path())).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RuntimeError> {
//!     let config = RuntimeConfig::new()
//!         .runtime_api("127.0.0.1:9001")
//!         .invoke_mode(InvokeMode::Buffered);
//!     LambdaRuntime::new(config).run(Hello).await
//! }
//! ```
//!
//! ## Failure handling
//!
//! - An error returned by the handler is posted as an [`ErrorEnvelope`] and
//!   the runtime keeps serving.
//! - A panic is posted with a stack trace, then [`LambdaRuntime::run`]
//!   returns so the process can exit.
//! - A control plane that cannot be reached ends the loop with a
//!   [`RuntimeError`].

pub mod error;
pub mod event;
pub mod fault;
pub mod handler;
pub mod http;
pub mod response;
pub mod runtime;
pub mod sniff;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::error::{DeadlineError, RuntimeError};
    pub use crate::fault::ErrorEnvelope;
    pub use crate::handler::{FezzHandler, InvocationContext};
    pub use crate::http::{
        FezzRequest, Flush, Headers, Method, ResponseWriter, ResponseWriterExt, StatusCode,
    };
    pub use crate::runtime::{InvokeMode, LambdaRuntime, RuntimeConfig};
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use error::{DeadlineError, EventError, RuntimeError};
pub use event::{EventVersion, ProxyEvent};
pub use fault::{install_panic_hook, ErrorEnvelope, StackFrame};
pub use handler::{FezzHandler, InvocationContext};
pub use http::{FezzRequest, Headers, ResponseWriter};
pub use response::{BufferedResponse, StreamingResponse, WireResponse};
pub use runtime::{InvokeMode, LambdaRuntime, RuntimeClient, RuntimeConfig};
