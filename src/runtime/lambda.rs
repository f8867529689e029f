//! Invocation loop entry point.

use super::client::RuntimeClient;
use super::config::{InvokeMode, RuntimeConfig};
use crate::error::RuntimeError;
use crate::fault::install_panic_hook;
use crate::handler::FezzHandler;
use std::sync::Arc;
use tracing::{error, info};

/// Lambda runtime.
///
/// Polls the control plane for invocations and runs each one through a
/// [`FezzHandler`], one at a time, until the control plane becomes
/// unreachable or a handler panics.
pub struct LambdaRuntime {
    config: RuntimeConfig,
}

impl LambdaRuntime {
    /// Create a new runtime.
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Create a new runtime with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RuntimeConfig::default())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run the invocation loop.
    ///
    /// Never returns `Ok`; the error explains why the process should exit.
    pub async fn run<H: FezzHandler + 'static>(self, handler: H) -> Result<(), RuntimeError> {
        install_panic_hook();
        let mut client = RuntimeClient::new(&self.config);

        info!(
            "Lambda runtime polling {} in {} mode",
            self.config.invocation_base_url(),
            self.config.invoke_mode
        );

        let result = match self.config.invoke_mode {
            InvokeMode::Buffered => client.start(&handler).await,
            InvokeMode::ResponseStream => client.start_streaming(Arc::new(handler)).await,
        };
        if let Err(e) = &result {
            error!("Lambda runtime stopped: {}", e);
        }
        result
    }
}
