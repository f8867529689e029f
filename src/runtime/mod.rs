//! Lambda runtime: the control-plane client and the loop that drives it.

mod body;
mod client;
mod config;
pub mod invocation;
mod lambda;

pub use client::RuntimeClient;
pub use config::{InvokeMode, RuntimeConfig, DEFAULT_API_VERSION};
pub use invocation::Invocation;
pub use lambda::LambdaRuntime;
