//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Control-plane API version.
pub const DEFAULT_API_VERSION: &str = "2018-06-01";

/// How responses are delivered to the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeMode {
    /// Whole response posted as one JSON document.
    #[default]
    #[serde(rename = "BUFFERED")]
    Buffered,
    /// Response framed and streamed while the handler runs.
    #[serde(rename = "RESPONSE_STREAM")]
    ResponseStream,
}

impl InvokeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvokeMode::Buffered => "BUFFERED",
            InvokeMode::ResponseStream => "RESPONSE_STREAM",
        }
    }
}

impl fmt::Display for InvokeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvokeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUFFERED" => Ok(InvokeMode::Buffered),
            "RESPONSE_STREAM" => Ok(InvokeMode::ResponseStream),
            other => Err(format!("unknown invoke mode: {other}")),
        }
    }
}

/// Configuration for the Lambda runtime client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// `host:port` of the control plane.
    pub runtime_api: String,
    /// Response delivery mode.
    pub invoke_mode: InvokeMode,
    /// User-Agent sent with every control-plane request.
    pub user_agent: String,
    /// API version segment of the control-plane URLs.
    pub api_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_api: "127.0.0.1:9001".to_string(),
            invoke_mode: InvokeMode::default(),
            user_agent: format!("fezz-lambda/{}", env!("CARGO_PKG_VERSION")),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control-plane address.
    pub fn runtime_api(mut self, addr: impl Into<String>) -> Self {
        self.runtime_api = addr.into();
        self
    }

    /// Set the invoke mode.
    pub fn invoke_mode(mut self, mode: InvokeMode) -> Self {
        self.invoke_mode = mode;
        self
    }

    /// Set the User-Agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the API version.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Base URL of the invocation endpoints, with a trailing slash.
    pub fn invocation_base_url(&self) -> String {
        format!(
            "http://{}/{}/runtime/invocation/",
            self.runtime_api, self.api_version
        )
    }
}
