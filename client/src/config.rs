//! Configuration for the workflow client.

use crate::error::{ClientError, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Env prefix of [`ClientConfig`]
pub const ENV_PREFIX: &str = "HITLFLOW_";

/// Remote engine connection settings (`HITLFLOW_BASE_URL`, `HITLFLOW_AUTH_TOKEN`, ...)
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// Root of the workflow API, e.g. `http://127.0.0.1:8000/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Pre-issued bearer token
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}

fn default_connect_timeout_sec() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("{}/{}", hitlflow_base::APP_NAME, hitlflow_base::APP_VERSION)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            connect_timeout_sec: default_connect_timeout_sec(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from `HITLFLOW_*` environment variables
    pub fn from_env() -> Result<Self> {
        hitlflow_base::load_from_env(ENV_PREFIX).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Parsed base url, always ending with `/` so relative joins keep the path prefix.
    pub fn base(&self) -> Result<Url> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| ClientError::Config(format!("invalid base_url '{}': {}", self.base_url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ClientError::Config(format!(
                "unsupported scheme '{}' in base_url",
                other
            ))),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    /// HTTP client for [`crate::api::HttpWorkflowApi`].
    ///
    /// Only a connect timeout is set: event streams stay open as long as the
    /// server keeps running nodes.
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(ClientError::Transport)
    }
}
