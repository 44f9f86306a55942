use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::http::{HttpGateway, DEFAULT_BASE_URL};
use crate::gateway::GatewayError;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub export_dir: PathBuf,
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = var("ARC_BASE_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let export_dir = var("ARC_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_or_default(&var).join(".arc-review").join("exports"));

        let request_timeout = var("ARC_REQUEST_TIMEOUT_SECS").and_then(|s| match s.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                tracing::warn!("Ignoring invalid ARC_REQUEST_TIMEOUT_SECS: {}", s);
                None
            }
        });

        Self {
            base_url,
            export_dir,
            request_timeout,
        }
    }

    /// Build the HTTP gateway to the backend.
    pub fn build_gateway(&self) -> Result<HttpGateway, GatewayError> {
        HttpGateway::new(self.base_url.clone(), self.request_timeout)
    }
}

fn home_or_default(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}
