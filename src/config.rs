//! Core client configuration.
//!
//! Loading the client's own tunables from the environment is separate from
//! CLI argument parsing or credential storage, which live above this crate.
//! Mirrors `LLMConfig::from_env()`'s pattern of being the single place
//! environment variables are read.

use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::log_debug;
use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 5);
pub const PERMISSIONS_REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 15);

/// Configuration for an [`crate::client::ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the analytics platform cluster.
    pub base_url: String,
    /// Maximum concurrent in-flight requests through the transport.
    pub concurrency: usize,
    /// Directory the cache database and data-load redirect cache live under.
    /// `None` disables the response cache entirely.
    pub cache_directory: Option<PathBuf>,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Timeout applied to permission-fetch workflows specifically.
    pub permissions_timeout: Duration,
    /// Retry policy applied by the transport.
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            concurrency: 15,
            cache_directory: None,
            verify_tls: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            permissions_timeout: PERMISSIONS_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> CsToolsResult<()> {
        if self.base_url.is_empty() {
            return Err(CsToolsError::configuration_error(
                "base_url is required",
            ));
        }
        if self.concurrency == 0 {
            return Err(CsToolsError::configuration_error(
                "concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Load from `CS_TOOLS_*` environment variables. This is the only function
    /// in the crate that reads the environment.
    pub fn from_env() -> CsToolsResult<Self> {
        let base_url = std::env::var("CS_TOOLS_BASE_URL").map_err(|_| {
            CsToolsError::configuration_error("CS_TOOLS_BASE_URL must be set")
        })?;

        let mut config = Self::new(base_url);

        if let Ok(raw) = std::env::var("CS_TOOLS_CONCURRENCY") {
            config.concurrency = raw.parse().map_err(|_| {
                CsToolsError::configuration_error(format!(
                    "CS_TOOLS_CONCURRENCY must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Ok(raw) = std::env::var("CS_TOOLS_CACHE_DIRECTORY") {
            config.cache_directory = Some(PathBuf::from(raw));
        }

        if let Ok(raw) = std::env::var("CS_TOOLS_VERIFY_TLS") {
            config.verify_tls = raw.parse().unwrap_or(true);
        }

        log_debug!(
            base_url = %config.base_url,
            concurrency = config.concurrency,
            has_cache_directory = config.cache_directory.is_some(),
            "loaded client configuration from environment"
        );

        config.validate()?;

        Ok(config)
    }
}
