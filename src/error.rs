//! Error taxonomy for the CS Tools HTTP orchestration substrate.
//!
//! Every fallible boundary in this crate returns [`CsToolsError`]. Each variant
//! can be categorized via [`category()`](CsToolsError::category) and assessed
//! for severity via [`severity()`](CsToolsError::severity).
//!
//! Retryability is *not* a property of the error alone — the retry policy
//! (`crate::retry`) also looks at which endpoint was hit, so it takes the
//! request and the error together rather than asking the error to decide.

use crate::logging::{log_error, log_warn};
use thiserror::Error;

/// High-level categorization for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network timeouts, 502/504 — the retry policy may already have handled these.
    Transient,
    /// 401/403 and other auth failures. Not retryable.
    Auth,
    /// 4xx other than auth. Caller's request was malformed.
    BadRequest,
    /// Local cache backend failure (DB locked, disk full). Never surfaced to
    /// the caller — the request proceeds as a cache miss.
    CacheBackend,
    /// One member of a bounded task group failed. Other members continue.
    TaskFailure,
    /// The mapping file was present but not valid JSON, or a precondition for
    /// deploy (mapping file must exist) was not met.
    MappingFile,
}

/// Logging/alerting severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

/// Convenient result alias used throughout the crate.
pub type CsToolsResult<T> = std::result::Result<T, CsToolsError>;

#[derive(Error, Debug)]
pub enum CsToolsError {
    /// The HTTP request failed at the transport level (network error, or the
    /// underlying sender errored outright). May already have exhausted retries.
    #[error("request failed: {message}")]
    RequestFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request timed out waiting for a response.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// 401/403 against a protected endpoint.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// 4xx other than auth.
    #[error("bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    /// The response body couldn't be parsed into the expected shape.
    #[error("failed to parse response: {message}")]
    ResponseParsingError { message: String },

    /// The mapping file on disk was not valid JSON.
    #[error("mapping file {path} is corrupt at: {detail}")]
    MappingFileCorrupt { path: String, detail: String },

    /// A deploy was requested but the source mapping file doesn't exist yet.
    #[error("mapping file missing for environment '{environment}': run checkpoint first")]
    MappingFileMissing { environment: String },

    /// Local cache backend failure. Constructing this never surfaces an error
    /// to the HTTP caller — see `Transport::send`, which logs and treats the
    /// request as an uncached miss.
    #[error("cache backend error: {message}")]
    CacheBackend { message: String },

    /// One spawned task in a bounded task group failed.
    #[error("task '{name}' failed: {message}")]
    TaskFailure { name: String, message: String },

    /// Provider/client configuration is invalid or incomplete.
    #[error("configuration error: {message}")]
    ConfigurationError { message: String },
}

impl CsToolsError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RequestFailed { .. } | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::AuthenticationFailed { .. } => ErrorCategory::Auth,
            Self::BadRequest { .. }
            | Self::ConfigurationError { .. }
            | Self::ResponseParsingError { .. } => ErrorCategory::BadRequest,
            Self::MappingFileCorrupt { .. } | Self::MappingFileMissing { .. } => {
                ErrorCategory::MappingFile
            }
            Self::CacheBackend { .. } => ErrorCategory::CacheBackend,
            Self::TaskFailure { .. } => ErrorCategory::TaskFailure,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RequestFailed { .. } | Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::AuthenticationFailed { .. } => ErrorSeverity::Error,
            Self::BadRequest { .. } => ErrorSeverity::Error,
            Self::ResponseParsingError { .. } => ErrorSeverity::Warning,
            Self::MappingFileCorrupt { .. } => ErrorSeverity::Critical,
            Self::MappingFileMissing { .. } => ErrorSeverity::Error,
            Self::CacheBackend { .. } => ErrorSeverity::Warning,
            Self::TaskFailure { .. } => ErrorSeverity::Error,
            Self::ConfigurationError { .. } => ErrorSeverity::Error,
        }
    }

    // -- constructors, each logging as it builds --

    pub fn request_failed(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_warn!(error_type = "request_failed", message = %message, "HTTP request failed");
        Self::RequestFailed { message, source }
    }

    pub fn timeout(timeout_secs: u64) -> Self {
        log_warn!(error_type = "timeout", timeout_secs, "request timed out");
        Self::Timeout { timeout_secs }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "authentication_failed", message = %message, "authentication failed");
        Self::AuthenticationFailed { message }
    }

    pub fn bad_request(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "bad_request", status, message = %message, "bad request");
        Self::BadRequest { status, message }
    }

    pub fn response_parsing_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "response_parsing_error", message = %message, "response parsing failed");
        Self::ResponseParsingError { message }
    }

    pub fn mapping_file_corrupt(path: impl Into<String>, detail: impl Into<String>) -> Self {
        let path = path.into();
        let detail = detail.into();
        log_error!(error_type = "mapping_file_corrupt", path = %path, detail = %detail, "mapping file is corrupt");
        Self::MappingFileCorrupt { path, detail }
    }

    pub fn mapping_file_missing(environment: impl Into<String>) -> Self {
        let environment = environment.into();
        log_error!(error_type = "mapping_file_missing", environment = %environment, "mapping file missing");
        Self::MappingFileMissing { environment }
    }

    pub fn cache_backend(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "cache_backend", message = %message, "cache backend error, proceeding as a miss");
        Self::CacheBackend { message }
    }

    pub fn task_failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        log_error!(error_type = "task_failure", name = %name, message = %message, "task group member failed");
        Self::TaskFailure { name, message }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "configuration_error", message = %message, "configuration error");
        Self::ConfigurationError { message }
    }
}
