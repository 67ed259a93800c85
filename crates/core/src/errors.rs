//! Error types for the PCO SDK

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pco_sdk_resilience::{RateLimitHeaders, RetryableError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jsonapi::JsonApiErrorObject;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, PcoError>;

/// Broad classification used by callers to branch on failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 401
    Authentication,
    /// 403
    Authorization,
    /// 429
    RateLimit,
    /// 400 and 422
    Validation,
    /// 5xx from the remote service
    ExternalApi,
    /// No status at all, 408, or a local timeout
    Network,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Classify an HTTP status (or its absence)
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None | Some(408) => Self::Network,
            Some(401) => Self::Authentication,
            Some(403) => Self::Authorization,
            Some(429) => Self::RateLimit,
            Some(400) | Some(422) => Self::Validation,
            Some(500..=599) => Self::ExternalApi,
            Some(_) => Self::Unknown,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Authentication | Self::Authorization | Self::ExternalApi => ErrorSeverity::High,
            Self::RateLimit | Self::Network | Self::Unknown => ErrorSeverity::Medium,
            Self::Validation => ErrorSeverity::Low,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ExternalApi | Self::Network)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::ExternalApi => "external_api",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

/// A non-2xx response from the remote API
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: u16,
    pub status_text: String,
    pub method: String,
    pub endpoint: String,
    /// Parsed JSON:API `errors` array (empty when the body had none)
    pub errors: Vec<JsonApiErrorObject>,
    /// Rate-limit headers present on the failed response
    pub rate_limit: Option<RateLimitHeaders>,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            method: String::new(),
            endpoint: String::new(),
            errors: Vec::new(),
            rate_limit: None,
            request_id: None,
        }
    }

    pub fn with_request(mut self, method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.method = method.into();
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<JsonApiErrorObject>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitHeaders) -> Self {
        if !rate_limit.is_empty() {
            self.rate_limit = Some(rate_limit);
        }
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_status(Some(self.status))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.rate_limit.as_ref().and_then(|r| r.retry_after)
    }

    /// Most specific human-readable message available
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .find_map(|e| e.detail.clone().or_else(|| e.title.clone()))
            .unwrap_or_else(|| self.status_text.clone())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.method.is_empty() {
            write!(f, "API error {} ({}): {}", self.status, self.category(), self.message())
        } else {
            write!(
                f,
                "{} {} failed with {} ({}): {}",
                self.method,
                self.endpoint,
                self.status,
                self.category(),
                self.message()
            )
        }
    }
}

/// Errors returned by the SDK
#[derive(Error, Debug)]
pub enum PcoError {
    #[error("{0}")]
    Api(Box<ApiError>),

    #[error("Request timed out after {timeout_ms}ms: {method} {endpoint}")]
    Timeout {
        method: String,
        endpoint: String,
        timeout_ms: u64,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Unsupported endpoint: {0}")]
    UnsupportedEndpoint(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("No matching person found and creation is disabled")]
    NoMatchCreationDisabled,

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Batch operation '{operation_id}' (#{index}) failed: {source}")]
    BatchOperation {
        operation_id: String,
        index: usize,
        #[source]
        source: Arc<PcoError>,
    },
}

impl From<ApiError> for PcoError {
    fn from(error: ApiError) -> Self {
        Self::Api(Box::new(error))
    }
}

impl PcoError {
    /// Create a missing field error
    pub fn missing(field: &str) -> Self {
        Self::MissingField(field.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api(api) => api.category(),
            Self::Timeout { .. } | Self::Network(_) => ErrorCategory::Network,
            Self::TokenRefresh(_) => ErrorCategory::Authentication,
            Self::UnsupportedEndpoint(_)
            | Self::InvalidBatch(_)
            | Self::MissingField(_)
            | Self::NoMatchCreationDisabled => ErrorCategory::Validation,
            Self::Serialization(_)
            | Self::InvalidResponse(_)
            | Self::Config(_)
            | Self::Cancelled(_) => ErrorCategory::Unknown,
            Self::BatchOperation { source, .. } => source.category(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.category().severity()
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// HTTP status, when the error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(api) => Some(api.status),
            Self::BatchOperation { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api(api) => api.retry_after(),
            Self::BatchOperation { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            Self::BatchOperation { source, .. } => source.api_error(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl RetryableError for PcoError {
    fn is_retryable(&self) -> bool {
        PcoError::is_retryable(self)
    }

    fn retry_delay_hint(&self) -> Option<u64> {
        self.retry_after().map(|d| d.as_millis() as u64)
    }
}
