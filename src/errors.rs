/*!
 * Error types for the lingodeck application.
 *
 * This module contains custom error types for different parts of the application,
 * using the thiserror crate for ergonomic error definitions.
 */

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider did not answer within the configured timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// 5xx answer from the provider
    #[error("Server error: {status_code} - {message}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Provider configuration is unusable (missing key, bad URL, ...)
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// The requested model is not served by the provider
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// The provider rejected the request itself
    #[error("Bad request: {status_code} - {message}")]
    BadRequest {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },
}

impl ProviderError {
    /// Whether the failed call may succeed when attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimitExceeded(_)
                | ProviderError::ServerError { .. }
                | ProviderError::ConnectionError(_)
                | ProviderError::ParseError(_)
        )
    }

    /// Fatal errors abort the whole job
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Delay before the next attempt.
    ///
    /// `attempt` is zero-based. Rate limits use their own (larger) base and are
    /// capped; every other retryable error doubles `base` per attempt.
    pub fn backoff_delay(&self, attempt: u32, base: Duration, rate_limit_base: Duration, cap: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = match self {
            ProviderError::RateLimitExceeded(_) => rate_limit_base.saturating_mul(factor),
            _ => base.saturating_mul(factor),
        };
        delay.min(cap)
    }

    /// Map an HTTP status and body onto the error taxonomy
    pub fn from_status(status_code: u16, message: String) -> Self {
        match status_code {
            401 | 403 => ProviderError::AuthenticationError(message),
            404 => ProviderError::UnsupportedModel(message),
            408 => ProviderError::Timeout(0),
            429 => ProviderError::RateLimitExceeded(message),
            500..=599 => ProviderError::ServerError { status_code, message },
            _ => ProviderError::BadRequest { status_code, message },
        }
    }
}

/// Errors raised by the job-control surface
#[derive(Error, Debug)]
pub enum JobError {
    /// No job with this id is known (never started or already evicted)
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The project referenced by a request does not exist
    #[error("Project not found: {0}")]
    ProjectNotFound(i64),

    /// The request was rejected before a job was created
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider setup failed before a job was created
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        Self::Store(format!("{:#}", error))
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from job control
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Malformed JSON input
    #[error("JSON error: {0}")]
    Json(String),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}
