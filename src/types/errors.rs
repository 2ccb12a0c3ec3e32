//! Application error types.
//!
//! Every failure the gateway surfaces is one structured [`Error`] carrying a
//! stable [`ErrorCode`], a human message, optional JSON context and a
//! `retryable` flag so calling layers can decide policy uniformly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ToolNotFound,
    RateLimitExceeded,
    ValidationError,
    InvalidUrl,
    MaxRetriesExceeded,
    UnsupportedFormat,
    TranslationError,
    ScrapingError,
    DataProcessingError,
    Timeout,
    ConfigurationError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::TranslationError => "TRANSLATION_ERROR",
            ErrorCode::ScrapingError => "SCRAPING_ERROR",
            ErrorCode::DataProcessingError => "DATA_PROCESSING_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Taxonomy bucket for this code.
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorCode::ValidationError | ErrorCode::InvalidUrl => ErrorClass::Validation,
            ErrorCode::RateLimitExceeded => ErrorClass::Admission,
            ErrorCode::Timeout => ErrorClass::TransientExecution,
            ErrorCode::ToolNotFound
            | ErrorCode::UnsupportedFormat
            | ErrorCode::ConfigurationError => ErrorClass::Configuration,
            ErrorCode::MaxRetriesExceeded
            | ErrorCode::TranslationError
            | ErrorCode::ScrapingError
            | ErrorCode::DataProcessingError => ErrorClass::Execution,
            ErrorCode::InternalError => ErrorClass::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed or missing caller input. Never retried.
    Validation,
    /// Caller exceeded its quota. The caller may retry after the window resets.
    Admission,
    /// Presumed recoverable handler failure. Retried internally.
    TransientExecution,
    /// Caller or registry misconfiguration. Fatal to the single call.
    Configuration,
    /// Handler failure that is not (or no longer) worth retrying.
    Execution,
    Internal,
}

/// Structured gateway error.
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
    pub retryable: bool,
    #[source]
    pub cause: Option<Box<Error>>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            retryable,
            cause: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn class(&self) -> ErrorClass {
        if self.retryable && self.code.class() == ErrorClass::Execution {
            return ErrorClass::TransientExecution;
        }
        self.code.class()
    }

    /// Wire representation used by the stdio front-end and in logs.
    pub fn to_json(&self) -> Value {
        let mut body = serde_json::json!({
            "code": self.code,
            "message": self.message,
            "retryable": self.retryable,
        });
        if let Some(context) = &self.context {
            body["context"] = context.clone();
        }
        if let Some(cause) = &self.cause {
            body["cause"] = cause.to_json();
        }
        body
    }
}

// Convenience constructors
impl Error {
    pub fn tool_not_found(name: &str) -> Self {
        Self::new(ErrorCode::ToolNotFound, format!("Unknown tool: {}", name), false)
            .with_context(serde_json::json!({ "tool": name }))
    }

    pub fn rate_limited(key: &str, limit: u32, window_ms: u64) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Rate limit exceeded: {} calls per {}ms", limit, window_ms),
            true,
        )
        .with_context(serde_json::json!({
            "key": key,
            "limit": limit,
            "window_ms": window_ms,
        }))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, msg, false)
    }

    pub fn invalid_url(field: &str, msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUrl, msg, false)
            .with_context(serde_json::json!({ "field": field }))
    }

    pub fn unsupported_format(format: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedFormat,
            format!("Unsupported format: {}", format),
            false,
        )
        .with_context(serde_json::json!({ "format": format }))
    }

    pub fn timeout(tool: &str, timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{} timed out after {}ms", tool, timeout_ms),
            true,
        )
        .with_context(serde_json::json!({ "tool": tool, "timeout_ms": timeout_ms }))
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, msg, false)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, msg, false)
    }

    /// Handler failure presumed recoverable (network hiccup, upstream 5xx).
    pub fn transient(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new(code, msg, true)
    }

    /// Handler failure that retrying will not fix.
    pub fn fatal(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new(code, msg, false)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal(format!("serialization error: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::internal(format!("io error: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::transient(ErrorCode::InternalError, format!("http error: {}", err))
    }
}
