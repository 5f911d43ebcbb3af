//! Error taxonomy and normalization.
//!
//! Every failure that crosses a component boundary is a [`DomainError`]: raw
//! transport failures, HTTP-style responses, and bare messages are normalized
//! once, at the boundary closest to the failure, and the resulting
//! retryability and severity are trusted downstream rather than re-derived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, DomainError>;

/// Closed error taxonomy. Every [`DomainError`] carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication
    Unauthorized,
    Forbidden,
    SessionExpired,
    // Resource
    NotFound,
    Conflict,
    Gone,
    // Input
    ValidationError,
    InvalidFormat,
    MissingRequired,
    // Quota
    RateLimited,
    QuotaExceeded,
    // Server
    ServerError,
    ServiceUnavailable,
    GatewayTimeout,
    // Client / network
    NetworkError,
    Timeout,
    Aborted,
    // AI provider
    ModelOverloaded,
    ContextLengthExceeded,
    ContentFiltered,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Gone => "GONE",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::MissingRequired => "MISSING_REQUIRED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::ModelOverloaded => "MODEL_OVERLOADED",
            ErrorCode::ContextLengthExceeded => "CONTEXT_LENGTH_EXCEEDED",
            ErrorCode::ContentFiltered => "CONTENT_FILTERED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Default retryability and severity for errors constructed directly
    /// from a code, without a status table entry.
    fn defaults(&self) -> (bool, Severity) {
        match self {
            ErrorCode::Unauthorized | ErrorCode::Forbidden | ErrorCode::SessionExpired => {
                (false, Severity::High)
            }
            ErrorCode::NotFound | ErrorCode::Gone => (false, Severity::Low),
            ErrorCode::Conflict => (false, Severity::Medium),
            ErrorCode::ValidationError
            | ErrorCode::InvalidFormat
            | ErrorCode::MissingRequired => (false, Severity::Medium),
            ErrorCode::RateLimited => (true, Severity::Medium),
            ErrorCode::QuotaExceeded => (false, Severity::High),
            ErrorCode::ServerError | ErrorCode::ServiceUnavailable => (true, Severity::High),
            ErrorCode::GatewayTimeout => (true, Severity::Medium),
            ErrorCode::NetworkError | ErrorCode::Timeout => (true, Severity::Medium),
            ErrorCode::Aborted => (false, Severity::Low),
            ErrorCode::ModelOverloaded => (true, Severity::High),
            ErrorCode::ContextLengthExceeded | ErrorCode::ContentFiltered => {
                (false, Severity::Medium)
            }
            ErrorCode::Unknown => (false, Severity::Medium),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly a surfaced error should be treated. Ordered: `Low < Medium <
/// High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The single normalized error representation used across the core.
///
/// Immutable once constructed; the builder methods consume `self` and are
/// meant to be chained before the error is first handed out.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl DomainError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let (retryable, severity) = code.defaults();
        Self {
            code,
            message: message.into(),
            hint: None,
            retryable,
            trace_id: None,
            status: None,
            severity,
            timestamp: Utc::now(),
            context: Map::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// The fixed wire shape for logs and diagnostics surfaces:
    /// `name, code, message, hint, retryable, trace_id, status, severity,
    /// timestamp`.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "name": "DomainError",
            "code": self.code.as_str(),
            "message": self.message,
            "hint": self.hint,
            "retryable": self.retryable,
            "trace_id": self.trace_id,
            "status": self.status,
            "severity": self.severity,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }

    /// Normalize a heterogeneous failure into a `DomainError`.
    ///
    /// Already-normalized errors pass through unchanged. Transport failures
    /// with no status classify as `NETWORK_ERROR` (retryable) unless they
    /// are cancellations, which classify as `ABORTED` (non-retryable).
    /// Responses go through the status table; server-supplied body fields
    /// always override the table defaults.
    pub fn normalize(failure: Failure) -> Self {
        match failure {
            Failure::Domain(error) => error,
            Failure::Transport { message, aborted } => {
                if aborted {
                    DomainError::new(ErrorCode::Aborted, "The request was cancelled")
                        .with_context("cause", Value::String(message))
                } else {
                    DomainError::new(ErrorCode::NetworkError, "Network request failed")
                        .with_hint("Check your connection and try again.")
                        .with_context("cause", Value::String(message))
                }
            }
            Failure::Response { status, body } => {
                let (code, message, retryable, severity) = classify_status(status);
                let mut error = DomainError::new(code, message)
                    .retryable(retryable)
                    .severity(severity)
                    .with_status(status);
                if let Some(body) = body {
                    if let Some(code) = body.code {
                        error.code = code;
                    }
                    if let Some(message) = body.message {
                        error.message = message;
                    }
                    if let Some(hint) = body.hint {
                        error.hint = Some(hint);
                    }
                    if let Some(retryable) = body.retryable {
                        error.retryable = retryable;
                    }
                    if let Some(trace_id) = body.trace_id {
                        error.trace_id = Some(trace_id);
                    }
                }
                error
            }
            Failure::Message(message) => DomainError::new(ErrorCode::Unknown, message),
        }
    }
}

/// A raw failure as produced by the wrapped operation, before normalization.
///
/// The pipeline treats the underlying call as an opaque async operation; this
/// is the shape its rejections arrive in.
#[derive(Debug)]
pub enum Failure {
    /// Transport-level failure with no HTTP status (connection refused,
    /// DNS, aborted fetch).
    Transport { message: String, aborted: bool },
    /// HTTP-like response carrying a status code and an optional
    /// structured error body.
    Response { status: u16, body: Option<ErrorBody> },
    /// A bare message with no further structure.
    Message(String),
    /// Already normalized; returned unchanged by [`DomainError::normalize`].
    Domain(DomainError),
}

impl Failure {
    pub fn transport(message: impl Into<String>) -> Self {
        Failure::Transport {
            message: message.into(),
            aborted: false,
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Failure::Transport {
            message: message.into(),
            aborted: true,
        }
    }

    pub fn response(status: u16) -> Self {
        Failure::Response { status, body: None }
    }

    pub fn response_with_body(status: u16, body: ErrorBody) -> Self {
        Failure::Response {
            status,
            body: Some(body),
        }
    }
}

impl From<DomainError> for Failure {
    fn from(error: DomainError) -> Self {
        Failure::Domain(error)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Failure::Message(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Failure::Message(message.to_string())
    }
}

/// Structured error body a server may attach to a failed response. Any field
/// present overrides the status-table default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    pub code: Option<ErrorCode>,
    pub message: Option<String>,
    pub hint: Option<String>,
    pub retryable: Option<bool>,
    pub trace_id: Option<String>,
}

/// Fixed status → (code, default message, retryable, severity) table.
/// Unlisted 5xx default to `SERVER_ERROR`/retryable; unlisted 4xx to a
/// generic non-retryable error.
fn classify_status(status: u16) -> (ErrorCode, &'static str, bool, Severity) {
    match status {
        400 => (
            ErrorCode::InvalidFormat,
            "The request was malformed",
            false,
            Severity::Medium,
        ),
        401 => (
            ErrorCode::Unauthorized,
            "Your session is no longer valid",
            false,
            Severity::High,
        ),
        403 => (
            ErrorCode::Forbidden,
            "You do not have access to this resource",
            false,
            Severity::High,
        ),
        404 => (
            ErrorCode::NotFound,
            "The requested resource was not found",
            false,
            Severity::Low,
        ),
        409 => (
            ErrorCode::Conflict,
            "The resource was changed by someone else",
            false,
            Severity::Medium,
        ),
        410 => (
            ErrorCode::Gone,
            "The resource is no longer available",
            false,
            Severity::Low,
        ),
        422 => (
            ErrorCode::ValidationError,
            "The submitted data failed validation",
            false,
            Severity::Medium,
        ),
        429 => (
            ErrorCode::RateLimited,
            "Too many requests",
            true,
            Severity::Medium,
        ),
        500 => (
            ErrorCode::ServerError,
            "The server hit an unexpected error",
            true,
            Severity::High,
        ),
        502 => (
            ErrorCode::ServiceUnavailable,
            "The upstream service is unreachable",
            true,
            Severity::High,
        ),
        503 => (
            ErrorCode::ServiceUnavailable,
            "The service is temporarily unavailable",
            true,
            Severity::High,
        ),
        504 => (
            ErrorCode::GatewayTimeout,
            "The upstream service timed out",
            true,
            Severity::Medium,
        ),
        500..=599 => (
            ErrorCode::ServerError,
            "The server hit an unexpected error",
            true,
            Severity::High,
        ),
        _ => (
            ErrorCode::Unknown,
            "The request failed",
            false,
            Severity::Medium,
        ),
    }
}
