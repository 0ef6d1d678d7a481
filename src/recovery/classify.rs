//! Deterministic classification of raw errors into `SystemError`s.
//!
//! Severity and code are inferred from message substrings. The tables are approximate and
//! must stay stable; callers rely on the same message always mapping to the same code.

use crate::error::OrchestratorError;
use crate::types::{new_id, now, Severity, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Lowercase aliases: config sources may lowercase map keys.
    #[serde(alias = "boundary_violation")]
    BoundaryViolation,
    #[serde(alias = "validation_error")]
    ValidationError,
    #[serde(alias = "timeout_error")]
    TimeoutError,
    #[serde(alias = "network_error")]
    NetworkError,
    #[serde(alias = "rate_limit_error")]
    RateLimitError,
    #[serde(alias = "auth_error")]
    AuthError,
    #[serde(alias = "not_found_error")]
    NotFoundError,
    #[serde(alias = "unknown_error")]
    UnknownError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::BoundaryViolation,
        ErrorCode::ValidationError,
        ErrorCode::TimeoutError,
        ErrorCode::NetworkError,
        ErrorCode::RateLimitError,
        ErrorCode::AuthError,
        ErrorCode::NotFoundError,
        ErrorCode::UnknownError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BoundaryViolation => "BOUNDARY_VIOLATION",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::RateLimitError => "RATE_LIMIT_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::NotFoundError => "NOT_FOUND_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        let normalized = code.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }

    /// Whether any automated or manual recovery applies.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorCode::BoundaryViolation | ErrorCode::UnknownError)
    }

    /// Whether the default strategy retries the failed action.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::TimeoutError
                | ErrorCode::NetworkError
                | ErrorCode::RateLimitError
                | ErrorCode::AuthError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error as reported by any caller, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawError {
    pub message: String,
    /// Explicit code, when the caller already knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::new(message)
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::new(message)
    }
}

impl From<&OrchestratorError> for RawError {
    fn from(err: &OrchestratorError) -> Self {
        let raw = RawError::new(err.to_string());
        if err.is_boundary_violation() {
            raw.with_code(ErrorCode::BoundaryViolation.as_str())
        } else {
            raw
        }
    }
}

impl From<OrchestratorError> for RawError {
    fn from(err: OrchestratorError) -> Self {
        RawError::from(&err)
    }
}

/// Where an error happened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Retries already spent on the failing work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Free-form caller context
    #[serde(default)]
    pub extra: Value,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: impl Into<String>, actor_id: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemError {
    pub id: String,
    pub timestamp: Timestamp,
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub recoverable: bool,
    pub retryable: bool,
    pub context: ErrorContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl SystemError {
    /// Classify a raw error. The same input always yields the same severity and code.
    pub fn classify(raw: &RawError, context: ErrorContext) -> Self {
        let code = raw
            .code
            .as_deref()
            .and_then(ErrorCode::parse)
            .unwrap_or_else(|| infer_code(&raw.message));
        Self {
            id: new_id("err"),
            timestamp: now(),
            severity: infer_severity(&raw.message),
            code,
            message: raw.message.clone(),
            stack: raw.stack.clone(),
            actor: context.actor.clone(),
            operation: context.operation.clone(),
            recoverable: code.is_recoverable(),
            retryable: code.is_retryable(),
            retry_count: context.retry_count,
            context,
        }
    }
}

/// Severity from message keywords, most severe match first.
pub fn infer_severity(message: &str) -> Severity {
    let message = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));
    if has(&["critical", "fatal"]) {
        Severity::Critical
    } else if has(&["boundary", "security"]) {
        Severity::High
    } else if has(&["validation", "timeout"]) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

const CODE_TABLE: &[(ErrorCode, &[&str])] = &[
    (ErrorCode::BoundaryViolation, &["boundary"]),
    (ErrorCode::ValidationError, &["validation", "invalid"]),
    (ErrorCode::TimeoutError, &["timeout", "timed out"]),
    (
        ErrorCode::RateLimitError,
        &["rate limit", "too many requests", "429"],
    ),
    (
        ErrorCode::NetworkError,
        &["network", "connection", "econnrefused", "econnreset"],
    ),
    (
        ErrorCode::AuthError,
        &[
            "unauthorized",
            "not authorized",
            "forbidden",
            "authentication",
            "401",
            "403",
        ],
    ),
    (ErrorCode::NotFoundError, &["not found", "enoent", "404"]),
];

/// Code from message keywords; the first table row with a hit wins.
pub fn infer_code(message: &str) -> ErrorCode {
    let message = message.to_lowercase();
    CODE_TABLE
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| message.contains(n)))
        .map(|(code, _)| *code)
        .unwrap_or(ErrorCode::UnknownError)
}
