use std::fmt;

use http::StatusCode;
use serde::Serialize;
use tollgate_core::{Feature, HttpError, RequestId};

/// Provider-agnostic failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Credential rejected or mismatched
    Auth,
    /// Upstream account deactivated or billing problem
    Account,
    /// Model missing or not permitted
    Model,
    /// Upstream quota or credit exhausted
    Quota,
    /// Upstream request rate exceeded
    RateLimit,
    /// Request rejected as malformed
    BadRequest,
    /// Upstream or transport failure
    Server,
    /// Deadline exceeded
    Timeout,
    /// Nothing else matched
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::Account => "ACCOUNT",
            Self::Model => "MODEL",
            Self::Quota => "QUOTA",
            Self::RateLimit => "RATE_LIMIT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Server => "SERVER",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::Auth => ErrorCategory::Auth,
            Self::Account => ErrorCategory::Account,
            Self::Model => ErrorCategory::Model,
            Self::Quota | Self::RateLimit => ErrorCategory::Limit,
            Self::Server | Self::Timeout => ErrorCategory::Server,
            Self::BadRequest | Self::Unknown => ErrorCategory::Unknown,
        }
    }

    /// Whether a caller may retry with backoff
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Server | Self::Timeout)
    }

    /// Status returned to the client
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Account | Self::Model => StatusCode::FORBIDDEN,
            Self::Quota | Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Server | Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping used by clients to pick how to render a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    #[serde(rename = "AUTH_ERROR")]
    Auth,
    #[serde(rename = "ACCOUNT_ERROR")]
    Account,
    #[serde(rename = "MODEL_ERROR")]
    Model,
    #[serde(rename = "LIMIT_ERROR")]
    Limit,
    #[serde(rename = "SERVER_ERROR")]
    Server,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "AUTH_ERROR",
            Self::Account => "ACCOUNT_ERROR",
            Self::Model => "MODEL_ERROR",
            Self::Limit => "LIMIT_ERROR",
            Self::Server => "SERVER_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, redacted failure ready to be shown to a caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StructuredError {
    pub kind: ErrorKind,
    /// Redacted, client-safe description
    pub message: String,
    pub request_id: RequestId,
    /// Stable gateway-issued code clients can branch on
    pub code: Option<&'static str>,
    pub provider_code: Option<String>,
    pub provider_type: Option<String>,
    /// Status the provider answered with, if it answered at all
    pub upstream_status: Option<u16>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            kind,
            message: message.into(),
            request_id,
            code: None,
            provider_code: None,
            provider_type: None,
            upstream_status: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub const fn http_status(&self) -> StatusCode {
        self.kind.http_status()
    }
}

impl HttpError for StructuredError {
    fn status_code(&self) -> StatusCode {
        self.http_status()
    }

    fn error_type(&self) -> &str {
        self.kind.as_str()
    }

    fn client_message(&self) -> String {
        self.message.clone()
    }
}

/// Code carried by [`ResolveError::WrongProvider`]
pub const WRONG_PROVIDER: &str = "wrong_provider";

/// Failure to map a logical model id onto an upstream model
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The id belongs to no family served here
    #[error("model '{model}' is not served by this gateway")]
    WrongProvider { model: String },

    /// The catalog offers nothing usable for the family
    #[error("no usable {feature} model available (wanted '{canonical}')")]
    NoUsableModel { feature: Feature, canonical: String },

    /// A family naming pattern failed to compile
    #[error("invalid naming pattern for {feature} family: {source}")]
    InvalidPattern {
        feature: Feature,
        #[source]
        source: regex::Error,
    },
}

impl ResolveError {
    /// Express the failure in the client-facing taxonomy
    ///
    /// A wrong provider is the caller's mistake; an empty catalog is an
    /// operator configuration problem.
    pub fn into_structured(self, request_id: RequestId) -> StructuredError {
        match self {
            Self::WrongProvider { .. } => {
                StructuredError::new(ErrorKind::BadRequest, self.to_string(), request_id).with_code(WRONG_PROVIDER)
            }
            Self::NoUsableModel { .. } | Self::InvalidPattern { .. } => StructuredError::new(
                ErrorKind::Server,
                "no upstream model is currently available",
                request_id,
            ),
        }
    }
}

impl HttpError for ResolveError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::WrongProvider { .. } => StatusCode::BAD_REQUEST,
            Self::NoUsableModel { .. } | Self::InvalidPattern { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::WrongProvider { .. } => "BAD_REQUEST",
            Self::NoUsableModel { .. } | Self::InvalidPattern { .. } => "SERVER",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::WrongProvider { .. } => self.to_string(),
            _ => "no upstream model is currently available".to_owned(),
        }
    }
}
