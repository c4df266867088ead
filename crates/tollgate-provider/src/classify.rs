//! Mapping of raw upstream failures onto [`ErrorKind`]
//!
//! The decision is driven by the HTTP status first and refined by signals
//! found in the provider's error code, type and message. Every input maps to
//! exactly one kind; anything unrecognised is [`ErrorKind::Unknown`].

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tollgate_core::RequestId;

use crate::error::{ErrorKind, StructuredError};

const MAX_MESSAGE_LEN: usize = 512;

/// A failed upstream interaction, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The provider answered with a non-success status
    Http {
        status: u16,
        code: Option<String>,
        error_type: Option<String>,
        message: Option<String>,
    },
    /// The deadline passed before the provider finished
    Timeout,
    /// No usable answer: connection refused, reset, unreadable body
    Transport(String),
}

impl Failure {
    /// Build from a status and raw response body
    ///
    /// Bodies shaped like `{"error": {"message", "type", "code"}}` are
    /// picked apart; anything else becomes the message verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: Detail,
        }

        #[derive(Deserialize)]
        struct Detail {
            #[serde(default)]
            message: Option<String>,
            #[serde(default, rename = "type")]
            error_type: Option<String>,
            #[serde(default)]
            code: Option<serde_json::Value>,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(Envelope { error }) => Self::Http {
                status,
                code: error.code.and_then(|code| match code {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                error_type: error.error_type,
                message: error.message,
            },
            Err(_) => Self::Http {
                status,
                code: None,
                error_type: None,
                message: Some(body.trim().to_owned()).filter(|m| !m.is_empty()),
            },
        }
    }

    /// One-line description safe to log, credentials redacted
    pub fn redacted(&self) -> String {
        match self {
            Self::Http {
                status, code, message, ..
            } => redact(&format!(
                "HTTP {status} ({}): {}",
                code.as_deref().unwrap_or("-"),
                message.as_deref().unwrap_or_default()
            )),
            Self::Timeout => "deadline exceeded".to_owned(),
            Self::Transport(detail) => redact(detail),
        }
    }
}

/// Classify a failure and attach the request id
pub fn classify(failure: &Failure, request_id: &RequestId) -> StructuredError {
    match failure {
        Failure::Http {
            status,
            code,
            error_type,
            message,
        } => {
            let kind = kind_for(*status, code.as_deref(), error_type.as_deref(), message.as_deref());
            let text = message
                .as_deref()
                .map_or_else(|| format!("upstream provider returned HTTP {status}"), redact);

            StructuredError {
                kind,
                message: truncate(text),
                request_id: request_id.clone(),
                code: None,
                provider_code: code.clone(),
                provider_type: error_type.clone(),
                upstream_status: Some(*status),
            }
        }
        Failure::Timeout => StructuredError::new(
            ErrorKind::Timeout,
            "upstream provider did not respond in time",
            request_id.clone(),
        ),
        Failure::Transport(detail) => StructuredError::new(
            ErrorKind::Server,
            truncate(format!("upstream provider unreachable: {}", redact(detail))),
            request_id.clone(),
        ),
    }
}

/// The decision table
pub fn kind_for(status: u16, code: Option<&str>, error_type: Option<&str>, message: Option<&str>) -> ErrorKind {
    let signals = Signals::new(code, error_type, message);

    match status {
        401 if signals.account() => ErrorKind::Account,
        401 | 403 if signals.model() => ErrorKind::Model,
        401 | 403 => ErrorKind::Auth,
        404 if signals.mentions_model() => ErrorKind::Model,
        404 | 400 => ErrorKind::BadRequest,
        408 => ErrorKind::Timeout,
        429 if signals.quota() => ErrorKind::Quota,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Unknown,
    }
}

/// Lowercased code, type and message searched for hints
struct Signals(String);

impl Signals {
    fn new(code: Option<&str>, error_type: Option<&str>, message: Option<&str>) -> Self {
        let joined = [code, error_type, message]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        Self(joined)
    }

    fn any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.0.contains(needle))
    }

    fn account(&self) -> bool {
        self.any(&["deactivated", "suspended", "billing", "account_disabled", "account disabled"])
    }

    fn model(&self) -> bool {
        self.mentions_model() || self.any(&["permission", "not allowed", "does not have access", "unsupported_country"])
    }

    fn mentions_model(&self) -> bool {
        self.0.contains("model")
    }

    fn quota(&self) -> bool {
        self.any(&["insufficient_quota", "quota", "credit", "billing_hard_limit"])
    }
}

fn secret_patterns() -> &'static [(Regex, &'static str); 3] {
    static PATTERNS: OnceLock<[(Regex, &'static str); 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*").expect("valid bearer regex"),
                "Bearer [REDACTED]",
            ),
            (
                Regex::new(r"\bsk-[A-Za-z0-9_\-*]{4,}").expect("valid api key regex"),
                "[REDACTED]",
            ),
            (
                Regex::new(
                    r#"(?i)(["']?\b(?:api[_-]?key|key|token|secret|password|authorization)["']?\s*[:=]\s*["']?)([^"'\s,;&}]+)"#,
                )
                .expect("valid key-value regex"),
                "${1}[REDACTED]",
            ),
        ]
    })
}

/// Replace credentials and secret-looking values with `[REDACTED]`
pub fn redact(text: &str) -> String {
    secret_patterns()
        .iter()
        .fold(text.to_owned(), |acc, (pattern, replacement)| {
            pattern.replace_all(&acc, *replacement).into_owned()
        })
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn kind(status: u16, code: Option<&str>, message: Option<&str>) -> ErrorKind {
        kind_for(status, code, None, message)
    }

    #[test]
    fn decision_table() {
        let cases = [
            (401, None, Some("Incorrect API key provided"), ErrorKind::Auth),
            (401, Some("account_deactivated"), None, ErrorKind::Account),
            (401, None, Some("Your account is not active, please check your billing details"), ErrorKind::Account),
            (401, None, Some("You do not have access to the model gpt-5"), ErrorKind::Model),
            (403, None, Some("Forbidden"), ErrorKind::Auth),
            (403, None, Some("Project does not have access to model sora-2"), ErrorKind::Model),
            (403, Some("unsupported_country_region_territory"), None, ErrorKind::Model),
            (404, Some("model_not_found"), None, ErrorKind::Model),
            (404, None, Some("Unknown url /v1/chats"), ErrorKind::BadRequest),
            (429, None, Some("Rate limit reached for requests"), ErrorKind::RateLimit),
            (429, Some("insufficient_quota"), None, ErrorKind::Quota),
            (400, Some("context_length_exceeded"), None, ErrorKind::BadRequest),
            (408, None, None, ErrorKind::Timeout),
            (500, None, None, ErrorKind::Server),
            (503, None, Some("overloaded"), ErrorKind::Server),
            (418, None, None, ErrorKind::Unknown),
            (302, None, None, ErrorKind::Unknown),
            (0, None, None, ErrorKind::Unknown),
        ];

        for (status, code, message, expected) in cases {
            assert_eq!(kind(status, code, message), expected, "{status} {code:?} {message:?}");
        }
    }

    #[test]
    fn mismatched_project_is_auth() {
        let failure = Failure::from_response(
            401,
            r#"{"error":{"message":"OpenAI-Project header should match project for API key","type":"invalid_request_error","code":"mismatched_project"}}"#,
        );
        let err = classify(&failure, &RequestId::from("req-1"));

        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert_eq!(err.provider_code.as_deref(), Some("mismatched_project"));
        assert_eq!(err.provider_type.as_deref(), Some("invalid_request_error"));
        assert_eq!(err.upstream_status, Some(401));
        assert_eq!(err.request_id.as_str(), "req-1");
    }

    #[test]
    fn plain_text_bodies_become_the_message() {
        let failure = Failure::from_response(502, "Bad Gateway\n");
        let err = classify(&failure, &RequestId::from("r"));
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.message, "Bad Gateway");
        assert!(err.is_retryable());
    }

    #[test]
    fn numeric_codes_are_kept() {
        let failure = Failure::from_response(429, r#"{"error":{"message":"slow down","code":1302}}"#);
        let Failure::Http { code, .. } = &failure else {
            panic!("expected http failure");
        };
        assert_eq!(code.as_deref(), Some("1302"));
    }

    #[test]
    fn missing_message_gets_a_default() {
        let err = classify(&Failure::from_response(500, ""), &RequestId::from("r"));
        assert_eq!(err.message, "upstream provider returned HTTP 500");
    }

    #[test]
    fn timeouts_and_transport() {
        let timeout = classify(&Failure::Timeout, &RequestId::from("r"));
        assert_eq!(timeout.kind, ErrorKind::Timeout);
        assert!(timeout.upstream_status.is_none());

        let refused = classify(&Failure::Transport("connection refused".to_owned()), &RequestId::from("r"));
        assert_eq!(refused.kind, ErrorKind::Server);
    }

    #[test]
    fn secrets_are_redacted() {
        let cases = [
            (
                "Incorrect API key provided: sk-proj-abc123XYZ789. You can find your key",
                "Incorrect API key provided: [REDACTED]. You can find your key",
            ),
            ("header Authorization: Bearer eyJhbGciOi.abc.def", "header Authorization: [REDACTED] [REDACTED]"),
            ("bad request token=abc123&x=1", "bad request token=[REDACTED]&x=1"),
            (r#"{"password": "hunter2"}"#, r#"{"password": "[REDACTED]"}"#),
            ("nothing secret here", "nothing secret here"),
        ];

        for (input, expected) in cases {
            assert_eq!(redact(input), expected, "{input}");
        }
    }

    #[test]
    fn classified_messages_are_redacted() {
        let failure = Failure::from_response(
            401,
            r#"{"error":{"message":"Incorrect API key provided: sk-live-0123456789abcdef","code":"invalid_api_key"}}"#,
        );
        let err = classify(&failure, &RequestId::from("r"));
        assert!(!err.message.contains("0123456789abcdef"));
        assert!(err.message.contains("[REDACTED]"));
    }

    #[test]
    fn log_descriptions_are_redacted() {
        let failure = Failure::from_response(
            401,
            r#"{"error":{"message":"Incorrect API key provided: sk-live-0123456789abcdef","code":"invalid_api_key"}}"#,
        );
        let logged = failure.redacted();
        assert!(!logged.contains("0123456789abcdef"));
        assert!(logged.starts_with("HTTP 401 (invalid_api_key)"));

        let transport = Failure::Transport("error sending request: Bearer sk-abcdefgh1234".to_owned());
        assert!(!transport.redacted().contains("sk-abcdefgh1234"));
        assert_eq!(Failure::Timeout.redacted(), "deadline exceeded");
    }

    #[test]
    fn long_messages_are_truncated() {
        let err = classify(&Failure::from_response(400, &"x".repeat(4096)), &RequestId::from("r"));
        assert!(err.message.len() <= MAX_MESSAGE_LEN + 3);
        assert!(err.message.ends_with("..."));
    }
}
