//! Client-facing error and denial bodies

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::{Value, json};
use tollgate_core::Feature;
use tollgate_ledger::Denial;
use tollgate_provider::StructuredError;

/// `{error: {type, message, requestId, category, retryable, code?}}`
pub fn error_body(error: &StructuredError) -> Value {
    let mut body = json!({
        "type": error.kind.as_str(),
        "message": error.message,
        "requestId": error.request_id.as_str(),
        "category": error.category().as_str(),
        "retryable": error.is_retryable(),
    });
    if let Some(code) = error.code {
        body["code"] = json!(code);
    }
    json!({ "error": body })
}

pub fn structured_response(error: &StructuredError) -> Response {
    (error.http_status(), Json(error_body(error))).into_response()
}

/// `{code, feature, message}`
pub fn denial_body(denial: Denial, feature: Feature) -> Value {
    json!({
        "code": denial.code(),
        "feature": feature,
        "message": denial.message(feature),
    })
}

pub fn denial_response(denial: Denial, feature: Feature) -> Response {
    (StatusCode::FORBIDDEN, Json(denial_body(denial, feature))).into_response()
}
