use crate::orchestrator::OrchestratorError;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

pub(crate) const TRACE_HEADER: &str = "x-trace-id";
pub(crate) const ERROR_CODE_HEADER: &str = "x-error-code";

pub(crate) const INVALID_REQUEST_BODY: &str = "Invalid Request Body";
pub(crate) const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

pub(crate) fn status_for_error_code(code: &str) -> StatusCode {
    let normalized = code.trim().to_ascii_uppercase();
    match normalized.as_str() {
        "VALIDATION_ERROR" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
        "PROJECT_NOT_FOUND" | "CHAT_NOT_FOUND" | "FILE_NOT_FOUND" | "NOT_FOUND" => {
            StatusCode::NOT_FOUND
        }
        "PROJECT_BUSY" => StatusCode::CONFLICT,
        "PARTIAL_RUN_FAILURE" => StatusCode::BAD_GATEWAY,
        "UPSTREAM_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
    detail: Option<Value>,
) -> Response {
    let trace_id = format!("err_{}", Uuid::new_v4().simple());
    let mut payload = json!({
        "success": false,
        "error": message.into(),
        "code": code,
    });
    if let Some(detail) = detail {
        payload["detail"] = detail;
    }

    let mut response = (status, Json(payload)).into_response();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(code) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(ERROR_CODE_HEADER), value);
    }
    response
}

/// Maps an orchestrator failure onto the JSON error envelope. Internal
/// details stay in the log.
pub(crate) fn orchestrator_error_response(err: OrchestratorError) -> Response {
    let status = status_for_error_code(err.code());
    if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
        warn!(code = err.code(), "request failed: {}", err.message());
    }
    match status {
        StatusCode::INTERNAL_SERVER_ERROR => {
            error_response(status, err.code(), INTERNAL_SERVER_ERROR, None)
        }
        StatusCode::BAD_REQUEST => error_response(
            status,
            err.code(),
            INVALID_REQUEST_BODY,
            err.detail().cloned(),
        ),
        _ => error_response(
            status,
            err.code(),
            err.message(),
            err.detail().cloned(),
        ),
    }
}

pub(crate) fn invalid_request(reason: impl std::fmt::Display) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "VALIDATION_ERROR",
        INVALID_REQUEST_BODY,
        Some(json!({ "reason": reason.to_string() })),
    )
}
