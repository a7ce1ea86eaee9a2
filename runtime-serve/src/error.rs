//! Maps [`AgentError`] and request-validation failures onto HTTP responses
//! (spec §7 "Propagation policy": callers never see raw stack traces).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use runtime_core::AgentError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self { status, code: code.to_string(), message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let (code, message) = err.code_message();
        let status = match err {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Sandbox(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, code: code.to_string(), message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { code: self.code, message: self.message })).into_response()
    }
}
