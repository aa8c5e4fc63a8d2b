//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use aicg_models::TaskError;

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP-facing error: the taxonomy code plus an operator-readable
/// message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation",
            message: message.into(),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let status = match &err {
            TaskError::Validation { .. } => StatusCode::BAD_REQUEST,
            TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
            TaskError::Conflict { .. } => StatusCode::CONFLICT,
            TaskError::IncompleteMaterials { .. } => StatusCode::CONFLICT,
            TaskError::Quota { .. } => StatusCode::TOO_MANY_REQUESTS,
            TaskError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error_code": self.code,
            "error_message": self.message,
        }));
        (self.status, body).into_response()
    }
}
