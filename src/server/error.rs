//! API error handling

use crate::error::PicvoiceError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    fn error_type(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::SERVICE_UNAVAILABLE => "overloaded_error",
            StatusCode::GATEWAY_TIMEOUT => "timeout_error",
            StatusCode::BAD_GATEWAY => "synthesis_error",
            _ => "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "type": self.error_type(),
                "code": self.status.as_str()
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<PicvoiceError> for ApiError {
    fn from(err: PicvoiceError) -> Self {
        let status = match &err {
            PicvoiceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            PicvoiceError::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PicvoiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PicvoiceError::Synthesis { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}
