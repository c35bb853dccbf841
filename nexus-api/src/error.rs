//! API error handling.
//!
//! Maps the core error taxonomy onto HTTP statuses. Internal details never
//! reach the client: the message is scrubbed and the original logged.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use nexus_core::error::NexusError;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Wrapper turning `NexusError` into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub NexusError);

impl From<NexusError> for ApiError {
    fn from(err: NexusError) -> Self {
        Self(err)
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            NexusError::Validation { .. } => StatusCode::BAD_REQUEST,
            NexusError::NotFound { .. } => StatusCode::NOT_FOUND,
            NexusError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            NexusError::Forbidden(_) => StatusCode::FORBIDDEN,
            NexusError::Conflict(_) => StatusCode::CONFLICT,
            NexusError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            NexusError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            NexusError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Client closed the request; 499 in the nginx convention
            NexusError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            NexusError::Serialization(_) | NexusError::Config(_) | NexusError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match &self.0 {
            NexusError::Validation { .. } => "VALIDATION",
            NexusError::NotFound { .. } => "NOT_FOUND",
            NexusError::Unauthorized(_) => "UNAUTHORIZED",
            NexusError::Forbidden(_) => "FORBIDDEN",
            NexusError::Conflict(_) => "CONFLICT",
            NexusError::RateLimited { .. } => "RATE_LIMITED",
            NexusError::Unavailable(_) => "UNAVAILABLE",
            NexusError::Timeout(_) => "UNAVAILABLE",
            NexusError::Cancelled => "CANCELLED",
            NexusError::Serialization(_) | NexusError::Config(_) | NexusError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Cancellation carries no body
        if matches!(self.0, NexusError::Cancelled) {
            return status.into_response();
        }

        let (message, field) = match &self.0 {
            NexusError::Validation { field, message } => {
                (message.clone(), Some(field.clone()))
            }
            NexusError::Serialization(_) | NexusError::Config(_) | NexusError::Internal(_) => {
                error!(error = %self.0, "internal error surfaced to API");
                ("internal error".to_string(), None)
            }
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
                field,
            },
        });

        let mut response = (status, body).into_response();
        if let NexusError::RateLimited { retry_after_ms } = &self.0 {
            let secs = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
