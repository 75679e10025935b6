use axum::http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use gatehouse_core::CoreError;

use crate::context::{RequestId, REQUEST_ID_HEADER};

/// Failure raised by a pipeline stage or the terminal handler.
///
/// Nothing writes an error body directly; every `ApiError` is turned into a
/// response by [`ErrorRenderer`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Caller-facing 4xx failure; the message is shown as-is.
    #[error("{message}")]
    Client {
        status: StatusCode,
        message: String,
        details: Option<serde_json::Value>,
    },
    /// Raised by the rate gate only.
    #[error("rate limit exceeded")]
    AdmissionDenied { retry_after_secs: u64 },
    /// Unexpected failure; `detail` is exposed only in debug mode.
    #[error("internal error: {detail}")]
    Internal { detail: String },
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    #[error("server is shutting down")]
    ShuttingDown,
}

impl ApiError {
    pub fn client(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError::Client {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::client(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::client(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::client(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal {
            detail: detail.into(),
        }
    }

    /// Attaches structured details (e.g. per-field validation failures) to a client error.
    pub fn with_details(self, value: serde_json::Value) -> Self {
        match self {
            ApiError::Client {
                status, message, ..
            } => ApiError::Client {
                status,
                message,
                details: Some(value),
            },
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Client { status, .. } => *status,
            ApiError::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::DeadlineExceeded | ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Client { message, .. } => message.clone(),
            ApiError::AdmissionDenied { .. } => "Rate limit exceeded".to_string(),
            ApiError::Internal { .. } => "Internal server error".to_string(),
            ApiError::DeadlineExceeded => "Request timed out".to_string(),
            ApiError::ShuttingDown => "Server is shutting down".to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::internal(format!("{e:#}"))
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

/// JSON envelope shared by every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The single error-normalization step of the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRenderer {
    debug: bool,
}

impl ErrorRenderer {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn render(&self, request_id: &RequestId, err: ApiError) -> Response {
        let status = err.status();

        if status.is_server_error() {
            tracing::error!(request_id = %request_id, status = status.as_u16(), error = %err, "request error");
        } else {
            tracing::warn!(request_id = %request_id, status = status.as_u16(), error = %err, "request error");
        }

        let message = err.public_message();
        let retry_after = match &err {
            ApiError::AdmissionDenied { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let details = if self.debug {
            match err {
                ApiError::Client { details, .. } => details,
                ApiError::Internal { detail } => Some(serde_json::json!({ "error": detail })),
                _ => None,
            }
        } else {
            None
        };

        let body = ErrorBody {
            code: status.as_u16(),
            message,
            request_id: request_id.to_string(),
            details,
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        if let Some(secs) = retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn admission_denied_has_retry_after() {
        let id = RequestId::generate();
        let response = ErrorRenderer::new(false)
            .render(&id, ApiError::AdmissionDenied { retry_after_secs: 60 });

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "60");
        assert_eq!(response.headers()[REQUEST_ID_HEADER], id.as_str());

        let body = body_json(response).await;
        assert_eq!(body["code"], 429);
        assert_eq!(body["message"], "Rate limit exceeded");
        assert_eq!(body["request_id"], id.as_str());
    }

    #[tokio::test]
    async fn internal_detail_hidden_outside_debug() {
        let id = RequestId::generate();
        let response =
            ErrorRenderer::new(false).render(&id, ApiError::internal("db connection reset"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("details").is_none());
        assert!(!body.to_string().contains("db connection reset"));
    }

    #[tokio::test]
    async fn internal_detail_shown_in_debug() {
        let id = RequestId::generate();
        let response =
            ErrorRenderer::new(true).render(&id, ApiError::internal("db connection reset"));

        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["details"]["error"], "db connection reset");
    }

    #[tokio::test]
    async fn client_error_keeps_message() {
        let id = RequestId::generate();
        let err = ApiError::bad_request("validation failed")
            .with_details(serde_json::json!({ "email": "required" }));

        let response = ErrorRenderer::new(false).render(&id, err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert_eq!(body["message"], "validation failed");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn client_details_shown_in_debug() {
        let id = RequestId::generate();
        let err = ApiError::bad_request("validation failed")
            .with_details(serde_json::json!({ "email": "required" }));

        let body = body_json(ErrorRenderer::new(true).render(&id, err)).await;
        assert_eq!(body["details"]["email"], "required");
    }

    #[test]
    fn timeouts_and_shutdown_are_service_unavailable() {
        assert_eq!(ApiError::DeadlineExceeded.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::ShuttingDown.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn anyhow_maps_to_internal() {
        let err: ApiError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, ApiError::Internal { ref detail } if detail == "boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn with_details_ignores_non_client_errors() {
        let err = ApiError::ShuttingDown.with_details(serde_json::json!({}));
        assert!(matches!(err, ApiError::ShuttingDown));
    }
}
