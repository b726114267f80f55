use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
///
/// `Clone` so that one failed in-flight translation can be handed to every
/// request that joined it.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// The catalog holds names this service cannot tell apart
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Generation timed out: {0}")]
    GenerationTimeout(String),

    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Export refused: {0}")]
    ExportRefused(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures of an external dependency; the caller may retry
    /// the same request without penalty.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::GenerationTimeout(_) | AppError::ProviderUnavailable(_)
        )
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, mut error_detail) = match self {
            AppError::SchemaUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new("SCHEMA_UNAVAILABLE", msg)
                    .with_details("The table catalog could not be read. Check that the database is reachable."),
            ),
            AppError::SchemaConflict(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("SCHEMA_CONFLICT", msg)
                    .with_details("The table has columns that differ only in case."),
            ),
            AppError::GenerationTimeout(msg) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorDetail::new("GENERATION_TIMEOUT", msg)
                    .with_details("The code generator did not answer in time. Please try again."),
            ),
            AppError::ProviderUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("PROVIDER_UNAVAILABLE", msg),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::ExportRefused(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail::new("EXPORT_REFUSED", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };
        error_detail.retryable = retryable;

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Store failures are always surfaced as an unavailable schema catalog
impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        AppError::SchemaUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_format() {
        let error = AppError::NotFound("Translation not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_transient_errors_map_to_gateway_statuses() {
        let timeout = AppError::GenerationTimeout("30s".to_string());
        assert!(timeout.is_retryable());
        assert_eq!(timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);

        let provider = AppError::ProviderUnavailable("connection refused".to_string());
        assert!(provider.is_retryable());
        assert_eq!(provider.into_response().status(), StatusCode::BAD_GATEWAY);

        let schema = AppError::SchemaUnavailable("pool closed".to_string());
        assert!(!schema.is_retryable());
        assert_eq!(schema.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    async fn body_of(error: AppError) -> serde_json::Value {
        let response = error.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_retryable_flag_follows_error_kind() {
        let body = body_of(AppError::ProviderUnavailable("gateway returned 503".to_string())).await;
        assert_eq!(body["error"]["code"], "PROVIDER_UNAVAILABLE");
        assert_eq!(body["error"]["message"], "gateway returned 503");
        assert_eq!(body["error"]["retryable"], true);

        let body = body_of(AppError::GenerationTimeout("30s".to_string())).await;
        assert_eq!(body["error"]["retryable"], true);

        for error in [
            AppError::SchemaUnavailable("pool closed".to_string()),
            AppError::Validation("empty prompt".to_string()),
            AppError::ExportRefused("rejected".to_string()),
            AppError::Internal("boom".to_string()),
        ] {
            let body = body_of(error).await;
            assert_eq!(body["error"]["retryable"], false);
        }
    }

    #[test]
    fn test_schema_conflict_is_a_server_error() {
        let response = AppError::SchemaConflict("Amount/amount".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_export_refusal_is_conflict() {
        let response = AppError::ExportRefused("rejected".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(!detail.retryable);
        assert!(detail.details.is_none());
    }
}
