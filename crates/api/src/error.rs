//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courierpress_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            // Internal failures never leak details to the client
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::WebhookPayloadInvalid(msg) => ApiError::BadRequest(msg),
            BillingError::InvalidPriceId(id) => {
                ApiError::BadRequest(format!("Unknown price id: {id}"))
            }
            BillingError::NotConfigured(msg) => {
                tracing::error!(error = %msg, "Billing not configured");
                ApiError::Internal("Billing is not available".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failures_map_to_bad_request() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn unknown_price_ids_map_to_bad_request() {
        let err: ApiError = BillingError::InvalidPriceId("price_x".to_string()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn missing_resources_map_to_404_not_500() {
        let response = ApiError::NotFound("Article not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn stripe_failures_map_to_internal() {
        let err: ApiError = BillingError::Internal("boom".to_string()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
