//! Error types for bbx-billing
//!
//! One taxonomy for every component; the HTTP mapping lives here so handlers
//! can return `BillingResult<T>` directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bbx_common::api::SignatureError;
use serde_json::json;
use thiserror::Error;

/// Billing error type
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed or missing fields (400, nothing mutated)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Webhook signature rejected (400, rejected before any handler runs)
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Monthly generation limit reached
    #[error("Monthly song limit reached on plan '{plan}' ({used}/{limit})")]
    QuotaExceeded { plan: String, limit: i64, used: i64 },

    /// Payment provider or document storage failure (500, safe to retry)
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// bbx-common error
    #[error("Common error: {0}")]
    Common(#[from] bbx_common::Error),
}

impl From<SignatureError> for BillingError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::DatabaseError(msg) => BillingError::ExternalService(msg),
            other => BillingError::Authorization(other.to_string()),
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_code, message) = match self {
            BillingError::QuotaExceeded { plan, limit, used } => {
                let body = Json(json!({
                    "error": {
                        "code": "QUOTA_EXCEEDED",
                        "message": message,
                        "plan": plan,
                        "limit": limit,
                        "used": used,
                        "upgrade": true,
                    }
                }));
                return (StatusCode::FORBIDDEN, body).into_response();
            }
            BillingError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            BillingError::Authorization(msg) => {
                (StatusCode::BAD_REQUEST, "AUTHORIZATION_ERROR", msg)
            }
            BillingError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            BillingError::ExternalService(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXTERNAL_SERVICE_ERROR",
                msg,
            ),
            BillingError::Database(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            ),
            BillingError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                err.to_string(),
            ),
            BillingError::Common(bbx_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            BillingError::Common(bbx_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg)
            }
            BillingError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for billing operations and handlers
pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_structured() {
        let response = BillingError::QuotaExceeded {
            plan: "free".to_string(),
            limit: 3,
            used: 3,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
        assert_eq!(body["error"]["plan"], "free");
        assert_eq!(body["error"]["limit"], 3);
        assert_eq!(body["error"]["upgrade"], true);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (BillingError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::Authorization("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                BillingError::ExternalService("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::Common(bbx_common::Error::InvalidInput("x".into())),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_signature_errors_become_authorization() {
        let err: BillingError = SignatureError::InvalidSignature.into();
        assert!(matches!(err, BillingError::Authorization(_)));
    }
}
