//! HTTP error responses.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::AuthDenial;
use crate::drinks::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthDenial),

    #[error("resource not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Auth(denial) => denial.kind.status_code(),
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Fixed message for each status the API answers with.
fn message_for(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "resource not found",
        StatusCode::METHOD_NOT_ALLOWED => "method not allowed",
        StatusCode::UNPROCESSABLE_ENTITY => "unprocessable",
        _ => "internal server error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "success": false,
            "error": status.as_u16(),
            "message": message_for(status),
        });

        match self {
            ApiError::Auth(denial) => {
                body["code"] = json!(denial.kind.code());
                body["description"] = json!(denial.detail);
            }
            ApiError::Unprocessable(detail) => {
                debug!(detail = %detail, "Rejecting unprocessable request");
            }
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Request failed");
            }
            ApiError::NotFound | ApiError::MethodNotAllowed => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::DuplicateTitle(title) => {
                ApiError::Unprocessable(format!("a drink titled '{}' already exists", title))
            }
            StoreError::Storage(e) => ApiError::Internal(format!("{:#}", e)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::AuthFailureKind;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_auth_error_body() {
        let denial = AuthDenial::new(AuthFailureKind::Expired, "ExpiredSignature");
        let (status, body) = body_of(denial.into()).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body,
            json!({
                "success": false,
                "error": 401,
                "message": "unauthorized",
                "code": "token_expired",
                "description": "ExpiredSignature"
            })
        );
    }

    #[tokio::test]
    async fn test_permission_denied_is_forbidden() {
        let denial = AuthDenial::new(AuthFailureKind::PermissionDenied, "nope");
        let (status, body) = body_of(denial.into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "forbidden");
        assert_eq!(body["code"], "permission_denied");
    }

    #[tokio::test]
    async fn test_key_failure_is_internal() {
        let denial = AuthDenial::new(AuthFailureKind::KeyResolutionFailed, "endpoint down");
        let (status, body) = body_of(denial.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal server error");
    }

    #[tokio::test]
    async fn test_store_errors() {
        let (status, body) = body_of(StoreError::NotFound(3).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"success": false, "error": 404, "message": "resource not found"})
        );

        let (status, body) = body_of(StoreError::DuplicateTitle("water".to_string()).into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "unprocessable");

        let (status, _) =
            body_of(StoreError::Storage(anyhow::anyhow!("disk full")).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
