//! The error taxonomy: every handler returns `Result<_, ApiError>`, and
//! `ApiError` is the single place that decides what crosses the wire.
//! Internal error text never reaches a response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("upstream unavailable")]
    UpstreamUnavailable,
    #[error("upstream timeout")]
    UpstreamTimeout,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation", self.to_string()),
            ApiError::Unavailable(reason) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", reason.clone()),
            ApiError::UpstreamUnavailable => (StatusCode::BAD_GATEWAY, "upstream_unavailable", self.to_string()),
            ApiError::UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", self.to_string()),
            ApiError::Internal(err) => {
                error!(%err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<fabric_domain_identity::RepositoryError> for ApiError {
    fn from(err: fabric_domain_identity::RepositoryError) -> Self {
        match err {
            fabric_domain_identity::RepositoryError::NotFound => ApiError::NotFound,
            fabric_domain_identity::RepositoryError::Conflict(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<fabric_domain_notification::repository::RepositoryError> for ApiError {
    fn from(_: fabric_domain_notification::repository::RepositoryError) -> Self {
        ApiError::NotFound
    }
}

impl From<fabric_infra_persistence::NetworkStoreError> for ApiError {
    fn from(_: fabric_infra_persistence::NetworkStoreError) -> Self {
        ApiError::NotFound
    }
}

impl From<fabric_core_token::TokenError> for ApiError {
    fn from(_: fabric_core_token::TokenError) -> Self {
        ApiError::Unauthenticated
    }
}

impl From<fabric_infra_upstream::UpstreamError> for ApiError {
    fn from(err: fabric_infra_upstream::UpstreamError) -> Self {
        match err {
            fabric_infra_upstream::UpstreamError::Timeout(_) => ApiError::UpstreamTimeout,
            _ => ApiError::UpstreamUnavailable,
        }
    }
}
