//! API error type and its HTTP rendering.
//!
//! Every error renders as `{error, detail, field_errors?}` with the status
//! code the error kind dictates. Internal details are logged, never sent to
//! the client.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid input data")]
    Validation { field_errors: FieldErrors },
    #[error("{detail}")]
    BadRequest { detail: String },
    #[error("{detail}")]
    AuthFailed { detail: String },
    #[error("Forbidden")]
    Forbidden,
    #[error("{detail}")]
    NotFound { detail: String },
    #[error("{detail}")]
    Conflict { detail: String },
    #[error("Quota exceeded")]
    QuotaExceeded,
    #[error("Too many requests. Please try again later")]
    RateLimited { retry_after: i64 },
    #[error("Internal server error")]
    Internal { detail: String },
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            detail: err.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::AuthFailed { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<eyre::Report> for ApiError {
    fn from(report: eyre::Report) -> Self {
        ApiError::Internal {
            detail: format!("{:#}", report),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal {
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (title, field_errors) = match &self {
            ApiError::Validation { field_errors } => {
                ("Validation Error".to_string(), Some(field_errors.clone()))
            }
            _ => (
                status
                    .canonical_reason()
                    .unwrap_or("Error")
                    .to_string(),
                None,
            ),
        };

        let detail = match &self {
            ApiError::Internal { detail } => {
                error!(detail = %detail, "internal API error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: title,
            detail,
            field_errors,
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation {
                field_errors: FieldErrors::new()
            }
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::BadRequest { detail: "x".into() }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AuthFailed { detail: "x".into() }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::NotFound { detail: "x".into() }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict { detail: "x".into() }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::QuotaExceeded.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::RateLimited { retry_after: 30 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after_header() {
        let response = ApiError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from(42i64)
        );
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let response = ApiError::internal("database password is hunter2").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Body is rebuilt with a generic detail; the original stays in logs
    }
}
