//! Service error taxonomy and its HTTP mapping.
//!
//! Every core operation fails fast with one of these variants; handlers
//! bubble them up with `?` and the `IntoResponse` impl maps them onto
//! status codes. Storage failures are logged and surfaced as a generic
//! 500 body rather than echoing backend details to the caller.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::review::repository::RepositoryError;
use crate::review::state::ContributionStatus;
use crate::review::transition::ReviewAction;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input; user-correctable.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown record id.
    #[error("contribution {0} not found")]
    NotFound(String),

    /// Illegal state change, including losing a concurrent review race.
    #[error("cannot {action} a contribution in state {from}")]
    InvalidTransition {
        action: ReviewAction,
        from: ContributionStatus,
    },

    /// Authenticated principal lacks the required capability.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Admission denied by the rate guard.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Persistence layer failure.
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Storage(e) => {
                error!("storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));

        if let AppError::RateLimited { retry_after_secs } = &self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                AppError::Validation("bad amount".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::NotFound("abc".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::InvalidTransition {
                    action: ReviewAction::Approve,
                    from: ContributionStatus::Approved,
                },
                StatusCode::CONFLICT,
            ),
            (
                AppError::Forbidden("reviewer role required".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::RateLimited {
                    retry_after_secs: 900,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AppError::Storage(RepositoryError::storage("get", "disk gone")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = err.into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_rate_limited_carries_retry_after_header() {
        let response = AppError::RateLimited {
            retry_after_secs: 900,
        }
        .into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "900"
        );
    }

    #[test]
    fn test_storage_error_does_not_leak_details() {
        let response =
            AppError::Storage(RepositoryError::storage("insert", "secret path /var/db")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
