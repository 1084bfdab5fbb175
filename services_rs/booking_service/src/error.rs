use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use ticketing_core::DomainError;

/// API error with a stable machine-readable code, so callers can tell
/// "retry later" from "never going to work" from "pick another slot"
/// without string-matching the detail text.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            code,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::InvalidInput(detail) => Self::bad_request(detail.clone()),
            DomainError::NotEligible(detail) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "not_eligible",
                detail.clone(),
            ),
            DomainError::SoldOut => {
                Self::new(StatusCode::CONFLICT, "sold_out", "not enough seats left")
            }
            DomainError::DuplicateRequest => Self::new(
                StatusCode::CONFLICT,
                "duplicate_request",
                "idempotency key reused with different parameters",
            ),
            DomainError::NotFound => Self::not_found("not found"),
            DomainError::Forbidden => Self::forbidden("not allowed"),
            DomainError::InvalidTransition(from) => Self::new(
                StatusCode::CONFLICT,
                "invalid_transition",
                format!("booking is already {from}"),
            ),
            DomainError::StorageTimeout => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "storage_timeout",
                "storage timed out; retry with backoff",
            ),
            DomainError::StorageUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                "storage unavailable; retry with backoff",
            ),
            // Ledger-internal kinds are translated by the lifecycle before
            // they reach a handler; seeing one here is a bug.
            DomainError::CapacityExceeded | DomainError::AlreadyReleased => {
                tracing::error!(error = %err, "unmapped domain error reached the api layer");
                Self::internal("internal error")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    detail: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            error: self.code,
            detail: self.detail.as_str(),
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
