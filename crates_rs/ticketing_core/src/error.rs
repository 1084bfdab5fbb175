use thiserror::Error;

/// Domain-rule and infrastructure failures surfaced by the booking core.
///
/// Rule violations are terminal for the request that caused them; only the
/// two storage kinds are worth retrying, and retry policy belongs to the
/// caller.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("sold out")]
    SoldOut,

    #[error("idempotency key reused with different parameters")]
    DuplicateRequest,

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid transition from {0}")]
    InvalidTransition(String),

    #[error("capacity exceeded")]
    CapacityExceeded,

    #[error("hold already released")]
    AlreadyReleased,

    #[error("storage timeout")]
    StorageTimeout,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl DomainError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidInput(detail.into())
    }

    pub fn not_eligible(detail: impl Into<String>) -> Self {
        Self::NotEligible(detail.into())
    }

    /// True for infrastructure failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageTimeout | Self::StorageUnavailable(_))
    }
}
