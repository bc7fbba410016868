use http::StatusCode;

/// The error taxonomy from the routing/resilience pipeline (by kind, not by
/// the crate that raised it). Maps 1:1 onto an HTTP status for the client
/// response.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("no eligible provider for this request")]
    NoEligibleProvider,

    #[error("all providers rate-limited")]
    RateLimitExhausted,

    #[error("retry deadline exceeded")]
    RetryTimeout,

    #[error("max retries exhausted: {0}")]
    MaxRetries(String),

    #[error("upstream error ({status}): {body}")]
    UpstreamError { status: u16, body: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::ModelNotFound(_)
            | CoreError::NoEligibleProvider
            | CoreError::RateLimitExhausted
            | CoreError::RetryTimeout
            | CoreError::MaxRetries(_)
            | CoreError::UpstreamError { .. }
            | CoreError::Storage(_)
            | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
