use bytes::Bytes;
use gwayrs_common::CoreError;
use http::StatusCode;

/// HTTP-facing error: a status code plus the exact bytes to write as the
/// response body. `CoreError` already knows its status; this just carries
/// it across the router boundary as a `Bytes` payload.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    pub fn bad_request(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: message.into(),
        }
    }

    pub fn not_found(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            body: message.into(),
        }
    }

    pub fn internal(message: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: message.into(),
        }
    }
}

impl From<CoreError> for ProxyError {
    fn from(err: CoreError) -> Self {
        Self {
            status: err.status(),
            body: Bytes::from(err.to_string()),
        }
    }
}
