use reqwest::StatusCode;
use thiserror::Error;

/// Failure reported by a [`Transport`](super::Transport) before any HTTP status is available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

/// Errors shared by every request the core issues.
///
/// Cloneable so a single outcome can be fanned out to several waiters.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("HTTP status {status} body: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}
