use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;

/// Errors delivered to callers of the token exchange.
///
/// Cloneable because one exchange outcome is fanned out to every waiter.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("token exchange superseded by a newer request")]
    Superseded,
    #[error("cannot build token request: {0}")]
    InvalidRequest(String),
    #[error("failed to persist token: {0}")]
    Storage(String),
    #[error("authorization request denied ({0})")]
    AccessDenied(String),
    #[error("authorization response missing code parameter")]
    MissingAuthorizationCode,
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Errors raised by credential stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
