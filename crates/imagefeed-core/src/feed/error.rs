use thiserror::Error;

use crate::api::ApiError;
use crate::auth::StoreError;

/// Errors surfaced by the photo feed cache.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("no access token available")]
    MissingCredential,
    #[error("operation cancelled by feed reset")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("credential store error: {0}")]
    Storage(String),
}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        FeedError::Storage(err.to_string())
    }
}
