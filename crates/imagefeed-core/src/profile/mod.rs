mod avatar;
mod model;
mod service;

pub use avatar::ProfileImageService;
pub use model::Profile;
pub use service::ProfileService;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::api::ApiError;
use crate::auth::StoreError;

/// Errors surfaced by the profile services.
#[derive(Debug, Clone, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("no access token available")]
    MissingCredential,
    #[error("request replaced by a newer one or cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("credential store error: {0}")]
    Storage(String),
}

impl From<StoreError> for ProfileError {
    fn from(err: StoreError) -> Self {
        ProfileError::Storage(err.to_string())
    }
}

/// Tracks the one request a service keeps alive; starting a new one aborts the old.
#[derive(Default)]
struct LatestRequest {
    op_counter: u64,
    current: Option<(u64, JoinHandle<()>)>,
}

impl LatestRequest {
    fn begin(&mut self) -> u64 {
        self.cancel();
        self.op_counter += 1;
        self.op_counter
    }

    fn attach(&mut self, op: u64, task: JoinHandle<()>) {
        self.current = Some((op, task));
    }

    /// Returns `true` when `op` is still the live request.
    fn finish(&mut self, op: u64) -> bool {
        if self.current.as_ref().map(|(current, _)| *current) != Some(op) {
            return false;
        }
        self.current = None;
        true
    }

    fn cancel(&mut self) {
        if let Some((_, task)) = self.current.take() {
            task.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.current.is_some()
    }
}
