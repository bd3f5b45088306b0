use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::api::{self, ApiRequest, Transport};
use crate::auth::CredentialStore;
use crate::config::ApiConfig;
use crate::sync::MutexExt;

use super::model::ProfileResult;
use super::{LatestRequest, Profile, ProfileError};

/// Loads and caches the signed-in user's profile (`GET /me`).
#[derive(Clone)]
pub struct ProfileService {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    config: ApiConfig,
    state: Mutex<ProfileState>,
}

#[derive(Default)]
struct ProfileState {
    profile: Option<Profile>,
    request: LatestRequest,
}

impl ProfileService {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        config: ApiConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                config,
                state: Mutex::new(ProfileState::default()),
            }),
        }
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.lock_or_recover().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock_or_recover().request.is_active()
    }

    /// Fetch the profile, aborting any earlier fetch that is still running.
    pub async fn fetch_profile(&self) -> Result<Profile, ProfileError> {
        let receiver = self.start()?;
        receiver.await.unwrap_or(Err(ProfileError::Cancelled))
    }

    pub fn reset(&self) {
        let mut state = self.inner.state.lock_or_recover();
        state.request.cancel();
        state.profile = None;
    }

    fn start(&self) -> Result<oneshot::Receiver<Result<Profile, ProfileError>>, ProfileError> {
        let token = self
            .inner
            .store
            .token()?
            .ok_or(ProfileError::MissingCredential)?;
        let request = ApiRequest::get(self.inner.config.api_url(&["me"]))
            .accept_json()
            .bearer(&token);

        let mut state = self.inner.state.lock_or_recover();
        let op = state.request.begin();
        let (sender, receiver) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let loaded = inner.load(request).await;
            let outcome = inner.complete(op, loaded);
            let _ = sender.send(outcome);
        });
        state.request.attach(op, task);
        Ok(receiver)
    }
}

impl Inner {
    async fn load(&self, request: ApiRequest) -> Result<Profile, ProfileError> {
        let body = api::send(self.transport.as_ref(), request).await?;
        let result: ProfileResult = api::decode(&body)?;
        Ok(result.into())
    }

    fn complete(
        &self,
        op: u64,
        loaded: Result<Profile, ProfileError>,
    ) -> Result<Profile, ProfileError> {
        let mut state = self.state.lock_or_recover();
        if !state.request.finish(op) {
            return Err(ProfileError::Cancelled);
        }
        match loaded {
            Ok(profile) => {
                state.profile = Some(profile.clone());
                Ok(profile)
            }
            Err(err) => {
                tracing::warn!(error = %err, "profile request failed");
                Err(err)
            }
        }
    }
}
