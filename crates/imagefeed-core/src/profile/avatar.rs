use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, oneshot};

use crate::api::{self, ApiRequest, Transport};
use crate::auth::CredentialStore;
use crate::config::ApiConfig;
use crate::events::{EventBus, ProfileEvent};
use crate::sync::MutexExt;

use super::model::UserResult;
use super::{LatestRequest, ProfileError};

/// Resolves a user's small profile image URL (`GET /users/{username}`).
#[derive(Clone)]
pub struct ProfileImageService {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    config: ApiConfig,
    events: EventBus<ProfileEvent>,
    state: Mutex<AvatarState>,
}

#[derive(Default)]
struct AvatarState {
    avatar_url: Option<String>,
    request: LatestRequest,
}

impl ProfileImageService {
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
                events: EventBus::new(),
                state: Mutex::new(AvatarState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.inner.events.subscribe()
    }

    pub fn avatar_url(&self) -> Option<String> {
        self.inner.state.lock_or_recover().avatar_url.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock_or_recover().request.is_active()
    }

    pub async fn fetch_avatar_url(&self, username: &str) -> Result<String, ProfileError> {
        let receiver = self.start(username)?;
        receiver.await.unwrap_or(Err(ProfileError::Cancelled))
    }

    pub fn reset(&self) {
        let mut state = self.inner.state.lock_or_recover();
        state.request.cancel();
        state.avatar_url = None;
    }

    fn start(
        &self,
        username: &str,
    ) -> Result<oneshot::Receiver<Result<String, ProfileError>>, ProfileError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ProfileError::InvalidRequest("empty username".into()));
        }
        let token = self
            .inner
            .store
            .token()?
            .ok_or(ProfileError::MissingCredential)?;
        let request = ApiRequest::get(self.inner.config.api_url(&["users", username]))
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
    async fn load(&self, request: ApiRequest) -> Result<String, ProfileError> {
        let body = api::send(self.transport.as_ref(), request).await?;
        let user: UserResult = api::decode(&body)?;
        Ok(user.profile_image.small)
    }

    fn complete(
        &self,
        op: u64,
        loaded: Result<String, ProfileError>,
    ) -> Result<String, ProfileError> {
        let mut state = self.state.lock_or_recover();
        if !state.request.finish(op) {
            return Err(ProfileError::Cancelled);
        }
        match loaded {
            Ok(url) => {
                if state.avatar_url.as_deref() != Some(url.as_str()) {
                    state.avatar_url = Some(url.clone());
                    self.events.publish(ProfileEvent::AvatarChanged { url: url.clone() });
                }
                Ok(url)
            }
            Err(err) => {
                tracing::warn!(error = %err, "profile image request failed");
                Err(err)
            }
        }
    }
}
