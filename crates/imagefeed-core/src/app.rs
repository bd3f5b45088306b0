use std::sync::Arc;

use crate::api::Transport;
use crate::auth::{CredentialStore, StoreError, TokenExchangeCoordinator};
use crate::config::ApiConfig;
use crate::feed::PhotoFeedCache;
use crate::profile::{ProfileImageService, ProfileService};

/// Wires the services of one signed-in session around a shared transport and
/// credential store.
#[derive(Clone)]
pub struct AppServices {
    store: Arc<dyn CredentialStore>,
    config: ApiConfig,
    exchange: TokenExchangeCoordinator,
    feed: PhotoFeedCache,
    profile: ProfileService,
    avatar: ProfileImageService,
}

impl AppServices {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        config: ApiConfig,
    ) -> Self {
        Self {
            exchange: TokenExchangeCoordinator::new(
                Arc::clone(&transport),
                Arc::clone(&store),
                config.clone(),
            ),
            feed: PhotoFeedCache::new(Arc::clone(&transport), Arc::clone(&store), config.clone()),
            profile: ProfileService::new(
                Arc::clone(&transport),
                Arc::clone(&store),
                config.clone(),
            ),
            avatar: ProfileImageService::new(transport, Arc::clone(&store), config.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn exchange(&self) -> &TokenExchangeCoordinator {
        &self.exchange
    }

    pub fn feed(&self) -> &PhotoFeedCache {
        &self.feed
    }

    pub fn profile(&self) -> &ProfileService {
        &self.profile
    }

    pub fn avatar(&self) -> &ProfileImageService {
        &self.avatar
    }

    pub fn is_signed_in(&self) -> Result<bool, StoreError> {
        Ok(self.store.token()?.is_some())
    }

    /// Drop the session: cancel everything in flight, empty the caches and
    /// forget the stored token.
    pub fn logout(&self) -> Result<(), StoreError> {
        self.exchange.cancel_and_reset();
        self.feed.reset();
        self.profile.reset();
        self.avatar.reset();
        self.store.set_token(None)?;
        tracing::info!("signed out");
        Ok(())
    }
}
