use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::Method;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::api::{self, ApiRequest, Transport};
use crate::auth::CredentialStore;
use crate::config::ApiConfig;
use crate::events::{EventBus, FeedEvent};
use crate::sync::MutexExt;

use super::photo::PhotoResult;
use super::{FeedError, Photo};

pub const PHOTOS_PER_PAGE: u32 = 10;

type PageOutcome = Result<usize, FeedError>;

/// Handle to an in-flight page fetch.
///
/// Every caller that asks for the next page while a fetch is running gets a
/// handle to that same fetch.
#[derive(Debug, Clone)]
pub struct PageFetch {
    id: u64,
    page: u32,
    outcome: watch::Receiver<Option<PageOutcome>>,
}

impl PageFetch {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 1-based page number being requested.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Wait for the fetch to settle; yields the number of photos appended.
    pub async fn finished(mut self) -> Result<usize, FeedError> {
        let Ok(value) = self.outcome.wait_for(Option::is_some).await else {
            return Err(FeedError::Cancelled);
        };
        Option::clone(&value).unwrap_or(Err(FeedError::Cancelled))
    }
}

impl PartialEq for PageFetch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PageFetch {}

/// In-memory, append-only photo feed backed by the Unsplash list endpoint.
///
/// Pagination is single-flight and like toggles are tracked per photo id.
/// Every mutation publishes a [`FeedEvent`] while the state lock is held, so
/// observers see events in the same order the feed changed.
#[derive(Clone)]
pub struct PhotoFeedCache {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    config: ApiConfig,
    events: EventBus<FeedEvent>,
    state: Mutex<FeedState>,
}

#[derive(Default)]
struct FeedState {
    photos: Vec<Photo>,
    last_loaded_page: Option<u32>,
    op_counter: u64,
    paging: Option<PageTask>,
    likes: HashMap<String, LikeTask>,
}

impl FeedState {
    fn next_op_id(&mut self) -> u64 {
        self.op_counter += 1;
        self.op_counter
    }
}

struct PageTask {
    handle: PageFetch,
    task: JoinHandle<()>,
}

struct LikeTask {
    op_id: u64,
    task: JoinHandle<()>,
}

impl PhotoFeedCache {
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
                state: Mutex::new(FeedState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock_or_recover().paging.is_some()
    }

    pub fn photos(&self) -> Vec<Photo> {
        self.inner.state.lock_or_recover().photos.clone()
    }

    pub fn photo(&self, index: usize) -> Option<Photo> {
        self.inner.state.lock_or_recover().photos.get(index).cloned()
    }

    pub fn photo_count(&self) -> usize {
        self.inner.state.lock_or_recover().photos.len()
    }

    pub fn last_loaded_page(&self) -> Option<u32> {
        self.inner.state.lock_or_recover().last_loaded_page
    }

    pub fn is_liking(&self, photo_id: &str) -> bool {
        self.inner
            .state
            .lock_or_recover()
            .likes
            .contains_key(photo_id)
    }

    fn page_in_flight(&self) -> Option<PageFetch> {
        let state = self.inner.state.lock_or_recover();
        state.paging.as_ref().map(|paging| paging.handle.clone())
    }

    /// Start loading the next page, or join the fetch already in flight.
    ///
    /// Returns `None` when no access token is stored; callers are expected to
    /// authenticate before browsing.
    pub fn fetch_next_page(&self) -> Option<PageFetch> {
        if let Some(handle) = self.page_in_flight() {
            return Some(handle);
        }

        let token = match self.inner.store.token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::error!("cannot fetch photos without an access token");
                return None;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot read access token");
                return None;
            }
        };

        let mut state = self.inner.state.lock_or_recover();
        // The store is read unlocked, so another caller may have started meanwhile.
        if let Some(paging) = &state.paging {
            return Some(paging.handle.clone());
        }

        let page = state.last_loaded_page.unwrap_or(0) + 1;
        let request = page_request(&self.inner.config, &token, page);
        let id = state.next_op_id();
        let (sender, receiver) = watch::channel(None);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let loaded = inner.load_page(request).await;
            let outcome = inner.complete_page(id, page, loaded);
            sender.send_replace(Some(outcome));
        });

        let handle = PageFetch {
            id,
            page,
            outcome: receiver,
        };
        tracing::debug!(page, "fetching photo page");
        state.paging = Some(PageTask {
            handle: handle.clone(),
            task,
        });
        Some(handle)
    }

    /// Like (`is_like == true`) or unlike a photo.
    ///
    /// A request for a photo that already has a like operation in flight
    /// resolves immediately without another network call. On success the
    /// photo's `is_liked` flag is flipped from whatever it was before.
    pub async fn change_like(&self, photo_id: &str, is_like: bool) -> Result<(), FeedError> {
        match self.start_like(photo_id, is_like)? {
            Some(receiver) => receiver.await.unwrap_or(Err(FeedError::Cancelled)),
            None => Ok(()),
        }
    }

    /// Cancel all in-flight work and empty the feed.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock_or_recover();
        if let Some(paging) = state.paging.take() {
            paging.task.abort();
        }
        for (_, like) in state.likes.drain() {
            like.task.abort();
        }
        state.photos.clear();
        state.last_loaded_page = None;
        self.inner.events.publish(FeedEvent::Changed);
        tracing::debug!("photo feed reset");
    }

    fn start_like(
        &self,
        photo_id: &str,
        is_like: bool,
    ) -> Result<Option<oneshot::Receiver<Result<(), FeedError>>>, FeedError> {
        if photo_id.is_empty() {
            return Err(FeedError::InvalidRequest("empty photo id".into()));
        }

        if self.is_liking(photo_id) {
            tracing::debug!(photo = photo_id, "like already in flight");
            return Ok(None);
        }

        let token = self
            .inner
            .store
            .token()?
            .ok_or(FeedError::MissingCredential)?;

        let mut state = self.inner.state.lock_or_recover();
        if state.likes.contains_key(photo_id) {
            tracing::debug!(photo = photo_id, "like already in flight");
            return Ok(None);
        }
        let request = like_request(&self.inner.config, &token, photo_id, is_like);
        let op_id = state.next_op_id();
        let (sender, receiver) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        let id = photo_id.to_owned();
        let task = tokio::spawn(async move {
            let sent = api::send(inner.transport.as_ref(), request)
                .await
                .map(drop)
                .map_err(FeedError::from);
            let outcome = inner.complete_like(&id, op_id, sent);
            let _ = sender.send(outcome);
        });

        state
            .likes
            .insert(photo_id.to_owned(), LikeTask { op_id, task });
        Ok(Some(receiver))
    }
}

impl Inner {
    async fn load_page(&self, request: ApiRequest) -> Result<Vec<Photo>, FeedError> {
        let body = api::send(self.transport.as_ref(), request).await?;
        let results: Vec<PhotoResult> = api::decode(&body)?;
        Ok(results.into_iter().map(Photo::from).collect())
    }

    fn complete_page(
        &self,
        id: u64,
        page: u32,
        loaded: Result<Vec<Photo>, FeedError>,
    ) -> PageOutcome {
        let mut state = self.state.lock_or_recover();
        if state.paging.as_ref().map(|paging| paging.handle.id) != Some(id) {
            tracing::debug!(page, "discarding stale photo page");
            return Err(FeedError::Cancelled);
        }
        state.paging = None;

        match loaded {
            Ok(photos) => {
                let added = photos.len();
                state.photos.extend(photos);
                state.last_loaded_page = Some(page);
                self.events.publish(FeedEvent::Changed);
                tracing::debug!(page, added, total = state.photos.len(), "photo page merged");
                Ok(added)
            }
            Err(err) => {
                tracing::warn!(page, error = %err, "dropping photo page");
                Err(err)
            }
        }
    }

    fn complete_like(
        &self,
        photo_id: &str,
        op_id: u64,
        sent: Result<(), FeedError>,
    ) -> Result<(), FeedError> {
        let mut state = self.state.lock_or_recover();
        match state.likes.get(photo_id) {
            Some(like) if like.op_id == op_id => {
                state.likes.remove(photo_id);
            }
            _ => {
                tracing::debug!(photo = photo_id, "discarding stale like result");
                return Err(FeedError::Cancelled);
            }
        }

        if let Err(err) = sent {
            tracing::warn!(photo = photo_id, error = %err, "like request failed");
            return Err(err);
        }

        match state.photos.iter().position(|photo| photo.id == photo_id) {
            Some(index) => {
                let updated = state.photos[index].with_liked(!state.photos[index].is_liked);
                state.photos[index] = updated;
                self.events.publish(FeedEvent::PhotoUpdated { index });
            }
            None => tracing::debug!(photo = photo_id, "liked photo is not in the feed"),
        }
        Ok(())
    }
}

fn page_request(config: &ApiConfig, token: &str, page: u32) -> ApiRequest {
    let mut url = config.api_url(&["photos"]);
    url.query_pairs_mut()
        .append_pair("page", &page.to_string())
        .append_pair("per_page", &PHOTOS_PER_PAGE.to_string());
    ApiRequest::get(url).accept_json().bearer(token)
}

fn like_request(config: &ApiConfig, token: &str, photo_id: &str, is_like: bool) -> ApiRequest {
    let method = if is_like { Method::POST } else { Method::DELETE };
    let url = config.api_url(&["photos", photo_id, "like"]);
    ApiRequest::new(method, url).accept_json().bearer(token)
}
