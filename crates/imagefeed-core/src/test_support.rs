//! In-memory transport used by unit tests to control when each call completes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{oneshot, Notify};
use url::Url;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::MemoryCredentialStore;
use crate::config::ApiConfig;

pub(crate) type Reply = Result<ApiResponse, TransportError>;
type Responder = Box<dyn Fn(&ApiRequest) -> Reply + Send + Sync>;

/// Records every request. Gated transports park each call until the test
/// replies to it; replying transports answer immediately.
pub(crate) struct ScriptedTransport {
    state: Mutex<ScriptState>,
    arrived: Notify,
    responder: Option<Responder>,
}

#[derive(Default)]
struct ScriptState {
    requests: Vec<ApiRequest>,
    pending: Vec<(usize, oneshot::Sender<Reply>)>,
}

impl ScriptedTransport {
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ScriptState::default()),
            arrived: Notify::new(),
            responder: None,
        })
    }

    pub(crate) fn replying<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            state: Mutex::new(ScriptState::default()),
            arrived: Notify::new(),
            responder: Some(Box::new(responder)),
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub(crate) fn request(&self, call: usize) -> ApiRequest {
        self.state.lock().unwrap().requests[call].clone()
    }

    pub(crate) fn find_call<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ApiRequest) -> bool,
    {
        let state = self.state.lock().unwrap();
        state
            .requests
            .iter()
            .position(|request| predicate(request))
            .expect("no matching call")
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Complete call number `call`. Returns `false` when the caller already went away.
    pub(crate) fn reply(&self, call: usize, reply: Reply) -> bool {
        let sender = {
            let mut state = self.state.lock().unwrap();
            let position = state
                .pending
                .iter()
                .position(|(index, _)| *index == call)
                .unwrap_or_else(|| panic!("call {call} is not pending"));
            state.pending.remove(position).1
        };
        sender.send(reply).is_ok()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            let call = state.requests.len();
            state.requests.push(request.clone());
            match &self.responder {
                Some(responder) => {
                    drop(state);
                    self.arrived.notify_waiters();
                    return responder(&request);
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    state.pending.push((call, tx));
                    rx
                }
            }
        };
        self.arrived.notify_waiters();
        receiver.await.unwrap_or(Err(TransportError::Cancelled))
    }
}

pub(crate) fn json_reply(value: serde_json::Value) -> Reply {
    Ok(ApiResponse::new(StatusCode::OK, value.to_string()))
}

pub(crate) fn status_reply(status: u16, body: &str) -> Reply {
    Ok(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        body.to_owned(),
    ))
}

pub(crate) fn test_config() -> ApiConfig {
    ApiConfig::new("access-key", "secret-key")
        .with_api_base(Url::parse("https://api.test").unwrap())
        .with_oauth_base(Url::parse("https://auth.test").unwrap())
}

pub(crate) fn store_with_token(token: &str) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_token(token))
}

/// One Unsplash photo record as returned by `GET /photos`.
pub(crate) fn photo_json(id: &str, liked: bool) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "created_at": "2024-05-03T11:00:28-04:00",
        "width": 4000,
        "height": 3000,
        "liked_by_user": liked,
        "description": format!("photo {id}"),
        "urls": {
            "raw": format!("https://images.test/{id}/raw"),
            "full": format!("https://images.test/{id}/full"),
            "regular": format!("https://images.test/{id}/regular"),
            "small": format!("https://images.test/{id}/small"),
            "thumb": format!("https://images.test/{id}/thumb")
        }
    })
}

pub(crate) fn page_json(ids: &[&str]) -> serde_json::Value {
    serde_json::Value::Array(ids.iter().map(|id| photo_json(id, false)).collect())
}
