use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::{self, ApiRequest, Transport};
use crate::config::ApiConfig;
use crate::sync::MutexExt;

use super::oauth::{token_request, TokenResponse};
use super::{AuthError, CredentialStore};

type ExchangeResult = Result<String, AuthError>;

/// Turns authorization codes into access tokens, one network call per code.
///
/// Concurrent calls for the code currently being exchanged join the in-flight
/// request and all receive its result in the order they arrived. A call with a
/// different code aborts the in-flight request and fails its waiters with
/// [`AuthError::Superseded`]; the last code wins.
#[derive(Clone)]
pub struct TokenExchangeCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    config: ApiConfig,
    state: Mutex<ExchangeState>,
}

#[derive(Default)]
struct ExchangeState {
    epoch: u64,
    /// Bumped by `cancel_and_reset` only; a token persisted across a reset is withdrawn.
    resets: u64,
    current: Option<PendingExchange>,
}

struct PendingExchange {
    code: String,
    epoch: u64,
    waiters: Vec<oneshot::Sender<ExchangeResult>>,
    task: Option<JoinHandle<()>>,
}

impl PendingExchange {
    fn supersede(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::debug!(
            epoch = self.epoch,
            waiters = self.waiters.len(),
            "token exchange superseded"
        );
        for waiter in self.waiters {
            let _ = waiter.send(Err(AuthError::Superseded));
        }
    }
}

impl TokenExchangeCoordinator {
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
                state: Mutex::new(ExchangeState::default()),
            }),
        }
    }

    /// Exchange `code` for an access token and persist it.
    pub async fn exchange(&self, code: &str) -> Result<String, AuthError> {
        let receiver = self.register(code)?;
        // A dropped sender means the task was torn down without a verdict.
        receiver.await.unwrap_or(Err(AuthError::Superseded))
    }

    /// Abort the in-flight exchange, failing its waiters with `Superseded`.
    pub fn cancel_and_reset(&self) {
        let mut state = self.inner.state.lock_or_recover();
        state.epoch += 1;
        state.resets += 1;
        if let Some(previous) = state.current.take() {
            previous.supersede();
        }
    }

    pub fn is_exchanging(&self) -> bool {
        self.inner.state.lock_or_recover().current.is_some()
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        let state = self.inner.state.lock_or_recover();
        state.current.as_ref().map_or(0, |pending| pending.waiters.len())
    }

    fn register(&self, code: &str) -> Result<oneshot::Receiver<ExchangeResult>, AuthError> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.inner.state.lock_or_recover();

        if let Some(current) = state.current.as_mut() {
            if current.code == code {
                current.waiters.push(sender);
                tracing::debug!(
                    epoch = current.epoch,
                    waiters = current.waiters.len(),
                    "joined in-flight token exchange"
                );
                return Ok(receiver);
            }
        }

        let request = token_request(&self.inner.config, code).map_err(|err| {
            tracing::error!(error = %err, "unable to build token request");
            err
        })?;

        if let Some(previous) = state.current.take() {
            previous.supersede();
        }

        state.epoch += 1;
        let epoch = state.epoch;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.fetch_token(request).await;
            inner.complete(epoch, outcome);
        });

        state.current = Some(PendingExchange {
            code: code.to_owned(),
            epoch,
            waiters: vec![sender],
            task: Some(task),
        });
        Ok(receiver)
    }
}

impl Inner {
    /// Write the token outside the state lock, then withdraw it again if a
    /// reset ran in the meantime.
    fn persist(&self, token: String, resets: u64) -> ExchangeResult {
        self.store.set_token(Some(&token))?;
        let state = self.state.lock_or_recover();
        if state.resets != resets {
            self.store.set_token(None)?;
            tracing::debug!("token exchange reset while persisting");
            return Err(AuthError::Superseded);
        }
        Ok(token)
    }

    async fn fetch_token(&self, request: ApiRequest) -> ExchangeResult {
        let body = api::send(self.transport.as_ref(), request).await?;
        let payload: TokenResponse = api::decode(&body)?;
        Ok(payload.access_token)
    }

    fn complete(&self, epoch: u64, outcome: ExchangeResult) {
        let (pending, resets) = {
            let mut state = self.state.lock_or_recover();
            match state.current.take() {
                Some(pending) if pending.epoch == epoch => (pending, state.resets),
                other => {
                    state.current = other;
                    tracing::debug!(epoch, "discarding stale token exchange result");
                    return;
                }
            }
        };

        let outcome = outcome.and_then(|token| self.persist(token, resets));

        match &outcome {
            Ok(_) => tracing::debug!(
                epoch,
                waiters = pending.waiters.len(),
                "token exchange succeeded"
            ),
            Err(err) => tracing::warn!(epoch, error = %err, "token exchange failed"),
        }

        for waiter in pending.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, TransportError};
    use crate::auth::{MemoryCredentialStore, StoreError};
    use crate::test_support::{json_reply, status_reply, test_config, ScriptedTransport};
    use reqwest::StatusCode;
    use std::sync::OnceLock;

    /// Store that calls back into the coordinator each time a token is written.
    struct HookedStore {
        inner: MemoryCredentialStore,
        coordinator: OnceLock<TokenExchangeCoordinator>,
        on_write: fn(&TokenExchangeCoordinator),
        unlocked_writes: Mutex<Vec<bool>>,
    }

    impl CredentialStore for HookedStore {
        fn token(&self) -> Result<Option<String>, StoreError> {
            self.inner.token()
        }

        fn set_token(&self, token: Option<&str>) -> Result<(), StoreError> {
            self.inner.set_token(token)?;
            if let (Some(_), Some(coordinator)) = (token, self.coordinator.get()) {
                let unlocked = coordinator.inner.state.try_lock().is_ok();
                self.unlocked_writes.lock().unwrap().push(unlocked);
                (self.on_write)(coordinator);
            }
            Ok(())
        }
    }

    fn hooked(
        on_write: fn(&TokenExchangeCoordinator),
    ) -> (TokenExchangeCoordinator, Arc<HookedStore>) {
        let transport = ScriptedTransport::replying(|_| {
            json_reply(serde_json::json!({ "access_token": "tok" }))
        });
        let store = Arc::new(HookedStore {
            inner: MemoryCredentialStore::new(),
            coordinator: OnceLock::new(),
            on_write,
            unlocked_writes: Mutex::new(Vec::new()),
        });
        let coordinator = TokenExchangeCoordinator::new(transport, store.clone(), test_config());
        let _ = store.coordinator.set(coordinator.clone());
        (coordinator, store)
    }

    fn setup(
        transport: Arc<ScriptedTransport>,
    ) -> (TokenExchangeCoordinator, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let coordinator = TokenExchangeCoordinator::new(transport, store.clone(), test_config());
        (coordinator, store)
    }

    fn spawn_exchange(
        coordinator: &TokenExchangeCoordinator,
        code: &'static str,
    ) -> JoinHandle<Result<String, AuthError>> {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.exchange(code).await })
    }

    #[tokio::test]
    async fn same_code_is_coalesced_into_one_call() {
        let transport = ScriptedTransport::gated();
        let (coordinator, store) = setup(transport.clone());

        let first = spawn_exchange(&coordinator, "code-a");
        transport.wait_for_calls(1).await;
        let second = spawn_exchange(&coordinator, "code-a");
        let third = spawn_exchange(&coordinator, "code-a");
        while coordinator.waiter_count() < 3 {
            tokio::task::yield_now().await;
        }

        assert!(transport.reply(0, json_reply(serde_json::json!({ "access_token": "tok" }))));

        for handle in [first, second, third] {
            assert_eq!(handle.await.unwrap().unwrap(), "tok");
        }
        assert_eq!(transport.call_count(), 1);
        assert_eq!(store.token().unwrap().as_deref(), Some("tok"));
        assert!(!coordinator.is_exchanging());
    }

    #[tokio::test]
    async fn waiters_joined_synchronously_share_result() {
        let transport = ScriptedTransport::gated();
        let (coordinator, _store) = setup(transport.clone());

        let a = coordinator.register("c").unwrap();
        let b = coordinator.register("c").unwrap();
        transport.wait_for_calls(1).await;
        transport.reply(0, json_reply(serde_json::json!({ "access_token": "t1" })));

        assert_eq!(a.await.unwrap().unwrap(), "t1");
        assert_eq!(b.await.unwrap().unwrap(), "t1");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn different_code_supersedes_previous_waiters() {
        let transport = ScriptedTransport::gated();
        let (coordinator, store) = setup(transport.clone());

        let a1 = coordinator.register("code-a").unwrap();
        let a2 = coordinator.register("code-a").unwrap();
        let b = coordinator.register("code-b").unwrap();

        assert!(matches!(a1.await.unwrap(), Err(AuthError::Superseded)));
        assert!(matches!(a2.await.unwrap(), Err(AuthError::Superseded)));

        transport.wait_for_calls(1).await;
        let body = String::from_utf8(transport.request(0).body.unwrap()).unwrap();
        assert!(body.contains("code=code-b"));

        transport.reply(0, json_reply(serde_json::json!({ "access_token": "tok-b" })));
        assert_eq!(b.await.unwrap().unwrap(), "tok-b");
        assert_eq!(transport.call_count(), 1);
        assert_eq!(store.token().unwrap().as_deref(), Some("tok-b"));
    }

    #[tokio::test]
    async fn superseded_call_result_is_discarded() {
        let transport = ScriptedTransport::gated();
        let (coordinator, store) = setup(transport.clone());

        let a = spawn_exchange(&coordinator, "code-a");
        transport.wait_for_calls(1).await;
        let b = spawn_exchange(&coordinator, "code-b");
        transport.wait_for_calls(2).await;

        assert!(matches!(a.await.unwrap(), Err(AuthError::Superseded)));
        // Even if the aborted call still completes, its result must not be applied.
        let _ = transport.reply(0, json_reply(serde_json::json!({ "access_token": "stale" })));

        transport.reply(1, json_reply(serde_json::json!({ "access_token": "fresh" })));
        assert_eq!(b.await.unwrap().unwrap(), "fresh");
        assert_eq!(store.token().unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn stale_completion_does_not_touch_current_exchange() {
        let transport = ScriptedTransport::gated();
        let (coordinator, store) = setup(transport.clone());

        let _a = coordinator.register("code-a").unwrap();
        let b = coordinator.register("code-b").unwrap();

        coordinator.inner.complete(1, Ok("stale".into()));
        assert!(coordinator.is_exchanging());
        assert_eq!(store.token().unwrap(), None);

        transport.wait_for_calls(1).await;
        transport.reply(0, json_reply(serde_json::json!({ "access_token": "fresh" })));
        assert_eq!(b.await.unwrap().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn http_status_failure_reaches_every_waiter() {
        let transport = ScriptedTransport::gated();
        let (coordinator, store) = setup(transport.clone());

        let a = coordinator.register("code").unwrap();
        let b = coordinator.register("code").unwrap();
        transport.wait_for_calls(1).await;
        transport.reply(0, status_reply(400, "invalid_grant"));

        for receiver in [a, b] {
            match receiver.await.unwrap() {
                Err(AuthError::Api(ApiError::HttpStatus { status, body })) => {
                    assert_eq!(status, StatusCode::BAD_REQUEST);
                    assert_eq!(body, "invalid_grant");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(store.token().unwrap(), None);
        assert!(!coordinator.is_exchanging());
    }

    #[tokio::test]
    async fn transport_failure_is_delivered() {
        let transport = ScriptedTransport::replying(|_| {
            Err(TransportError::Connection("offline".into()))
        });
        let (coordinator, _store) = setup(transport);
        let err = coordinator.exchange("code").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Api(ApiError::Transport(TransportError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn decode_failure_clears_state() {
        let transport =
            ScriptedTransport::replying(|_| json_reply(serde_json::json!({ "token": "x" })));
        let (coordinator, store) = setup(transport.clone());

        let err = coordinator.exchange("code").await.unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::Decode(_))));
        assert!(!coordinator.is_exchanging());
        assert_eq!(store.token().unwrap(), None);

        // The next call starts fresh even with the same code.
        let _ = coordinator.exchange("code").await;
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn invalid_request_leaves_in_flight_exchange_alone() {
        let transport = ScriptedTransport::gated();
        let (coordinator, _store) = setup(transport.clone());

        let pending = coordinator.register("code-a").unwrap();
        let err = coordinator.exchange("   ").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
        assert!(coordinator.is_exchanging());

        transport.wait_for_calls(1).await;
        transport.reply(0, json_reply(serde_json::json!({ "access_token": "ok" })));
        assert_eq!(pending.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn cancel_and_reset_fails_pending_waiters() {
        let transport = ScriptedTransport::gated();
        let (coordinator, store) = setup(transport.clone());

        let waiter = spawn_exchange(&coordinator, "code");
        transport.wait_for_calls(1).await;
        coordinator.cancel_and_reset();

        assert!(matches!(waiter.await.unwrap(), Err(AuthError::Superseded)));
        assert!(!coordinator.is_exchanging());
        assert_eq!(store.token().unwrap(), None);
    }

    #[tokio::test]
    async fn token_is_written_without_holding_the_state_lock() {
        let (coordinator, store) = hooked(|_| {});

        assert_eq!(coordinator.exchange("code").await.unwrap(), "tok");
        assert_eq!(*store.unlocked_writes.lock().unwrap(), vec![true]);
        assert_eq!(store.token().unwrap().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn reset_during_persist_withdraws_the_token() {
        let (coordinator, store) = hooked(|coordinator| coordinator.cancel_and_reset());

        let err = coordinator.exchange("code").await.unwrap_err();
        assert!(matches!(err, AuthError::Superseded));
        assert_eq!(store.token().unwrap(), None);
        assert!(!coordinator.is_exchanging());
    }
}
