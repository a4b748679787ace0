use crate::domain::model::{AccountId, Session};
use crate::domain::ports::IdentityProvider;
use crate::utils::error::AuthError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn {
        account: AccountId,
    },
    TokenRefreshed {
        account: AccountId,
        expires_at: DateTime<Utc>,
    },
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
type RefreshOutcome = Option<Result<Session, AuthError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The refresh currently running. Every caller waits on a clone of `outcome`.
struct InFlight {
    id: u64,
    outcome: watch::Receiver<RefreshOutcome>,
}

/// Session data shared with the refresh task.
#[derive(Default)]
struct SessionState {
    current: Mutex<Option<Session>>,
    /// Bumped on every sign-in/sign-out so late refresh results can be dropped.
    epoch: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    next_flight: AtomicU64,
    next_listener: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

impl SessionState {
    fn notify(&self, event: SessionEvent) {
        let listeners: Vec<Listener> = lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn settle(&self, id: u64) {
        let mut slot = lock(&self.in_flight);
        if slot.as_ref().is_some_and(|pending| pending.id == id) {
            *slot = None;
        }
    }
}

/// Handle returned by [`SessionGuard::on_session_change`]. Dropping it
/// unsubscribes.
pub struct Subscription {
    id: u64,
    state: Weak<SessionState>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state.listeners).remove(&self.id);
        }
    }
}

/// Owns the session and guarantees at most one credential refresh is in
/// flight. Concurrent callers attach to the pending refresh and all observe
/// its single result.
pub struct SessionGuard {
    provider: Arc<dyn IdentityProvider>,
    policy: RefreshPolicy,
    state: Arc<SessionState>,
}

impl SessionGuard {
    pub fn new(provider: Arc<dyn IdentityProvider>, policy: RefreshPolicy) -> Self {
        Self {
            provider,
            policy,
            state: Arc::new(SessionState::default()),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn current(&self) -> Option<Session> {
        lock(&self.state.current).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.state.current).is_some()
    }

    pub fn sign_in(&self, session: Session) {
        let account = session.account.id.clone();
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.current) = Some(session);
        tracing::info!("🔑 Signed in as {}", account);
        self.state.notify(SessionEvent::SignedIn { account });
    }

    /// Drops the local session first, then tells the identity provider.
    /// Provider errors are logged and ignored.
    pub async fn sign_out(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = lock(&self.state.current).take();
        *lock(&self.state.in_flight) = None;

        if let Some(session) = previous {
            if let Err(e) = self.provider.sign_out(&session).await {
                tracing::warn!("Sign-out request failed (ignored): {}", e);
            }
            self.state.notify(SessionEvent::SignedOut);
        }
    }

    pub fn on_session_change(
        &self,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.state.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.listeners).insert(id, Arc::new(handler));
        Subscription {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Refreshes the credential, joining a refresh that is already running.
    /// Must be called from within a tokio runtime.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let mut outcome = {
            let mut slot = lock(&self.state.in_flight);
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight credential refresh #{}", pending.id);
                    pending.outcome.clone()
                }
                None => {
                    let id = self.state.next_flight.fetch_add(1, Ordering::SeqCst);
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(InFlight {
                        id,
                        outcome: rx.clone(),
                    });
                    self.spawn_refresh(id, tx);
                    rx
                }
            }
        };

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Err(AuthError::SessionClosed)),
            Err(_) => Err(AuthError::Transport {
                message: "refresh task ended without a result".to_string(),
            }),
        };
        settled
    }

    /// The refresh runs in its own task so that it settles even when every
    /// waiting caller has gone away.
    fn spawn_refresh(&self, id: u64, tx: watch::Sender<RefreshOutcome>) {
        let provider = Arc::clone(&self.provider);
        let state = Arc::clone(&self.state);
        let policy = self.policy;

        tokio::spawn(async move {
            let result = run_refresh(id, provider.as_ref(), &state, policy).await;
            state.settle(id);
            let _ = tx.send(Some(result));
        });
    }
}

async fn run_refresh(
    id: u64,
    provider: &dyn IdentityProvider,
    state: &SessionState,
    policy: RefreshPolicy,
) -> Result<Session, AuthError> {
    let epoch = state.epoch.load(Ordering::SeqCst);
    let Some(current) = lock(&state.current).clone() else {
        return Err(AuthError::NoSession);
    };
    let mut last_error = AuthError::NoSession;

    for attempt in 1..=policy.max_attempts {
        tracing::debug!(
            "🔄 Refresh #{} attempt {}/{}",
            id,
            attempt,
            policy.max_attempts
        );
        match tokio::time::timeout(policy.attempt_timeout, provider.refresh_credential(&current))
            .await
        {
            Ok(Ok(session)) => {
                if state.epoch.load(Ordering::SeqCst) != epoch {
                    tracing::debug!("Refresh #{} settled after session change", id);
                    return Err(AuthError::SessionClosed);
                }
                *lock(&state.current) = Some(session.clone());
                tracing::info!("✅ Session refreshed (expires {})", session.expires_at);
                state.notify(SessionEvent::TokenRefreshed {
                    account: session.account.id.clone(),
                    expires_at: session.expires_at,
                });
                return Ok(session);
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Refresh attempt {} failed: {}", attempt, e);
                last_error = e;
            }
            Err(_) => {
                tracing::warn!(
                    "⚠️ Refresh attempt {} timed out after {:?}",
                    attempt,
                    policy.attempt_timeout
                );
                last_error = AuthError::Timeout {
                    seconds: policy.attempt_timeout.as_secs(),
                };
            }
        }
    }

    tracing::error!("❌ Session refresh failed after {} attempt(s)", policy.max_attempts);
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::MockBackend;
    use std::sync::atomic::AtomicUsize;

    fn guard(backend: &Arc<MockBackend>) -> Arc<SessionGuard> {
        let guard = SessionGuard::new(backend.clone(), RefreshPolicy::default());
        guard.sign_in(backend.session());
        Arc::new(guard)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_call() {
        let backend = MockBackend::new();
        backend.delay_refresh(Duration::from_secs(1));
        let guard = guard(&backend);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                tokio::spawn(async move { guard.refresh().await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(backend.refresh_calls(), 1);
        assert!(results.iter().all(|s| s == &results[0]));
        assert_eq!(results[0].access_token, "access-1");
    }

    #[tokio::test]
    async fn test_settled_refresh_is_cleared() {
        let backend = MockBackend::new();
        let guard = guard(&backend);

        let first = guard.refresh().await.unwrap();
        let second = guard.refresh().await.unwrap();

        assert_eq!(backend.refresh_calls(), 2);
        assert_ne!(first.access_token, second.access_token);
        assert_eq!(guard.current(), Some(second));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_cleared() {
        let backend = MockBackend::new();
        let rejected = AuthError::Rejected {
            message: "refresh token expired".to_string(),
        };
        backend.queue_refresh_outcomes(vec![Err(rejected.clone()), Err(rejected.clone())]);
        let guard = guard(&backend);

        assert_eq!(guard.refresh().await, Err(rejected));
        assert_eq!(backend.refresh_calls(), 2);

        let renewed = guard.refresh().await.unwrap();
        assert_eq!(backend.refresh_calls(), 3);
        assert_eq!(renewed.access_token, "access-3");
        assert_eq!(guard.current(), Some(renewed));
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let backend = MockBackend::new();
        backend.queue_refresh_outcomes(vec![Err(AuthError::Rejected {
            message: "flaky".to_string(),
        })]);
        let guard = guard(&backend);

        assert!(guard.refresh().await.is_ok());
        assert_eq!(backend.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let backend = MockBackend::new();
        let rejected = AuthError::Rejected {
            message: "refresh token expired".to_string(),
        };
        backend.queue_refresh_outcomes(vec![Err(rejected.clone()), Err(rejected.clone())]);
        let guard = guard(&backend);

        assert_eq!(guard.refresh().await, Err(rejected));
        assert_eq!(backend.refresh_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_bounded_by_timeout() {
        let backend = MockBackend::new();
        backend.delay_refresh(Duration::from_secs(60));
        let guard = guard(&backend);

        let started = tokio::time::Instant::now();
        let result = guard.refresh().await;

        assert_eq!(result, Err(AuthError::Timeout { seconds: 10 }));
        assert_eq!(backend.refresh_calls(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let backend = MockBackend::new();
        let guard = SessionGuard::new(backend.clone(), RefreshPolicy::default());

        assert_eq!(guard.refresh().await, Err(AuthError::NoSession));
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_during_refresh_drops_result() {
        let backend = MockBackend::new();
        backend.delay_refresh(Duration::from_secs(2));
        let guard = guard(&backend);

        let pending = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        guard.sign_out().await;

        assert_eq!(pending.await.unwrap(), Err(AuthError::SessionClosed));
        assert!(!guard.is_authenticated());
    }

    #[tokio::test]
    async fn test_listeners_and_unsubscribe() {
        let backend = MockBackend::new();
        let guard = SessionGuard::new(backend.clone(), RefreshPolicy::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let refreshes = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let events = Arc::clone(&events);
            guard.on_session_change(move |event| events.lock().unwrap().push(event.clone()))
        };
        let _counter = {
            let refreshes = Arc::clone(&refreshes);
            guard.on_session_change(move |event| {
                if matches!(event, SessionEvent::TokenRefreshed { .. }) {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        guard.sign_in(backend.session());
        guard.refresh().await.unwrap();
        subscription.unsubscribe();
        guard.refresh().await.unwrap();
        guard.sign_out().await;

        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::SignedIn { .. }));
        assert!(matches!(events[1], SessionEvent::TokenRefreshed { .. }));
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(backend.sign_out_calls(), 1);
    }
}
