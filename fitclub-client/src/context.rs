// Client-side notification aggregator.
//
// Holds the visible list and unread count for one (tenant, user) scope and
// keeps them converged with the backend by re-fetching on every change-feed
// signal. The backend is always the source of truth: actions never patch
// local state, they mutate remotely and then re-fetch.
//
// Each bind starts a new generation. The background task of the previous
// generation is aborted, and every fetch result is applied only if its
// generation is still current, checked under the same lock that guards the
// binding. A late response from an old scope is therefore dropped.
//
// A dropped change feed is reopened with backoff for as long as the
// generation is current, and each reopen is followed by a full re-fetch.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use fitclub_shared::types::{BatchOutcome, NotificationRecord};

use crate::backend::{ChangeFeedSource, FeedSignal, NotificationBackend};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextState {
    pub scope: Option<Scope>,
    pub phase: Phase,
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: usize,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Binding {
    generation: u64,
    scope: Option<Scope>,
    task: Option<JoinHandle<()>>,
    next_fetch: u64,
    applied_fetch: u64,
}

struct Inner {
    backend: Arc<dyn NotificationBackend>,
    feed: Arc<dyn ChangeFeedSource>,
    state: watch::Sender<ContextState>,
    binding: Mutex<Binding>,
}

/// Cheap to clone; clones share the same binding and state.
#[derive(Clone)]
pub struct NotificationContext {
    inner: Arc<Inner>,
}

impl Inner {
    fn current(&self) -> Option<(u64, Scope)> {
        let binding = self.binding.lock();
        binding.scope.map(|scope| (binding.generation, scope))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.binding.lock().generation == generation
    }

    /// Reserve a fetch sequence number, or `None` if `generation` is stale.
    fn begin_fetch(&self, generation: u64) -> Option<u64> {
        let mut binding = self.binding.lock();
        if binding.generation != generation {
            return None;
        }
        binding.next_fetch += 1;
        self.state.send_if_modified(|state| {
            if state.phase == Phase::Ready {
                state.phase = Phase::Refreshing;
                true
            } else {
                false
            }
        });
        Some(binding.next_fetch)
    }

    fn apply(
        &self,
        generation: u64,
        seq: u64,
        result: ClientResult<(Vec<NotificationRecord>, usize)>,
    ) -> ClientResult<()> {
        let mut binding = self.binding.lock();
        if binding.generation != generation {
            tracing::debug!(generation, "dropping fetch result from previous scope");
            return Ok(());
        }
        if seq <= binding.applied_fetch {
            tracing::debug!(seq, applied = binding.applied_fetch, "dropping out-of-order fetch result");
            return Ok(());
        }
        binding.applied_fetch = seq;
        let still_fetching = binding.next_fetch > seq;

        match result {
            Ok((notifications, unread_count)) => {
                self.state.send_modify(|state| {
                    state.notifications = notifications;
                    state.unread_count = unread_count;
                    state.last_error = None;
                    state.phase = if still_fetching { Phase::Refreshing } else { Phase::Ready };
                });
                Ok(())
            }
            Err(e) => {
                self.state.send_modify(|state| {
                    state.last_error = Some(e.to_string());
                    state.phase = if still_fetching { Phase::Refreshing } else { Phase::Ready };
                });
                Err(e)
            }
        }
    }

    async fn fetch(&self, generation: u64, scope: Scope) -> ClientResult<()> {
        let Some(seq) = self.begin_fetch(generation) else {
            return Ok(());
        };

        let (list, count) = tokio::join!(
            self.backend.list(scope.tenant_id, scope.user_id),
            self.backend.unread_count(scope.tenant_id, scope.user_id),
        );
        let result = match (list, count) {
            (Ok(list), Ok(count)) => Ok((list, count)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        self.apply(generation, seq, result)
    }

    fn record_error(&self, generation: u64, error: &ClientError) {
        let binding = self.binding.lock();
        if binding.generation == generation {
            self.state.send_modify(|state| state.last_error = Some(error.to_string()));
        }
    }
}

const RESUBSCRIBE_INITIAL: Duration = Duration::from_millis(100);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Subscribe first, then load, then re-fetch on every feed signal. When the
/// feed ends or cannot be opened, wait with exponential backoff and start
/// over, so every reconnect also catches up on what was missed. Runs until a
/// rebind aborts it or the context is dropped; holds only a weak reference
/// while idle.
async fn run_binding(inner: Weak<Inner>, generation: u64, scope: Scope) {
    let mut backoff = RESUBSCRIBE_INITIAL;

    loop {
        let Some(ctx) = inner.upgrade() else {
            return;
        };
        if !ctx.is_current(generation) {
            return;
        }

        let stream = match ctx.feed.subscribe(scope.tenant_id).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, tenant_id = %scope.tenant_id, retry_in = ?backoff, "change feed unavailable");
                ctx.record_error(generation, &e);
                None
            }
        };

        if let Err(e) = ctx.fetch(generation, scope).await {
            tracing::warn!(error = %e, tenant_id = %scope.tenant_id, "notification load failed");
        }
        drop(ctx);

        if let Some(mut stream) = stream {
            while let Some(signal) = stream.next().await {
                let Some(ctx) = inner.upgrade() else {
                    return;
                };
                backoff = RESUBSCRIBE_INITIAL;
                match &signal {
                    FeedSignal::Change(change) => {
                        tracing::debug!(kind = %change.kind, document_id = %change.document_id, "notification change received");
                    }
                    FeedSignal::Resync => tracing::debug!("change feed asked for resync"),
                }
                if let Err(e) = ctx.fetch(generation, scope).await {
                    tracing::warn!(error = %e, tenant_id = %scope.tenant_id, "notification refresh failed");
                }
            }
            tracing::info!(tenant_id = %scope.tenant_id, retry_in = ?backoff, "change feed ended, resubscribing");
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RESUBSCRIBE_MAX);
    }
}

impl NotificationContext {
    pub fn new(backend: Arc<dyn NotificationBackend>, feed: Arc<dyn ChangeFeedSource>) -> Self {
        let (state, _) = watch::channel(ContextState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                feed,
                state,
                binding: Mutex::new(Binding::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ContextState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ContextState {
        self.inner.state.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.inner.state.borrow().notifications.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.state.borrow().unread_count
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase
    }

    pub fn scope(&self) -> Option<Scope> {
        self.inner.binding.lock().scope
    }

    /// Bind to `(tenant, user)`. Rebinding to the current scope is a no-op.
    /// Must be called inside a tokio runtime.
    pub fn bind(&self, tenant_id: Uuid, user_id: Uuid) {
        let scope = Scope { tenant_id, user_id };
        let mut binding = self.inner.binding.lock();

        let live = binding.task.as_ref().is_some_and(|task| !task.is_finished());
        if binding.scope == Some(scope) && live {
            return;
        }

        if let Some(task) = binding.task.take() {
            task.abort();
        }
        binding.generation += 1;
        binding.scope = Some(scope);
        binding.next_fetch = 0;
        binding.applied_fetch = 0;

        self.inner.state.send_replace(ContextState {
            scope: Some(scope),
            phase: Phase::Loading,
            ..ContextState::default()
        });

        tracing::info!(tenant_id = %tenant_id, user_id = %user_id, generation = binding.generation, "notification context bound");
        binding.task = Some(tokio::spawn(run_binding(Arc::downgrade(&self.inner), binding.generation, scope)));
    }

    /// Tear down the subscription and return to `Uninitialized`.
    pub fn unbind(&self) {
        let mut binding = self.inner.binding.lock();
        if let Some(task) = binding.task.take() {
            task.abort();
        }
        binding.generation += 1;
        binding.next_fetch = 0;
        binding.applied_fetch = 0;
        if binding.scope.take().is_some() {
            tracing::info!("notification context unbound");
        }
        self.inner.state.send_replace(ContextState::default());
    }

    pub async fn refresh_notifications(&self) -> ClientResult<()> {
        let Some((generation, scope)) = self.inner.current() else {
            tracing::debug!("no bound user, ignoring refresh");
            return Ok(());
        };
        self.inner.fetch(generation, scope).await
    }

    async fn refetch_after_action(&self, generation: u64, scope: Scope) {
        if let Err(e) = self.inner.fetch(generation, scope).await {
            tracing::warn!(error = %e, "refresh after action failed");
        }
    }

    pub async fn mark_as_read(&self, notification_id: Uuid) -> ClientResult<()> {
        let Some((generation, scope)) = self.inner.current() else {
            tracing::debug!("no bound user, ignoring mark_as_read");
            return Ok(());
        };

        let result = match self.inner.backend.mark_read(notification_id, scope.user_id).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(notification_id = %notification_id, "notification already gone");
                Ok(())
            }
            other => other,
        };

        self.refetch_after_action(generation, scope).await;
        result
    }

    pub async fn clear_notification(&self, notification_id: Uuid) -> ClientResult<()> {
        let Some((generation, scope)) = self.inner.current() else {
            tracing::debug!("no bound user, ignoring clear_notification");
            return Ok(());
        };

        let result = match self.inner.backend.delete(notification_id, scope.user_id).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(notification_id = %notification_id, "notification already gone");
                Ok(())
            }
            other => other,
        };

        self.refetch_after_action(generation, scope).await;
        result
    }

    /// Failures are logged, never returned; the follow-up fetch shows the
    /// real state.
    pub async fn mark_all_as_read(&self) -> BatchOutcome {
        let Some((generation, scope)) = self.inner.current() else {
            tracing::debug!("no bound user, ignoring mark_all_as_read");
            return BatchOutcome::default();
        };

        let outcome = match self.inner.backend.mark_all_read(scope.tenant_id, scope.user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "mark_all_as_read failed");
                BatchOutcome::default()
            }
        };
        if !outcome.is_complete() {
            tracing::warn!(failed = outcome.failed, attempted = outcome.attempted, "mark_all_as_read partially applied");
        }

        self.refetch_after_action(generation, scope).await;
        outcome
    }

    pub async fn clear_all_notifications(&self) -> BatchOutcome {
        let Some((generation, scope)) = self.inner.current() else {
            tracing::debug!("no bound user, ignoring clear_all_notifications");
            return BatchOutcome::default();
        };

        let outcome = match self.inner.backend.delete_all(scope.tenant_id, scope.user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "clear_all_notifications failed");
                BatchOutcome::default()
            }
        };
        if !outcome.is_complete() {
            tracing::warn!(failed = outcome.failed, attempted = outcome.attempted, "clear_all_notifications partially applied");
        }

        self.refetch_after_action(generation, scope).await;
        outcome
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.binding.get_mut().task.take() {
            task.abort();
        }
    }
}
