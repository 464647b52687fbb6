//! Single-flight session refresh with bounded retries.
//!
//! At most one refresh sequence runs at a time. Callers arriving while one
//! is in flight join it and receive the same outcome. The sequence itself
//! runs on a spawned task so a caller giving up does not cancel it for the
//! others.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::error::RefreshError;
use super::types::SessionRecord;
use crate::api::{AuthApi, TokenGrant};

/// Outcome every waiter of one refresh sequence receives.
pub type RefreshOutcome = Result<SessionRecord, RefreshError>;

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Session-side hooks invoked by a refresh sequence.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    /// Counter that changes whenever the session is logged out.
    fn session_epoch(&self) -> u64;

    /// Install a fresh grant, unless the session moved past `epoch`.
    async fn install_refreshed(&self, grant: TokenGrant, epoch: u64) -> RefreshOutcome;

    /// Called once per terminal failure, before waiters see the error.
    async fn refresh_failed(&self, error: &RefreshError);
}

#[derive(Default)]
struct RefreshState {
    pending: Option<PendingRefresh>,
    /// Bumped each time a sequence starts; identifies the owner of `pending`.
    sequence: u64,
    attempt_count: u32,
}

/// Deduplicating refresh driver.
pub struct RefreshCoordinator {
    api: Arc<dyn AuthApi>,
    policy: BackoffPolicy,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(api: Arc<dyn AuthApi>, policy: BackoffPolicy) -> Self {
        Self {
            api,
            policy,
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// True while a refresh sequence is running.
    pub fn is_in_progress(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Attempts made by the running sequence; zero when idle.
    pub fn attempt_count(&self) -> u32 {
        self.state().attempt_count
    }

    /// Forget the attempt count.
    ///
    /// An in-flight sequence keeps running and its waiters still get its
    /// result; the handler's epoch check discards it after a logout.
    pub fn reset(&self) {
        self.state().attempt_count = 0;
    }

    /// Start a refresh, or join the one already in flight.
    pub async fn refresh(self: &Arc<Self>, handler: Arc<dyn RefreshHandler>) -> RefreshOutcome {
        let pending = {
            let mut state = self.state();
            match state.pending.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    state.sequence += 1;
                    let sequence = state.sequence;
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move { this.run(handler, sequence).await });
                    let this = Arc::clone(self);
                    let pending = async move {
                        let outcome = task.await;
                        // `run` clears its own state, except when it panicked.
                        this.finish(sequence);
                        outcome.unwrap_or_else(|err| Err(RefreshError::Aborted(err.to_string())))
                    }
                    .boxed()
                    .shared();
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn run(self: Arc<Self>, handler: Arc<dyn RefreshHandler>, sequence: u64) -> RefreshOutcome {
        let epoch = handler.session_epoch();
        let outcome = match self.request_with_backoff().await {
            Ok(grant) => handler.install_refreshed(grant, epoch).await,
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(record) => info!(token_expiry = record.token_expiry, "session refreshed"),
            Err(err) if err.is_terminal() => {
                warn!(error = %err, "session refresh failed; logging out");
                handler.refresh_failed(err).await;
            }
            Err(err) => debug!(error = %err, "discarding refresh result"),
        }

        self.finish(sequence);
        outcome
    }

    /// Release `pending` if it still belongs to `sequence`.
    fn finish(&self, sequence: u64) {
        let mut state = self.state();
        if state.sequence == sequence && state.pending.is_some() {
            state.pending = None;
            state.attempt_count = 0;
        }
    }

    async fn request_with_backoff(&self) -> Result<TokenGrant, RefreshError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.state().attempt_count = attempt;
            debug!(attempt, "requesting session refresh");

            let err = match self.api.refresh().await {
                Ok(grant) => return Ok(grant),
                Err(err) => err,
            };
            if err.is_auth_rejection() {
                return Err(RefreshError::Rejected(err.user_message()));
            }
            if !self.policy.allows_retry_after(attempt) {
                return Err(RefreshError::Exhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }
            let delay = self.policy.delay_after(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "session refresh failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
