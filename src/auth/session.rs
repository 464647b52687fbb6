//! Session lifecycle: initialization, login, logout, and keeping the access
//! token fresh.
//!
//! [`SessionManager`] owns the session state machine. It is the
//! [`RefreshHandler`] for the shared [`RefreshCoordinator`] and the
//! [`TokenRefresher`] the HTTP client calls on 401, so every refresh path
//! (timer, visibility, interceptor, init) funnels through one sequence.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::error::{RefreshError, SessionError};
use super::refresh::{RefreshCoordinator, RefreshHandler, RefreshOutcome};
use super::store::SessionStorage;
use super::token::TokenStore;
use super::types::{unix_now_secs, SessionRecord, UserProfile, SESSION_STORAGE_KEY};
use super::watch::StorageEvent;
use crate::api::{ApiClient, AuthApi, Credentials, Registration, TokenGrant, TokenRefresher};
use crate::error::ApiError;

/// Seconds before expiry at which the token counts as expiring.
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 60;
/// Floor for the proactive refresh delay.
pub const DEFAULT_MIN_REFRESH_DELAY: Duration = Duration::from_secs(10);
/// `last_error` after an unexpected init failure.
pub const INIT_FAILED_MESSAGE: &str = "initialization failed";

const EVENT_CAPACITY: usize = 32;

/// Timing knobs for the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_buffer_secs: i64,
    pub min_refresh_delay: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            min_refresh_delay: DEFAULT_MIN_REFRESH_DELAY,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Authenticated,
    Anonymous,
    LoggingOut,
}

/// Why a session ended; carried to whatever redirects the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    Manual,
    Expired,
    Error,
    ClearedElsewhere,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Expired => "expired",
            Self::Error => "error",
            Self::ClearedElsewhere => "cleared_elsewhere",
        }
    }
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(UserProfile),
    Refreshed { token_expiry: i64 },
    CreditsUpdated(i64),
    SignedOut { reason: LogoutReason },
    InitFailed(String),
}

/// Inbound signals that make the manager re-check persisted state.
#[derive(Debug, Clone)]
pub enum Signal {
    /// The user came back to the client after it was hidden or idle.
    Visible,
    /// Another process changed a persisted key.
    StorageChanged(StorageEvent),
}

/// What [`SessionManager::reconcile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Unchanged,
    RefreshStarted,
    Adopted,
    LoggedOut,
}

/// Point-in-time view of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<UserProfile>,
    pub loading: bool,
    pub last_error: Option<String>,
}

/// Delay until the proactive refresh: `max(expiry - buffer - now, min)`.
pub fn refresh_delay(token_expiry: i64, now: i64, buffer_secs: i64, min_delay: Duration) -> Duration {
    let secs = token_expiry
        .saturating_sub(buffer_secs)
        .saturating_sub(now)
        .max(0) as u64;
    Duration::from_secs(secs).max(min_delay)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Install {
    SignIn,
    Refresh,
}

struct SessionCell {
    state: SessionState,
    record: Option<SessionRecord>,
    loading: bool,
    last_error: Option<String>,
}

struct SessionInner {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn SessionStorage>,
    tokens: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
    settings: SessionSettings,
    cell: Mutex<SessionCell>,
    timer: Mutex<Option<JoinHandle<()>>>,
    epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    weak_self: Weak<SessionInner>,
}

/// Clonable handle to the session lifecycle.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn SessionStorage>,
        tokens: TokenStore,
        settings: SessionSettings,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(Arc::clone(&api), settings.backoff));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new_cyclic(|weak_self| SessionInner {
            api,
            storage,
            tokens,
            coordinator,
            settings,
            cell: Mutex::new(SessionCell {
                state: SessionState::Uninitialized,
                record: None,
                loading: false,
                last_error: None,
            }),
            timer: Mutex::new(None),
            epoch: AtomicU64::new(0),
            events,
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    /// Build a manager over `client` and register it as the client's 401
    /// refresher.
    pub fn with_client(
        client: Arc<ApiClient>,
        storage: Arc<dyn SessionStorage>,
        settings: SessionSettings,
    ) -> Self {
        let tokens = client.tokens().clone();
        let manager = Self::new(client.clone(), storage, tokens, settings);
        client.set_refresher(manager.refresher());
        manager
    }

    /// Weak refresh hook for the HTTP interceptor.
    pub fn refresher(&self) -> Weak<dyn TokenRefresher> {
        let inner: Arc<dyn TokenRefresher> = self.inner.clone();
        Arc::downgrade(&inner)
    }

    /// Restore the session from storage.
    pub async fn init(&self) -> SessionState {
        self.inner.init().await
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile, SessionError> {
        self.inner.sign_in(self.inner.api.login(credentials)).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<UserProfile, SessionError> {
        self.inner.sign_in(self.inner.api.register(registration)).await
    }

    /// End the session. Safe to call repeatedly.
    pub async fn logout(&self, reason: LogoutReason) {
        self.inner.logout(reason).await;
    }

    /// Refresh now, joining any refresh already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    /// Fetch the credit balance and store it on the session's profile.
    pub async fn fetch_credits(&self) -> Result<i64, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let balance = self.inner.api.credits().await?;
        self.inner.apply_credits(balance.credits)?;
        Ok(balance.credits)
    }

    /// Ask the server who the current token belongs to.
    pub async fn check_status(&self) -> Result<UserProfile, SessionError> {
        Ok(self.inner.api.status().await?)
    }

    /// Re-check persisted state after an external signal.
    pub async fn reconcile(&self, signal: Signal) -> ReconcileOutcome {
        self.inner.reconcile(signal).await
    }

    /// Feed storage change events into [`Self::reconcile`] until the sender
    /// closes or the manager is dropped.
    pub fn spawn_storage_listener(&self, mut events: mpsc::Receiver<StorageEvent>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let outcome = inner.reconcile(Signal::StorageChanged(event)).await;
                debug!(?outcome, "reconciled external session change");
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let cell = self.inner.cell();
        SessionSnapshot {
            state: cell.state,
            user: cell.record.as_ref().map(|record| record.user.clone()),
            loading: cell.loading,
            last_error: cell.last_error.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.cell().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.cell().record.as_ref().map(|record| record.user.clone())
    }

    /// Absolute expiry of the current token, in unix seconds.
    pub fn token_expiry(&self) -> Option<i64> {
        self.inner.cell().record.as_ref().map(|record| record.token_expiry)
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.inner.coordinator
    }
}

impl SessionInner {
    fn cell(&self) -> MutexGuard<'_, SessionCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn init(&self) -> SessionState {
        {
            let mut cell = self.cell();
            cell.loading = true;
            cell.last_error = None;
            if cell.state != SessionState::Authenticated {
                cell.state = SessionState::Loading;
            }
        }

        let state = match self.restore().await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "session initialization failed");
                self.emit(SessionEvent::InitFailed(err.user_message()));
                self.logout(LogoutReason::Error).await;
                self.cell().last_error = Some(INIT_FAILED_MESSAGE.to_string());
                SessionState::Anonymous
            }
        };

        let mut cell = self.cell();
        cell.loading = false;
        if cell.state == SessionState::Loading {
            cell.state = state;
        }
        cell.state
    }

    async fn restore(&self) -> Result<SessionState, SessionError> {
        let raw = self.storage.read(SESSION_STORAGE_KEY)?;
        let record = match SessionRecord::parse_persisted(raw.as_deref()) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("no stored session");
                self.tokens.clear();
                return Ok(SessionState::Anonymous);
            }
            Err(err) => {
                warn!(error = %err, "discarding incomplete stored session");
                self.logout(LogoutReason::Error).await;
                return Ok(SessionState::Anonymous);
            }
        };
        // The record may come from another process; pick up its refresh cookie.
        self.api.reload_session();

        let now = unix_now_secs();
        if record.is_expiring(now, self.settings.refresh_buffer_secs) {
            info!("stored session is expiring; refreshing before adopting it");
            return match self.refresh().await {
                Ok(_) => {
                    self.fetch_credits_quietly().await;
                    Ok(SessionState::Authenticated)
                }
                Err(err) => {
                    debug!(error = %err, "stored session could not be refreshed");
                    Ok(SessionState::Anonymous)
                }
            };
        }

        let epoch = self.epoch();
        self.commit(&record, epoch, now, false)?;
        info!(user = %record.user.display_name(), "restored stored session");
        self.emit(SessionEvent::SignedIn(record.user.clone()));
        self.fetch_credits_quietly().await;
        Ok(SessionState::Authenticated)
    }

    async fn sign_in<F>(&self, request: F) -> Result<UserProfile, SessionError>
    where
        F: Future<Output = Result<TokenGrant, ApiError>> + Send,
    {
        self.cell().last_error = None;
        let epoch = self.epoch();
        let result = async {
            let grant = request.await?;
            let record = self.install_grant(grant, epoch, Install::SignIn).await?;
            Ok::<_, SessionError>(record)
        }
        .await;

        match result {
            Ok(record) => {
                info!(user = %record.user.display_name(), "signed in");
                self.fetch_credits_quietly().await;
                let user = self.cell().record.as_ref().map(|current| current.user.clone());
                Ok(user.unwrap_or(record.user))
            }
            Err(err) => {
                let message = err.user_message();
                warn!(error = %err, "sign-in failed");
                self.logout(LogoutReason::Error).await;
                self.cell().last_error = Some(message);
                Err(err)
            }
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        let Some(this) = self.weak_self.upgrade() else {
            return Err(RefreshError::Aborted("session manager dropped".to_string()));
        };
        let handler: Arc<dyn RefreshHandler> = this;
        self.coordinator.refresh(handler).await
    }

    /// Turn a token grant into the current session.
    ///
    /// Shared by sign-in and refresh. A grant without a profile keeps the
    /// profile already known locally or on disk.
    async fn install_grant(&self, grant: TokenGrant, epoch: u64, kind: Install) -> RefreshOutcome {
        if grant.access_token.trim().is_empty() {
            return Err(RefreshError::Incomplete("empty access token".to_string()));
        }
        let known = self.known_user();
        let user = match (grant.user, known) {
            (Some(mut user), Some(known)) => {
                if user.credits.is_none() && user.id == known.id {
                    user.credits = known.credits;
                }
                user
            }
            (Some(user), None) => user,
            (None, Some(known)) => known,
            (None, None) => {
                return Err(RefreshError::Incomplete(
                    "token response carried no user profile".to_string(),
                ))
            }
        };

        let issued_at = unix_now_secs();
        let record = SessionRecord::issue(grant.access_token, grant.expires_in, issued_at, user);
        self.commit(&record, epoch, issued_at, true)?;
        match kind {
            Install::SignIn => self.emit(SessionEvent::SignedIn(record.user.clone())),
            Install::Refresh => self.emit(SessionEvent::Refreshed {
                token_expiry: record.token_expiry,
            }),
        }
        Ok(record)
    }

    /// Make `record` current, unless a logout happened since `epoch`.
    fn commit(&self, record: &SessionRecord, epoch: u64, now: i64, persist: bool) -> Result<(), RefreshError> {
        let mut cell = self.cell();
        if self.epoch() != epoch {
            return Err(RefreshError::Superseded);
        }
        if persist {
            let json = record
                .to_json()
                .map_err(|err| RefreshError::Storage(err.to_string()))?;
            self.storage
                .write(SESSION_STORAGE_KEY, &json)
                .map_err(|err| RefreshError::Storage(err.to_string()))?;
        }
        self.tokens.set(record.access_token.clone());
        cell.state = SessionState::Authenticated;
        cell.record = Some(record.clone());
        self.schedule_refresh(record.token_expiry, now);
        Ok(())
    }

    fn known_user(&self) -> Option<UserProfile> {
        if let Some(record) = self.cell().record.as_ref() {
            return Some(record.user.clone());
        }
        let raw = self.storage.read(SESSION_STORAGE_KEY).ok().flatten();
        SessionRecord::parse_persisted(raw.as_deref())
            .ok()
            .flatten()
            .map(|record| record.user)
    }

    fn schedule_refresh(&self, token_expiry: i64, now: i64) {
        let delay = refresh_delay(
            token_expiry,
            now,
            self.settings.refresh_buffer_secs,
            self.settings.min_refresh_delay,
        );
        debug!(delay_secs = delay.as_secs(), "scheduling proactive refresh");
        let weak = self.weak_self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("proactive refresh timer fired");
            if let Err(err) = inner.refresh().await {
                debug!(error = %err, "proactive refresh did not complete");
            }
        });
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_refresh_timer(&self) {
        let handle = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn logout(&self, reason: LogoutReason) {
        let (previous, logout_epoch) = {
            let mut cell = self.cell();
            if cell.state == SessionState::LoggingOut {
                debug!("logout already in progress");
                return;
            }
            let previous = cell.state;
            let logout_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            cell.state = SessionState::LoggingOut;
            cell.record = None;
            self.tokens.clear();
            if let Err(err) = self.storage.remove(SESSION_STORAGE_KEY) {
                warn!(error = %err, "failed to clear stored session");
            }
            (previous, logout_epoch)
        };
        self.cancel_refresh_timer();
        self.coordinator.reset();

        if let Err(err) = self.api.logout().await {
            debug!(error = %err, "server logout failed; local session already cleared");
        }

        {
            let mut cell = self.cell();
            if self.epoch() == logout_epoch && cell.state == SessionState::LoggingOut {
                cell.state = SessionState::Anonymous;
                self.api.forget_session();
            }
        }
        info!(reason = reason.as_str(), "logged out");
        if previous != SessionState::Anonymous {
            self.emit(SessionEvent::SignedOut { reason });
        }
    }

    async fn fetch_credits_quietly(&self) {
        match self.api.credits().await {
            Ok(balance) => {
                if let Err(err) = self.apply_credits(balance.credits) {
                    debug!(error = %err, "credits arrived after the session changed");
                }
            }
            Err(err) => warn!(error = %err, "failed to fetch credits"),
        }
    }

    fn apply_credits(&self, credits: i64) -> Result<(), SessionError> {
        {
            let mut cell = self.cell();
            let Some(record) = cell.record.as_mut() else {
                return Err(SessionError::NotAuthenticated);
            };
            record.user.credits = Some(credits);
            let access_token = record.access_token.clone();

            // Another process may have replaced or cleared the record.
            let raw = self.storage.read(SESSION_STORAGE_KEY)?;
            match SessionRecord::parse_persisted(raw.as_deref()) {
                Ok(Some(mut persisted)) if persisted.access_token == access_token => {
                    persisted.user.credits = Some(credits);
                    self.storage.write(SESSION_STORAGE_KEY, &persisted.to_json()?)?;
                }
                _ => debug!("stored session changed; skipping credits write-back"),
            }
        }
        self.emit(SessionEvent::CreditsUpdated(credits));
        Ok(())
    }

    async fn reconcile(&self, signal: Signal) -> ReconcileOutcome {
        let (raw, visible) = match signal {
            Signal::Visible => {
                if self.cell().state != SessionState::Authenticated {
                    return ReconcileOutcome::Unchanged;
                }
                match self.storage.read(SESSION_STORAGE_KEY) {
                    Ok(raw) => (raw, true),
                    Err(err) => {
                        warn!(error = %err, "stored session unreadable; logging out");
                        self.logout(LogoutReason::Error).await;
                        return ReconcileOutcome::LoggedOut;
                    }
                }
            }
            Signal::StorageChanged(event) => {
                if event.key != SESSION_STORAGE_KEY {
                    return ReconcileOutcome::Unchanged;
                }
                (event.new_value, false)
            }
        };

        let local = self.cell().record.clone();
        let persisted = match SessionRecord::parse_persisted(raw.as_deref()) {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(error = %err, "stored session is incomplete; logging out");
                self.logout(LogoutReason::Error).await;
                return ReconcileOutcome::LoggedOut;
            }
        };

        match (persisted, local) {
            (None, None) => ReconcileOutcome::Unchanged,
            (None, Some(_)) => {
                info!("session cleared by another process");
                self.logout(LogoutReason::ClearedElsewhere).await;
                ReconcileOutcome::LoggedOut
            }
            (Some(persisted), Some(local)) if persisted == local => {
                let now = unix_now_secs();
                if visible && persisted.is_expiring(now, self.settings.refresh_buffer_secs) {
                    self.spawn_background_refresh();
                    return ReconcileOutcome::RefreshStarted;
                }
                ReconcileOutcome::Unchanged
            }
            (Some(_), _) => {
                info!("session updated by another process; adopting it");
                match self.init().await {
                    SessionState::Authenticated => ReconcileOutcome::Adopted,
                    _ => ReconcileOutcome::LoggedOut,
                }
            }
        }
    }

    fn spawn_background_refresh(&self) {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(err) = inner.refresh().await {
                debug!(error = %err, "background refresh did not complete");
            }
        });
    }
}

#[async_trait]
impl RefreshHandler for SessionInner {
    fn session_epoch(&self) -> u64 {
        self.epoch()
    }

    async fn install_refreshed(&self, grant: TokenGrant, epoch: u64) -> RefreshOutcome {
        self.install_grant(grant, epoch, Install::Refresh).await
    }

    async fn refresh_failed(&self, _error: &RefreshError) {
        self.logout(LogoutReason::Expired).await;
    }
}

#[async_trait]
impl TokenRefresher for SessionInner {
    async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        self.refresh().await.map(|record| record.access_token)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}
