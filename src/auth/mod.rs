//! Session core: token slot, persisted session record, single-flight
//! refresh, and the session lifecycle.
//!
//! The session record lives under `~/.config/mapmylearn/session.json`
//! (encrypted at rest by default) and is shared by every process of the
//! same user.

mod backoff;
mod crypto;
mod error;
mod refresh;
mod session;
mod store;
mod token;
mod types;
mod watch;

pub use backoff::{BackoffPolicy, DEFAULT_MAX_ATTEMPTS};
pub use error::{RecordError, RefreshError, SessionError, StorageError};
pub use refresh::{RefreshCoordinator, RefreshHandler, RefreshOutcome};
pub use session::{
    refresh_delay, LogoutReason, ReconcileOutcome, SessionEvent, SessionManager, SessionSettings,
    SessionSnapshot, SessionState, Signal, DEFAULT_MIN_REFRESH_DELAY, DEFAULT_REFRESH_BUFFER_SECS,
    INIT_FAILED_MESSAGE,
};
pub use store::{default_storage_path, FileStorage, MemoryStorage, SessionStorage};
pub use token::TokenStore;
pub use types::{SessionRecord, UserProfile, SESSION_STORAGE_KEY};
pub use watch::{watch_storage_key, StorageEvent};
