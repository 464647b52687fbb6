//! Session subsystem error definitions.

use std::fmt;

use crate::error::ApiError;

/// Errors from the keyed session persistence layer.
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Invalid(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// A persisted session value that is present but unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError(String);

impl RecordError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RecordError {}

/// Outcome shared with every caller waiting on one refresh sequence.
///
/// Must be `Clone` because all waiters receive the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The server rejected the refresh credential.
    Rejected(String),
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: String },
    /// A logout happened while the refresh was in flight; the result was dropped.
    Superseded,
    /// The refresh response could not form a complete session.
    Incomplete(String),
    /// The refreshed session could not be persisted.
    Storage(String),
    /// The refresh task stopped before producing a result.
    Aborted(String),
}

impl RefreshError {
    /// Terminal failures log the session out.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected(_)
                | Self::Exhausted { .. }
                | Self::Incomplete(_)
                | Self::Storage(_)
                | Self::Aborted(_)
        )
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "session refresh rejected: {msg}"),
            Self::Exhausted { attempts, last } => {
                write!(f, "session refresh failed after {attempts} attempts: {last}")
            }
            Self::Superseded => write!(f, "session was logged out during refresh"),
            Self::Incomplete(msg) => write!(f, "incomplete session from refresh: {msg}"),
            Self::Storage(msg) => write!(f, "failed to persist refreshed session: {msg}"),
            Self::Aborted(msg) => write!(f, "session refresh aborted: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Errors surfaced by session lifecycle operations.
#[derive(Debug)]
pub enum SessionError {
    Api(ApiError),
    Refresh(RefreshError),
    Storage(StorageError),
    Record(RecordError),
    NotAuthenticated,
}

impl SessionError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(err) => write!(f, "api: {err}"),
            Self::Refresh(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "storage: {err}"),
            Self::Record(err) => write!(f, "invalid session: {err}"),
            Self::NotAuthenticated => write!(f, "not logged in; run `mapmylearn login`"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ApiError> for SessionError {
    fn from(value: ApiError) -> Self {
        Self::Api(value)
    }
}

impl From<RefreshError> for SessionError {
    fn from(value: RefreshError) -> Self {
        Self::Refresh(value)
    }
}

impl From<StorageError> for SessionError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<RecordError> for SessionError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}
