//! Session record and user profile model types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::RecordError;

/// Storage key holding the serialized [`SessionRecord`].
pub const SESSION_STORAGE_KEY: &str = "auth";

/// User profile returned by the server.
///
/// Only `id` and `credits` carry meaning for the session core; any other
/// fields the server sends are kept in `extra` so round trips are lossless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Short human label for logs and CLI output.
    pub fn display_name(&self) -> String {
        if let Some(email) = self.email.as_deref() {
            return email.to_string();
        }
        match &self.id {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Persisted bundle of access token, expiry, and user profile.
///
/// Invariant: `token_expiry == issued_at + expires_in`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub access_token: String,
    /// Token lifetime in seconds as reported by the server.
    pub expires_in: i64,
    /// Absolute expiry in unix seconds.
    pub token_expiry: i64,
    pub user: UserProfile,
}

impl SessionRecord {
    /// Build a record for a token issued at `issued_at`.
    pub fn issue(access_token: String, expires_in: i64, issued_at: i64, user: UserProfile) -> Self {
        Self {
            access_token,
            expires_in,
            token_expiry: issued_at.saturating_add(expires_in),
            user,
        }
    }

    /// True when the token expires within `buffer_secs` of `now`.
    pub fn is_expiring(&self, now: i64, buffer_secs: i64) -> bool {
        now.saturating_add(buffer_secs) >= self.token_expiry
    }

    /// Serialize for persistence.
    pub fn to_json(&self) -> Result<String, RecordError> {
        serde_json::to_string(self)
            .map_err(|err| RecordError::new(format!("failed to serialize session record: {err}")))
    }

    /// Parse a persisted value, failing closed on anything incomplete.
    ///
    /// `None` input means the key is absent (logged out). Any present value
    /// that does not hold every field yields an error so callers can clean
    /// up instead of adopting a partial session.
    pub fn parse_persisted(raw: Option<&str>) -> Result<Option<Self>, RecordError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Err(RecordError::new("stored session is empty"));
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|err| RecordError::new(format!("stored session is not valid json: {err}")))?;
        let Some(object) = value.as_object() else {
            return Err(RecordError::new("stored session is not an object"));
        };
        for field in ["accessToken", "expiresIn", "tokenExpiry", "user"] {
            if object.get(field).map_or(true, serde_json::Value::is_null) {
                return Err(RecordError::new(format!(
                    "stored session is missing `{field}`"
                )));
            }
        }
        let record: SessionRecord = serde_json::from_value(value)
            .map_err(|err| RecordError::new(format!("stored session is malformed: {err}")))?;
        if record.access_token.trim().is_empty() {
            return Err(RecordError::new("stored session has an empty access token"));
        }
        if record.user.id.is_null() {
            return Err(RecordError::new("stored session user has no id"));
        }
        Ok(Some(record))
    }
}

pub(crate) fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
