//! Wire types for the auth endpoints.

use serde::{Deserialize, Serialize};

use crate::auth::UserProfile;

/// `POST /auth/login` body.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Ask the server for a long-lived refresh cookie.
    pub remember_me: bool,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>, remember_me: bool) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember_me,
        }
    }
}

/// `POST /auth/register` body.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Token response shared by login, register, and refresh.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Token lifetime in seconds.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires_in: i64,
    /// Omitted by some refresh responses; the previous profile is kept then.
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// `GET /auth/credits` response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CreditsBalance {
    pub credits: i64,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Deserialize lifetimes encoded as number or numeric string.
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(num) => num
            .as_i64()
            .or_else(|| num.as_f64().map(|secs| secs as i64))
            .ok_or_else(|| serde::de::Error::custom("expires_in must be an integer")),
        serde_json::Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|err| serde::de::Error::custom(format!("invalid expires_in: {err}"))),
        _ => Err(serde::de::Error::custom("expires_in must be a number")),
    }
}
