//! HTTP transport helpers: client construction and error normalization.

use std::sync::Arc;
use std::time::Duration;

use super::cookies::SessionCookies;
use crate::error::{ApiError, GENERIC_ERROR_MESSAGE};

/// Build an HTTP client with timeout and the session cookie store applied.
pub(super) fn build_http_client(timeout: Duration, cookies: Arc<SessionCookies>) -> reqwest::Client {
    // Fall back to reqwest defaults if builder creation fails for any reason.
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("mapmylearn-session/", env!("CARGO_PKG_VERSION")))
        .cookie_provider(cookies)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Normalize a non-2xx response body into [`ApiError::Status`].
///
/// Understands the server's envelope
/// `{"status":"failed","error":{"message","type","details","error_id"}}` and
/// FastAPI's plain `{"detail": ...}`; anything else gets a generic message.
pub(super) fn normalize_error(code: u16, body: &str) -> ApiError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let Some(value) = parsed else {
        return ApiError::status(code, fallback_message(code));
    };

    if let Some(envelope) = value.get("error").and_then(|inner| inner.as_object()) {
        let message = envelope
            .get("message")
            .map(message_text)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| fallback_message(code));
        return ApiError::Status {
            code,
            message,
            detail: envelope.get("details").cloned().filter(|v| !v.is_null()),
            kind: envelope
                .get("type")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            error_id: envelope
                .get("error_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };
    }

    if let Some(detail) = value.get("detail").filter(|v| !v.is_null()) {
        let message = message_text(detail);
        return ApiError::Status {
            code,
            message: if message.is_empty() {
                fallback_message(code)
            } else {
                message
            },
            detail: (!detail.is_string()).then(|| detail.clone()),
            kind: None,
            error_id: None,
        };
    }

    ApiError::status(code, fallback_message(code))
}

fn message_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.trim().to_string(),
        // Validation detail lists carry their own `msg` entries.
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                item.get("msg")
                    .or_else(|| item.get("message"))
                    .and_then(|v| v.as_str())
            })
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn fallback_message(code: u16) -> String {
    if code == 401 {
        "Authentication required".to_string()
    } else {
        GENERIC_ERROR_MESSAGE.to_string()
    }
}
