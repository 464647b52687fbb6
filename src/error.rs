//! Unified error types for the API client and configuration layers.

use std::fmt;

/// Message used when the server gives no usable error text.
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors from the HTTP API layer, normalized to one shape per failure kind.
#[derive(Debug)]
pub enum ApiError {
    /// Network / reqwest-level error.
    Http(reqwest::Error),
    /// Non-2xx status from the API.
    Status {
        code: u16,
        /// Human-readable message from the server envelope, or a generic one.
        message: String,
        /// Structured detail (validation errors and the like).
        detail: Option<serde_json::Value>,
        /// Server classification tag such as `http_error` or `validation_error`.
        kind: Option<String>,
        /// Correlation id the server logged the failure under.
        error_id: Option<String>,
    },
    /// 2xx response whose body did not match the expected shape.
    InvalidResponse(String),
}

impl ApiError {
    /// Build a status error carrying only a message.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
            detail: None,
            kind: None,
            error_id: None,
        }
    }

    /// HTTP status code when this error came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::Http(inner) => inner.status().map(|status| status.as_u16()),
            Self::InvalidResponse(_) => None,
        }
    }

    /// True for the "unauthorized" status the server uses for bad credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(401)
    }

    /// True when the credential itself was refused (401 or 403).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status_code(), Some(401) | Some(403))
    }

    /// Message without transport prefixes, for user-facing surfaces.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            Self::Http(inner) if inner.is_timeout() => "The server took too long to respond".into(),
            Self::Http(inner) if inner.is_connect() => "Unable to reach the server".into(),
            Self::Http(_) | Self::InvalidResponse(_) => GENERIC_ERROR_MESSAGE.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "http: {e}"),
            Self::Status {
                code,
                message,
                kind,
                error_id,
                ..
            } => {
                write!(f, "status {code}: {message}")?;
                if let Some(kind) = kind {
                    write!(f, " [{kind}]")?;
                }
                if let Some(id) = error_id {
                    write!(f, " (error id {id})")?;
                }
                Ok(())
            }
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}
