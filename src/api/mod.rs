//! HTTP client for the learning-path server's auth endpoints.
//!
//! The API layer is split into cohesive modules:
//! - `types`: request/response wire shapes
//! - `client`: reqwest transport, 401 interceptor, and cookie persistence

use crate::auth::{RefreshError, UserProfile};
use crate::error::ApiError;
use async_trait::async_trait;

mod client;
mod types;

pub use client::{ApiClient, ApiRequest};
pub use types::{CreditsBalance, Credentials, Registration, TokenGrant};

/// Server collaborator consumed by the session core.
///
/// This trait lets tests provide deterministic fake servers without network
/// calls while the production path uses [`ApiClient`].
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, ApiError>;
    async fn register(&self, registration: &Registration) -> Result<TokenGrant, ApiError>;
    /// Exchange the session cookie for a new access token.
    async fn refresh(&self) -> Result<TokenGrant, ApiError>;
    /// Best-effort server-side logout.
    async fn logout(&self) -> Result<(), ApiError>;
    /// Lightweight liveness check returning the current user.
    async fn status(&self) -> Result<UserProfile, ApiError>;
    async fn credits(&self) -> Result<CreditsBalance, ApiError>;
    /// Drop client-held session artifacts such as the refresh cookie.
    fn forget_session(&self) {}
    /// Reload client-held session artifacts another process may have
    /// persisted since this one started.
    fn reload_session(&self) {}
}

/// Reactive refresh entry point used by the 401 interceptor.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh the session and return the new access token.
    async fn refresh_access_token(&self) -> Result<String, RefreshError>;
}
