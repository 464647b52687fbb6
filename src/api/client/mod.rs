//! API client orchestration for the learning-path server.
//!
//! The client facade here intentionally remains small:
//! - 401 retry decisions are delegated to `interceptor`.
//! - client construction and error normalization live in `transport`.
//! - refresh-cookie persistence is delegated to `cookies`.

mod cookies;
mod interceptor;
mod transport;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{CreditsBalance, Credentials, Registration, TokenGrant};
use super::{AuthApi, TokenRefresher};
use crate::auth::{SessionStorage, TokenStore, UserProfile};
use crate::error::ApiError;
use cookies::SessionCookies;

pub use cookies::COOKIE_STORAGE_KEY;

/// One outbound API call.
///
/// The `retried` mark travels with the request so the interceptor resubmits
/// it at most once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    retried: bool,
    bearer_override: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path, Some(body))
    }

    pub fn new(method: Method, path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            retried: false,
            bearer_override: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Client for the learning-path REST API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    /// Scheme/host/port root the refresh cookie is scoped to.
    origin: Option<Url>,
    tokens: TokenStore,
    cookies: Arc<SessionCookies>,
    storage: Option<Arc<dyn SessionStorage>>,
    refresher: RwLock<Option<Weak<dyn TokenRefresher>>>,
}

impl ApiClient {
    /// Build a client that authenticates with the shared `tokens` slot.
    pub fn new(base_url: &str, timeout: Duration, tokens: TokenStore) -> Self {
        let cookies = Arc::new(SessionCookies::default());
        let base_url = base_url.trim_end_matches('/').to_string();
        let origin = Url::parse(&base_url).ok().map(|mut url| {
            url.set_path("/");
            url.set_query(None);
            url
        });
        Self {
            http: transport::build_http_client(timeout, Arc::clone(&cookies)),
            base_url,
            origin,
            tokens,
            cookies,
            storage: None,
            refresher: RwLock::new(None),
        }
    }

    /// Persist the refresh cookie in `storage` and restore any saved one.
    pub fn with_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        if let Some(origin) = self.origin.as_ref() {
            self.cookies.restore(storage.as_ref(), origin);
        }
        self.storage = Some(storage);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Register the reactive refresh path used on 401 responses.
    ///
    /// Held weakly because the refresher usually owns this client.
    pub fn set_refresher(&self, refresher: Weak<dyn TokenRefresher>) {
        let mut slot = self.refresher.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(refresher);
    }

    fn refresher(&self) -> Option<Arc<dyn TokenRefresher>> {
        self.refresher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Send a request, refreshing and resubmitting once on 401.
    ///
    /// Returns the successful response; every failure is normalized.
    pub async fn send(&self, mut request: ApiRequest) -> Result<reqwest::Response, ApiError> {
        loop {
            let response = self.dispatch(&request).await?;
            self.after_response(&request);

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let error = transport::normalize_error(code, &body);

            if !interceptor::should_refresh_and_retry(&request.path, code, request.retried) {
                return Err(error);
            }
            let Some(refresher) = self.refresher() else {
                return Err(error);
            };
            request.retried = true;
            match refresher.refresh_access_token().await {
                Ok(token) => {
                    debug!(path = %request.path, "resubmitting request after session refresh");
                    request.bearer_override = Some(token);
                }
                Err(err) => {
                    warn!(path = %request.path, error = %err, "session refresh failed; surfacing original error");
                    return Err(error);
                }
            }
        }
    }

    /// Send and decode a JSON response body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = self.send(request).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|err| {
            ApiError::InvalidResponse(format!("unexpected response from `{path}`: {err}"))
        })
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        let bearer = request
            .bearer_override
            .as_ref()
            .map(|token| format!("Bearer {token}"))
            .or_else(|| self.tokens.bearer_header());
        if let Some(bearer) = bearer {
            builder = builder.header(reqwest::header::AUTHORIZATION, bearer);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    fn after_response(&self, request: &ApiRequest) {
        if !interceptor::is_auth_endpoint(&request.path) {
            return;
        }
        if let (Some(storage), Some(origin)) = (self.storage.as_ref(), self.origin.as_ref()) {
            self.cookies.persist(storage.as_ref(), origin);
        }
    }

    async fn token_grant(&self, request: ApiRequest) -> Result<TokenGrant, ApiError> {
        let grant: TokenGrant = self.send_json(request).await?;
        if grant.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "token response did not include access_token".to_string(),
            ));
        }
        Ok(grant)
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, ApiError> {
        let body = serde_json::to_value(credentials)
            .map_err(|err| ApiError::InvalidResponse(format!("failed to encode login: {err}")))?;
        self.token_grant(ApiRequest::post("/auth/login", body)).await
    }

    async fn register(&self, registration: &Registration) -> Result<TokenGrant, ApiError> {
        let body = serde_json::to_value(registration).map_err(|err| {
            ApiError::InvalidResponse(format!("failed to encode registration: {err}"))
        })?;
        self.token_grant(ApiRequest::post("/auth/register", body)).await
    }

    async fn refresh(&self) -> Result<TokenGrant, ApiError> {
        self.token_grant(ApiRequest::post("/auth/refresh", serde_json::json!({})))
            .await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.send(ApiRequest::post("/auth/logout", serde_json::json!({})))
            .await
            .map(|_| ())
    }

    async fn status(&self) -> Result<UserProfile, ApiError> {
        self.send_json(ApiRequest::get("/auth/status")).await
    }

    async fn credits(&self) -> Result<CreditsBalance, ApiError> {
        self.send_json(ApiRequest::get("/auth/credits")).await
    }

    fn reload_session(&self) {
        if let (Some(storage), Some(origin)) = (self.storage.as_ref(), self.origin.as_ref()) {
            self.cookies.restore(storage.as_ref(), origin);
        }
    }

    fn forget_session(&self) {
        self.cookies.clear();
        if let Some(storage) = self.storage.as_ref() {
            if let Err(err) = storage.remove(COOKIE_STORAGE_KEY) {
                warn!(error = %err, "failed to remove persisted session cookies");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStorage, RefreshError};
    use crate::testsupport::{http_response, ScriptedServer};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeRefresher {
        calls: AtomicU32,
        tokens: TokenStore,
        outcome: Result<String, RefreshError>,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh_access_token(&self) -> Result<String, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(token) = &self.outcome {
                self.tokens.set(token.clone());
            }
            self.outcome.clone()
        }
    }

    fn client_with_refresher(
        base_url: &str,
        outcome: Result<String, RefreshError>,
    ) -> (ApiClient, Arc<FakeRefresher>) {
        let tokens = TokenStore::new();
        tokens.set("stale-token");
        let client = ApiClient::new(base_url, Duration::from_secs(3), tokens.clone());
        let refresher = Arc::new(FakeRefresher {
            calls: AtomicU32::new(0),
            tokens,
            outcome,
        });
        let refresher_dyn: Arc<dyn TokenRefresher> = refresher.clone();
        client.set_refresher(Arc::downgrade(&refresher_dyn));
        (client, refresher)
    }

    #[tokio::test]
    async fn retries_once_with_refreshed_token_after_401() {
        let server = ScriptedServer::start(vec![
            http_response(401, r#"{"detail":"Could not validate credentials"}"#),
            http_response(200, r#"{"credits":42}"#),
        ])
        .await;
        let (client, refresher) = client_with_refresher(&server.base_url(), Ok("fresh-token".into()));

        let balance = client.credits().await.expect("retry should succeed");
        assert_eq!(balance.credits, 42);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let requests = server.finish().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("authorization: bearer stale-token"));
        assert!(requests[1].contains("authorization: bearer fresh-token"));
    }

    #[tokio::test]
    async fn second_401_is_surfaced_without_another_refresh() {
        let server = ScriptedServer::start(vec![
            http_response(401, r#"{"detail":"expired"}"#),
            http_response(401, r#"{"detail":"still expired"}"#),
        ])
        .await;
        let (client, refresher) = client_with_refresher(&server.base_url(), Ok("fresh-token".into()));

        let err = client.credits().await.expect_err("second 401 surfaces");
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(err.user_message(), "still expired");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.finish().await.len(), 2);
    }

    #[tokio::test]
    async fn login_401_never_triggers_refresh() {
        let server = ScriptedServer::start(vec![http_response(
            401,
            r#"{"status":"failed","error":{"message":"Incorrect email or password","type":"http_error"}}"#,
        )])
        .await;
        let (client, refresher) = client_with_refresher(&server.base_url(), Ok("fresh-token".into()));

        let err = client
            .login(&Credentials::new("a@b.c", "wrong", false))
            .await
            .expect_err("bad credentials");
        assert_eq!(err.user_message(), "Incorrect email or password");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.finish().await.len(), 1);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_original_error() {
        let server =
            ScriptedServer::start(vec![http_response(401, r#"{"detail":"token expired"}"#)]).await;
        let (client, refresher) = client_with_refresher(
            &server.base_url(),
            Err(RefreshError::Rejected("cookie expired".into())),
        );

        let err = client.status().await.expect_err("refresh failed");
        assert_eq!(err.user_message(), "token expired");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.finish().await.len(), 1);
    }

    #[tokio::test]
    async fn auth_responses_persist_refresh_cookie() {
        let login_body = r#"{"access_token":"abc","token_type":"bearer","expires_in":1800,"user":{"id":1,"email":"a@b.c"}}"#;
        let server = ScriptedServer::start(vec![format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nSet-Cookie: refresh_token=r-1; Path=/; HttpOnly\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            login_body.len(),
            login_body
        )])
        .await;
        let storage = Arc::new(MemoryStorage::new());
        let client = ApiClient::new(&server.base_url(), Duration::from_secs(3), TokenStore::new())
            .with_storage(storage.clone());

        let grant = client
            .login(&Credentials::new("a@b.c", "pw", true))
            .await
            .expect("login");
        assert_eq!(grant.access_token, "abc");
        assert_eq!(grant.expires_in, 1800);
        assert_eq!(
            storage.read(COOKIE_STORAGE_KEY).unwrap().as_deref(),
            Some("refresh_token=r-1")
        );

        client.forget_session();
        assert_eq!(storage.read(COOKIE_STORAGE_KEY).unwrap(), None);
        server.finish().await;
    }

    #[tokio::test]
    async fn empty_access_token_is_invalid() {
        let server = ScriptedServer::start(vec![http_response(
            200,
            r#"{"access_token":"","expires_in":1800}"#,
        )])
        .await;
        let client = ApiClient::new(&server.base_url(), Duration::from_secs(3), TokenStore::new());
        let err = client.refresh().await.expect_err("empty token");
        assert!(matches!(err, ApiError::InvalidResponse(_)), "got: {err}");
        server.finish().await;
    }
}
