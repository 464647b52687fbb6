//! Shared test fixtures for storage/API/session test modules.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::api::{AuthApi, CreditsBalance, Credentials, Registration, TokenGrant};
use crate::auth::UserProfile;
use crate::error::ApiError;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("mapmylearn-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    /// Root directory path for this fixture.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a child path under the fixture root.
    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.child(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Build a raw HTTP/1.1 response with a JSON body.
pub fn http_response(status: u16, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// One-connection-per-response HTTP fixture.
///
/// Serves the scripted responses in order and records each raw request,
/// lowercased so header assertions ignore casing.
pub struct ScriptedServer {
    addr: SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

impl ScriptedServer {
    pub async fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                requests.push(read_request(&mut stream).await.to_ascii_lowercase());
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            requests
        });
        Self { addr, handle }
    }

    /// Base URL including the `/api` prefix the server mounts routes under.
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Wait for every scripted response to be served and return the requests.
    ///
    /// Aborts instead of waiting when fewer requests arrived than scripted.
    pub async fn finish(self) -> Vec<String> {
        let mut handle = self.handle;
        match tokio::time::timeout(std::time::Duration::from_millis(500), &mut handle).await {
            Ok(Ok(requests)) => requests,
            _ => {
                handle.abort();
                Vec::new()
            }
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(read) = stream.read(&mut chunk).await else {
            break;
        };
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.trim()
                        .eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Minimal profile with a numeric id and email.
pub fn user_profile(id: i64, email: &str) -> UserProfile {
    serde_json::from_value(serde_json::json!({ "id": id, "email": email }))
        .expect("valid profile fixture")
}

/// Token grant for user 1 with the given token and lifetime.
pub fn token_grant(access_token: &str, expires_in: i64) -> TokenGrant {
    TokenGrant {
        access_token: access_token.to_string(),
        token_type: Some("bearer".to_string()),
        expires_in,
        user: Some(user_profile(1, "learner@example.com")),
    }
}

/// Scripted reply for one fake server call.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Grant(TokenGrant),
    Status(u16),
}

impl FakeReply {
    fn into_result(self) -> Result<TokenGrant, ApiError> {
        match self {
            Self::Grant(grant) => Ok(grant),
            Self::Status(code) => Err(ApiError::status(code, format!("fake status {code}"))),
        }
    }
}

/// In-process [`AuthApi`] with scripted replies and call counters.
///
/// Refresh replies are consumed in order; once the script runs out the
/// fallback reply is used.
pub struct FakeAuthApi {
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub credits_calls: AtomicU32,
    pub forget_calls: AtomicU32,
    pub reload_calls: AtomicU32,
    login_reply: Mutex<FakeReply>,
    refresh_script: Mutex<VecDeque<FakeReply>>,
    refresh_fallback: Mutex<FakeReply>,
    refresh_latency: Mutex<Duration>,
    credits: Mutex<Result<i64, u16>>,
}

impl FakeAuthApi {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            credits_calls: AtomicU32::new(0),
            forget_calls: AtomicU32::new(0),
            reload_calls: AtomicU32::new(0),
            login_reply: Mutex::new(FakeReply::Grant(token_grant("login-token", 1800))),
            refresh_script: Mutex::new(VecDeque::new()),
            refresh_fallback: Mutex::new(FakeReply::Grant(token_grant("refreshed-token", 1800))),
            refresh_latency: Mutex::new(Duration::ZERO),
            credits: Mutex::new(Ok(42)),
        }
    }

    pub fn with_login(self, reply: FakeReply) -> Self {
        *self.login_reply.lock().unwrap() = reply;
        self
    }

    pub fn with_refresh_script(self, replies: Vec<FakeReply>) -> Self {
        *self.refresh_script.lock().unwrap() = replies.into();
        self
    }

    pub fn with_refresh_fallback(self, reply: FakeReply) -> Self {
        *self.refresh_fallback.lock().unwrap() = reply;
        self
    }

    pub fn with_refresh_latency(self, latency: Duration) -> Self {
        *self.refresh_latency.lock().unwrap() = latency;
        self
    }

    pub fn with_credits(self, credits: Result<i64, u16>) -> Self {
        *self.credits.lock().unwrap() = credits;
        self
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, _credentials: &Credentials) -> Result<TokenGrant, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_reply.lock().unwrap().clone().into_result()
    }

    async fn register(&self, _registration: &Registration) -> Result<TokenGrant, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_reply.lock().unwrap().clone().into_result()
    }

    async fn refresh(&self) -> Result<TokenGrant, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.refresh_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let scripted = self.refresh_script.lock().unwrap().pop_front();
        scripted
            .unwrap_or_else(|| self.refresh_fallback.lock().unwrap().clone())
            .into_result()
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<UserProfile, ApiError> {
        Ok(user_profile(1, "learner@example.com"))
    }

    async fn credits(&self) -> Result<CreditsBalance, ApiError> {
        self.credits_calls.fetch_add(1, Ordering::SeqCst);
        match *self.credits.lock().unwrap() {
            Ok(credits) => Ok(CreditsBalance {
                credits,
                user_id: Some(serde_json::json!(1)),
                email: Some("learner@example.com".to_string()),
            }),
            Err(code) => Err(ApiError::status(code, "credits unavailable")),
        }
    }

    fn forget_session(&self) {
        self.forget_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn reload_session(&self) {
        self.reload_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_and_resolves_paths() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.txt", "hello");
        assert_eq!(fs::read_to_string(file).unwrap(), "hello");
        assert!(fixture.path().exists());
    }

    #[test]
    fn http_response_sets_content_length() {
        let raw = http_response(200, "{}");
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Content-Length: 2\r\n"));
        assert!(raw.ends_with("\r\n\r\n{}"));
    }
}
