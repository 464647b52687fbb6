//! Refresh-cookie jar that survives process restarts.
//!
//! The server carries the refresh credential in an http-only cookie. The jar
//! wraps reqwest's [`Jar`] so it can be cleared on logout and snapshotted into
//! session storage under [`COOKIE_STORAGE_KEY`].

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::auth::SessionStorage;

/// Storage key holding the `Cookie` header for the API origin.
pub const COOKIE_STORAGE_KEY: &str = "cookies";

/// Clearable cookie store shared with the reqwest client.
#[derive(Default)]
pub(crate) struct SessionCookies {
    jar: RwLock<Arc<Jar>>,
}

impl std::fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookies").field("jar", &"***").finish()
    }
}

impl SessionCookies {
    fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drop every cookie.
    pub(crate) fn clear(&self) {
        let mut jar = self.jar.write().unwrap_or_else(PoisonError::into_inner);
        *jar = Arc::new(Jar::default());
    }

    /// Current `Cookie` header for `origin`, if any cookie applies.
    pub(crate) fn header_for(&self, origin: &Url) -> Option<String> {
        self.jar()
            .cookies(origin)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// Load a previously persisted `Cookie` header into the jar.
    ///
    /// Cookies already in the jar are replaced when storage holds an entry
    /// and kept when it does not.
    pub(crate) fn restore(&self, storage: &dyn SessionStorage, origin: &Url) {
        let saved = match storage.read(COOKIE_STORAGE_KEY) {
            Ok(Some(saved)) => saved,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "failed to read persisted cookies");
                return;
            }
        };
        let jar = Jar::default();
        for pair in saved.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
            jar.add_cookie_str(&format!("{pair}; Path=/"), origin);
        }
        *self.jar.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(jar);
        debug!("restored persisted session cookies");
    }

    /// Snapshot the jar for `origin` into storage, removing the entry when empty.
    pub(crate) fn persist(&self, storage: &dyn SessionStorage, origin: &Url) {
        let result = match self.header_for(origin) {
            Some(header) => storage.write(COOKIE_STORAGE_KEY, &header),
            None => storage.remove(COOKIE_STORAGE_KEY).map(|_| ()),
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to persist session cookies");
        }
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar().cookies(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStorage;

    fn origin() -> Url {
        Url::parse("http://127.0.0.1:8000/").unwrap()
    }

    #[test]
    fn persist_and_restore_round_trip() {
        let storage = MemoryStorage::new();
        let cookies = SessionCookies::default();
        let header = HeaderValue::from_static("refresh_token=abc; Path=/; HttpOnly");
        cookies.set_cookies(&mut std::iter::once(&header), &origin());
        cookies.persist(&storage, &origin());
        assert_eq!(
            storage.read(COOKIE_STORAGE_KEY).unwrap().as_deref(),
            Some("refresh_token=abc")
        );

        let restored = SessionCookies::default();
        restored.restore(&storage, &origin());
        assert_eq!(
            restored.header_for(&origin()).as_deref(),
            Some("refresh_token=abc")
        );
    }

    #[test]
    fn restore_replaces_stale_cookie_with_stored_one() {
        let storage = MemoryStorage::new();
        let cookies = SessionCookies::default();
        let stale = HeaderValue::from_static("refresh_token=old; Path=/; HttpOnly");
        cookies.set_cookies(&mut std::iter::once(&stale), &origin());

        cookies.restore(&storage, &origin());
        assert_eq!(cookies.header_for(&origin()).as_deref(), Some("refresh_token=old"));

        storage.write(COOKIE_STORAGE_KEY, "refresh_token=new").unwrap();
        cookies.restore(&storage, &origin());
        assert_eq!(cookies.header_for(&origin()).as_deref(), Some("refresh_token=new"));
    }

    #[test]
    fn clear_empties_jar_and_persist_removes_entry() {
        let storage = MemoryStorage::new();
        storage.write(COOKIE_STORAGE_KEY, "refresh_token=abc").unwrap();
        let cookies = SessionCookies::default();
        cookies.restore(&storage, &origin());
        assert!(cookies.header_for(&origin()).is_some());

        cookies.clear();
        assert!(cookies.header_for(&origin()).is_none());
        cookies.persist(&storage, &origin());
        assert_eq!(storage.read(COOKIE_STORAGE_KEY).unwrap(), None);
    }
}
