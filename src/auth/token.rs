//! Shared access-token slot read by every outgoing request.

use std::sync::{Arc, PoisonError, RwLock};

/// Single source of truth for the bearer credential.
///
/// Clones share the same slot. Writers are the login/refresh install path
/// and logout; last write wins.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    slot: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `token` as the credential for all subsequent requests.
    pub fn set(&self, token: impl Into<String>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(token.into());
    }

    /// Remove the credential; later requests go out unauthenticated.
    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    pub fn get(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `Authorization` header value for the current token, if any.
    pub fn bearer_header(&self) -> Option<String> {
        self.get().map(|token| format!("Bearer {token}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_slot() {
        let store = TokenStore::new();
        let reader = store.clone();
        assert_eq!(reader.bearer_header(), None);

        store.set("abc");
        assert_eq!(reader.get().as_deref(), Some("abc"));
        assert_eq!(reader.bearer_header().as_deref(), Some("Bearer abc"));

        store.set("def");
        assert_eq!(reader.get().as_deref(), Some("def"));

        reader.clear();
        assert_eq!(store.get(), None);
    }
}
