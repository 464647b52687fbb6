//! MapMyLearn session client: keeps a learning-path account signed in.
//!
//! The crate owns the authentication lifecycle of a client of the
//! learning-path server: the in-memory access token, the persisted session
//! record, single-flight token refresh with bounded backoff, the 401
//! refresh-and-retry interceptor, and cross-process session reconciliation.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mapmylearn_session::api::{ApiClient, Credentials};
//! use mapmylearn_session::auth::{MemoryStorage, SessionManager, SessionStorage, TokenStore};
//! use mapmylearn_session::config::load_config;
//!
//! # async fn example() {
//! let config = load_config(None).unwrap().config;
//! let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
//! let client = Arc::new(
//!     ApiClient::new(&config.api.base_url, config.api.timeout(), TokenStore::new())
//!         .with_storage(Arc::clone(&storage)),
//! );
//! let session = SessionManager::with_client(client, storage, config.session.settings());
//! session.init().await;
//! let user = session
//!     .login(&Credentials::new("ada@example.com", "secret", false))
//!     .await
//!     .unwrap();
//! println!("signed in as {}", user.display_name());
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
#[cfg(test)]
pub mod testsupport;
