//! Cookie-bound session store for HTTP servers.
//!
//! This crate issues and tracks short-lived per-client sessions:
//! - Unique uid allocation, race-free under concurrent creation
//! - Lock-guarded session state, shared by `Arc` between request handlers
//! - Inactivity timeout with lazy expiry and an optional background sweeper
//! - A modified index for incremental persistence by an external layer
//! - Cookie binding for `cookie::CookieJar` and `http` headers
//!
//! It does not authenticate clients, sign or encrypt uids, or persist
//! anything itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use cookie_sessions::{Requirements, SessionStore};
//!
//! let store: SessionStore<String> =
//!     SessionStore::new(Requirements::new().with_timeout(Duration::from_secs(1800)));
//!
//! let session = store.new_session("hello".to_string());
//! session.set_key(store.requirements().default_key.clone());
//! session.set_cookie(response.headers_mut(), None)?;
//!
//! // On the next request
//! if let Some(session) = store.get_from_cookie(request.headers()) {
//!     session.set_value("again".to_string());
//! }
//!
//! // Periodically, from the persistence layer
//! for record in store.take_modified().iter().map(|s| s.snapshot()) {
//!     db.save(&record)?;
//! }
//! ```

mod cache;
mod config;
mod cookies;
mod error;
mod session;
mod store;
mod uid;

pub use cache::{CacheEntry, TtlCache};
pub use config::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_KEY, DEFAULT_TIMEOUT, DEFAULT_UID_LENGTH, Requirements,
    RequirementsSection, UidExistFn,
};
pub use cookies::{CookieSink, CookieSource, bind_cookie};
pub use error::{Error, Result};
pub use session::{Session, SessionHandle, SessionRecord};
pub use store::SessionStore;
pub use uid::{RETRY_WARN_INTERVAL, RandomUid, Reservations, UID_ALPHABET, UidGenerator};

pub use cookie::{Cookie, CookieJar};
