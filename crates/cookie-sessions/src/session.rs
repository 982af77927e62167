//! Individual session handles.
//!
//! A [`Session`] is shared by reference (`Arc`) between the store and every
//! caller that looked it up. Its fields sit behind a per-session reader/writer
//! lock: concurrent reads never block each other, and mutating one session
//! never blocks access to another.
//!
//! Every mutator updates `last_modified`, releases the lock, then tells the
//! owning store, which records the session in its modified index and restarts
//! its inactivity timer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use cookie::Cookie;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cookies::{CookieSink, bind_cookie};
use crate::error::Result;
use crate::uid::prefix;

/// Receives change notifications from the sessions it created.
pub(crate) trait SessionOwner<T>: Send + Sync {
    /// `session` was modified and its uid is now `uid`.
    fn session_modified(&self, uid: &str, session: Arc<Session<T>>);
}

struct SessionState<T> {
    uid: String,
    key: String,
    value: T,
    last_modified: DateTime<Utc>,
}

impl<T> SessionState<T> {
    /// Move `last_modified` to now. Never moves it backwards, even if the
    /// wall clock does.
    fn mark_modified(&mut self) {
        let now = Utc::now();
        if now > self.last_modified {
            self.last_modified = now;
        }
    }
}

/// A per-client session created by [`SessionStore::new_session`](crate::SessionStore::new_session).
///
/// # Changing the uid
///
/// [`set_uid`](Self::set_uid) only changes the session's own field. The store
/// keeps the session under the uid it was created with: `get(old_uid)` still
/// finds it and `get(new_uid)` does not. Modification notices after the change
/// are recorded under the new uid. Re-keying is the store's business, not the
/// session's.
pub struct Session<T> {
    state: RwLock<SessionState<T>>,

    /// Non-owning link to the store; never keeps the store alive.
    owner: Weak<dyn SessionOwner<T>>,

    /// Link to the `Arc` this session lives in, so mutators can hand the
    /// store a shared handle to `self`.
    this: Weak<Session<T>>,

    /// Uid the store committed this session under. Unaffected by `set_uid`.
    store_uid: String,

    /// Set once the store removed the session.
    detached: AtomicBool,
}

impl<T> Session<T> {
    pub(crate) fn new(uid: String, value: T, owner: Weak<dyn SessionOwner<T>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store_uid: uid.clone(),
            state: RwLock::new(SessionState {
                uid,
                key: String::new(),
                value,
                last_modified: Utc::now(),
            }),
            owner,
            this: this.clone(),
            detached: AtomicBool::new(false),
        })
    }

    /// Unique identifier of the session.
    pub fn uid(&self) -> String {
        self.state.read().uid.clone()
    }

    /// Key of the session, used as the cookie name. Empty until set.
    pub fn key(&self) -> String {
        self.state.read().key.clone()
    }

    /// When the session was last modified.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.state.read().last_modified
    }

    /// Borrow the value under the shared lock.
    ///
    /// Do not call mutators of the same session from `f`; the lock is not
    /// reentrant.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.read().value)
    }

    /// Set a new uid. See [Changing the uid](Self#changing-the-uid).
    pub fn set_uid(&self, uid: impl Into<String>) {
        let uid = uid.into();
        self.modify(|state| state.uid = uid);
    }

    /// Set a new key.
    pub fn set_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.modify(|state| state.key = key);
    }

    /// Replace the value.
    pub fn set_value(&self, value: T) {
        self.modify(|state| state.value = value);
    }

    /// Change the value in place under the exclusive lock.
    pub fn update_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.modify(|state| f(&mut state.value))
    }

    /// Mark the session as modified without changing any field.
    pub fn touch(&self) {
        self.modify(|_| ());
    }

    /// Whether the store has removed this session.
    ///
    /// A detached session still works as a value holder, but its changes no
    /// longer reach the store's modified index.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Copy the session into a cookie for the response.
    ///
    /// `template` carries caller defaults (domain, path, expiry, flags); only
    /// its name and value are overwritten, with the key and the uid. Without a
    /// template an empty cookie is used.
    pub fn bind_cookie(&self, template: Option<Cookie<'static>>) -> Cookie<'static> {
        let (key, uid) = {
            let state = self.state.read();
            (state.key.clone(), state.uid.clone())
        };
        bind_cookie(key, uid, template)
    }

    /// Bind the session to a cookie and hand it to `sink`.
    pub fn set_cookie<S>(&self, sink: &mut S, template: Option<Cookie<'static>>) -> Result<()>
    where
        S: CookieSink + ?Sized,
    {
        sink.set_cookie(self.bind_cookie(template))
    }

    pub(crate) fn store_uid(&self) -> &str {
        &self.store_uid
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn modify<R>(&self, f: impl FnOnce(&mut SessionState<T>) -> R) -> R {
        let (result, uid) = {
            let mut state = self.state.write();
            let result = f(&mut state);
            state.mark_modified();
            (result, state.uid.clone())
        };

        if let (Some(owner), Some(this)) = (self.owner.upgrade(), self.this.upgrade()) {
            owner.session_modified(&uid, this);
        }

        result
    }
}

impl<T: Clone> Session<T> {
    /// Copy of the value.
    pub fn value(&self) -> T {
        self.state.read().value.clone()
    }

    /// Consistent copy of every field, taken under one lock.
    pub fn snapshot(&self) -> SessionRecord<T> {
        let state = self.state.read();
        SessionRecord {
            uid: state.uid.clone(),
            key: state.key.clone(),
            value: state.value.clone(),
            last_modified: state.last_modified,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Session")
            .field("uid", &format_args!("{}...", prefix(&state.uid)))
            .field("key", &state.key)
            .field("value", &state.value)
            .field("last_modified", &state.last_modified)
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// The public operations of a session handle.
///
/// Lets callers depend on the session contract rather than on [`Session`]
/// itself, so alternate stores or value types can stand in.
pub trait SessionHandle<T>: Send + Sync {
    /// Unique identifier of the session.
    fn uid(&self) -> String;

    /// Set a new uid without re-keying the store.
    fn set_uid(&self, uid: String);

    /// Copy of the value.
    fn value(&self) -> T;

    /// Key of the session, used as the cookie name.
    fn key(&self) -> String;

    /// Set a new key.
    fn set_key(&self, key: String);

    /// Replace the value.
    fn set_value(&self, value: T);

    /// When the session was last modified.
    fn last_modified(&self) -> DateTime<Utc>;

    /// Mark the session as modified without changing any field.
    fn touch(&self);
}

impl<T> SessionHandle<T> for Session<T>
where
    T: Clone + Send + Sync,
{
    fn uid(&self) -> String {
        Session::uid(self)
    }

    fn set_uid(&self, uid: String) {
        Session::set_uid(self, uid);
    }

    fn value(&self) -> T {
        Session::value(self)
    }

    fn key(&self) -> String {
        Session::key(self)
    }

    fn set_key(&self, key: String) {
        Session::set_key(self, key);
    }

    fn set_value(&self, value: T) {
        Session::set_value(self, value);
    }

    fn last_modified(&self) -> DateTime<Utc> {
        Session::last_modified(self)
    }

    fn touch(&self) {
        Session::touch(self);
    }
}

/// Plain copy of a session's fields, for writing to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord<T> {
    /// Unique identifier of the session.
    pub uid: String,
    /// Key of the session (cookie name).
    pub key: String,
    /// Session payload.
    pub value: T,
    /// When the session was last modified.
    pub last_modified: DateTime<Utc>,
}
