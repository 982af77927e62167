//! Session store: creation, lookup and removal of sessions.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::cache::TtlCache;
use crate::config::Requirements;
use crate::cookies::CookieSource;
use crate::session::{Session, SessionOwner, SessionRecord};
use crate::uid::{self, RandomUid, Reservations, UidGenerator};

/// Shared state behind a [`SessionStore`] handle.
struct StoreInner<T, G> {
    /// Normalized configuration, fixed at construction.
    requirements: Requirements,

    /// Live sessions, dropped after `requirements.timeout` of inactivity.
    sessions: TtlCache<String, Arc<Session<T>>>,

    /// Sessions changed since the caller last drained this index. Entries do
    /// not expire and are never cleared by the store on its own.
    modified: TtlCache<String, Arc<Session<T>>>,

    /// Uids claimed by in-flight allocations.
    reservations: Reservations,

    generator: G,

    /// Serializes membership changes (commit, remove, drain) against each
    /// other and against `exist` and modification notices.
    membership: RwLock<()>,
}

impl<T, G> StoreInner<T, G> {
    fn cleanup_expired(&self) -> usize {
        let _membership = self.membership.write();
        let removed = self.sessions.cleanup_expired();
        if removed > 0 {
            debug!(
                removed,
                remaining = self.sessions.len(),
                "Cleaned up expired sessions"
            );
        }
        removed
    }
}

impl<T, G> SessionOwner<T> for StoreInner<T, G>
where
    T: Send + Sync,
    G: UidGenerator,
{
    fn session_modified(&self, uid: &str, session: Arc<Session<T>>) {
        let _membership = self.membership.read();
        if session.is_detached() {
            return;
        }

        // The timer belongs to the entry committed under the creation uid
        let home = session.store_uid();
        if self
            .sessions
            .get(home)
            .is_some_and(|live| Arc::ptr_eq(&live, &session))
        {
            self.sessions.touch(home);
        }
        self.modified.add(uid.to_string(), session);
        trace!(uid = %uid::prefix(uid), "Session marked modified");
    }
}

/// Store of per-client sessions, keyed by uid.
///
/// Cloning is cheap and yields another handle to the same store. Stores are
/// fully independent of each other; uids are unique within one store only.
///
/// # Modified index
///
/// Every session created or changed is recorded in the modified index, which
/// an external persistence layer reads with [`modified`](Self::modified) or
/// drains with [`take_modified`](Self::take_modified). The store never clears
/// the index on its own: sessions that expire stay in it, so their last state
/// can still be saved, until [`remove`](Self::remove) or a drain.
pub struct SessionStore<T, G = RandomUid> {
    inner: Arc<StoreInner<T, G>>,
}

impl<T, G> Clone for SessionStore<T, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SessionStore<T, RandomUid>
where
    T: Send + Sync + 'static,
{
    /// Create a store with random uids. `requirements` is normalized first.
    pub fn new(requirements: Requirements) -> Self {
        Self::with_generator(requirements, RandomUid)
    }
}

impl<T> Default for SessionStore<T, RandomUid>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(Requirements::default())
    }
}

impl<T, G> SessionStore<T, G>
where
    T: Send + Sync + 'static,
    G: UidGenerator + 'static,
{
    /// Create a store drawing uid candidates from `generator`.
    pub fn with_generator(requirements: Requirements, generator: G) -> Self {
        let requirements = requirements.normalize();
        let timeout = requirements.timeout;

        Self {
            inner: Arc::new(StoreInner {
                requirements,
                sessions: TtlCache::new(Some(timeout)),
                modified: TtlCache::new(None),
                reservations: Reservations::new(),
                generator,
                membership: RwLock::new(()),
            }),
        }
    }

    /// The normalized configuration.
    pub fn requirements(&self) -> &Requirements {
        &self.inner.requirements
    }

    /// Create a session holding `value` and register it.
    ///
    /// Never fails. Allocation retries until it finds a free uid, so it only
    /// returns once the uid space and the external existence check leave room
    /// for one; see [`Requirements::uid_length`].
    pub fn new_session(&self, value: T) -> Arc<Session<T>> {
        let inner = &self.inner;
        let uid = uid::allocate(
            &inner.generator,
            inner.requirements.uid_length,
            &inner.reservations,
            // Expired sessions still awaiting a sweep or a drain keep their uid
            |candidate| {
                inner.sessions.contains_key(candidate)
                    || inner.modified.contains_key(candidate)
                    || inner.requirements.uid_exists(candidate)
            },
        );

        let owner: Weak<StoreInner<T, G>> = Arc::downgrade(&self.inner);
        let owner: Weak<dyn SessionOwner<T>> = owner;
        let session = Session::new(uid.clone(), value, owner);

        {
            let _membership = inner.membership.write();
            inner.sessions.add_with_timeout(
                uid.clone(),
                Arc::clone(&session),
                inner.requirements.timeout,
            );
            inner.modified.add(uid.clone(), Arc::clone(&session));
            inner.reservations.release(&uid);
        }

        debug!(
            uid = %uid::prefix(&uid),
            sessions = inner.sessions.len(),
            "Session created"
        );

        session
    }

    /// Find a live session by uid.
    pub fn get(&self, uid: &str) -> Option<Arc<Session<T>>> {
        self.inner.sessions.get(uid)
    }

    /// Find the session named by the inbound cookie called
    /// [`Requirements::default_key`].
    ///
    /// A missing cookie, an unreadable cookie header and an unknown uid all
    /// yield `None`.
    pub fn get_from_cookie<S>(&self, source: &S) -> Option<Arc<Session<T>>>
    where
        S: CookieSource + ?Sized,
    {
        let cookie = match source.cookie(&self.inner.requirements.default_key) {
            Ok(cookie) => cookie,
            Err(e) => {
                trace!(error = %e, "No session cookie");
                return None;
            }
        };

        self.get(cookie.value())
    }

    /// Remove a session from the store and from the modified index.
    ///
    /// Idempotent. Holders of the removed session can keep using it, but its
    /// changes are no longer recorded.
    pub fn remove(&self, uid: &str) {
        let _membership = self.inner.membership.write();
        let live = self.inner.sessions.remove(uid);
        let pending = self.inner.modified.remove(uid);

        let mut removed = false;
        for session in live.iter().chain(pending.iter()) {
            session.detach();
            removed = true;
        }

        if removed {
            debug!(uid = %uid::prefix(uid), "Session removed");
        }
    }

    /// Check if a live session has this uid.
    pub fn exist(&self, uid: &str) -> bool {
        let _membership = self.inner.membership.read();
        self.inner.sessions.exist(uid)
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Check if the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Number of sessions in the modified index.
    pub fn modified_len(&self) -> usize {
        self.inner.modified.len()
    }

    /// Sessions in the modified index. Does not clear it.
    pub fn modified(&self) -> Vec<Arc<Session<T>>> {
        self.inner.modified.values()
    }

    /// Empty the modified index and return what it held.
    ///
    /// Sessions modified after the drain are recorded again.
    pub fn take_modified(&self) -> Vec<Arc<Session<T>>> {
        let _membership = self.inner.membership.write();
        let drained: Vec<_> = self
            .inner
            .modified
            .drain()
            .into_iter()
            .map(|(_, session)| session)
            .collect();

        debug!(count = drained.len(), "Drained modified sessions");
        drained
    }

    /// Drop one uid from the modified index, e.g. after it was persisted.
    /// The session itself stays in the store.
    pub fn clear_modified(&self, uid: &str) {
        let _membership = self.inner.membership.write();
        self.inner.modified.remove(uid);
    }

    /// Remove expired sessions from the store, returning how many went.
    ///
    /// The modified index is left alone.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired()
    }

    /// Sweep expired sessions every [`Requirements::cleanup_interval`].
    ///
    /// Must be called within a tokio runtime. The task holds no strong
    /// reference to the store and ends once every handle is dropped; abort
    /// the returned handle to stop it earlier.
    pub fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let store = Arc::downgrade(&self.inner);
        let period = self.inner.requirements.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = store.upgrade() else {
                    debug!("Session store dropped, stopping cleanup task");
                    break;
                };
                inner.cleanup_expired();
            }
        })
    }
}

impl<T, G> SessionStore<T, G>
where
    T: Clone + Send + Sync + 'static,
    G: UidGenerator + 'static,
{
    /// Snapshots of every session in the modified index. Does not clear it.
    pub fn modified_records(&self) -> Vec<SessionRecord<T>> {
        self.inner
            .modified
            .values()
            .iter()
            .map(|session| session.snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use cookie::{Cookie, CookieJar};

    fn store() -> SessionStore<String> {
        SessionStore::new(Requirements::default())
    }

    #[test]
    fn test_new_session_is_registered() {
        let store = store();
        let session = store.new_session("hello".to_string());

        assert_eq!(session.value(), "hello");
        assert_eq!(session.uid().len(), 99);
        assert!(store.exist(&session.uid()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.modified_len(), 1);
    }

    #[test]
    fn test_uids_are_distinct() {
        let store = store();
        let uids: HashSet<String> = (0..200)
            .map(|i| store.new_session(i.to_string()).uid())
            .collect();

        assert_eq!(uids.len(), 200);
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn test_get_returns_same_session() {
        let store = store();
        let session = store.new_session("a".to_string());

        let found = store.get(&session.uid()).unwrap();
        assert!(Arc::ptr_eq(&session, &found));

        found.set_value("b".to_string());
        assert_eq!(session.value(), "b");
    }

    #[test]
    fn test_get_unknown_uid() {
        let store = store();
        store.new_session("a".to_string());

        assert!(store.get("this_should_not_work").is_none());
        assert!(!store.exist("this_should_not_work"));
    }

    #[test]
    fn test_remove() {
        let store = store();
        let a = store.new_session("a".to_string());
        let b = store.new_session("b".to_string());

        store.remove(&a.uid());

        assert!(!store.exist(&a.uid()));
        assert!(store.get(&a.uid()).is_none());
        assert!(store.exist(&b.uid()));
        assert_eq!(store.modified_len(), 1);
        assert!(a.is_detached());
        assert!(!b.is_detached());

        // Idempotent
        store.remove(&a.uid());
        store.remove("never-existed");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_removed_session_stays_out_of_modified() {
        let store = store();
        let session = store.new_session("a".to_string());
        store.remove(&session.uid());

        session.set_value("b".to_string());

        assert_eq!(store.modified_len(), 0);
        assert!(!store.exist(&session.uid()));
    }

    #[test]
    fn test_mutation_re_records_after_drain() {
        let store = store();
        let a = store.new_session("a".to_string());
        store.new_session("b".to_string());

        let drained = store.take_modified();
        assert_eq!(drained.len(), 2);
        assert_eq!(store.modified_len(), 0);

        a.set_value("a2".to_string());
        let modified = store.modified();
        assert_eq!(modified.len(), 1);
        assert!(Arc::ptr_eq(&modified[0], &a));

        // Reading does not clear
        assert_eq!(store.modified_len(), 1);
    }

    #[test]
    fn test_clear_modified() {
        let store = store();
        let session = store.new_session("a".to_string());

        store.clear_modified(&session.uid());

        assert_eq!(store.modified_len(), 0);
        assert!(store.exist(&session.uid()));
    }

    #[test]
    fn test_modified_records() {
        let store = store();
        let session = store.new_session("a".to_string());
        session.set_key("_ssid");

        let records = store.modified_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uid, session.uid());
        assert_eq!(records[0].key, "_ssid");
        assert_eq!(records[0].value, "a");
    }

    #[test]
    fn test_set_uid_does_not_rekey() {
        let store = store();
        let session = store.new_session("a".to_string());
        let old_uid = session.uid();

        session.set_uid("renamed");

        assert_eq!(session.uid(), "renamed");
        assert!(store.exist(&old_uid));
        assert!(!store.exist("renamed"));
        assert!(store.get("renamed").is_none());
        // The notice after the rename is recorded under the new uid
        assert_eq!(store.modified_len(), 2);
    }

    #[test]
    fn test_renamed_session_refreshes_its_own_entry() {
        let requirements = Requirements::new().with_timeout(Duration::from_millis(100));
        let store: SessionStore<String> = SessionStore::new(requirements);
        let a = store.new_session("a".to_string());
        let b = store.new_session("b".to_string());
        let a_uid = a.uid();
        let b_uid = b.uid();

        a.set_uid(b_uid.clone());
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(40));
            a.touch();
        }

        // b sat idle past the timeout; a kept its creation entry alive
        assert!(!store.exist(&b_uid));
        assert!(store.exist(&a_uid));
    }

    #[test]
    fn test_pending_uid_is_not_reallocated() {
        let next = AtomicUsize::new(0);
        let generator = move |_: usize| match next.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => "same".to_string(),
            _ => "other".to_string(),
        };
        let requirements = Requirements::new().with_timeout(Duration::from_millis(20));
        let store: SessionStore<String, _> = SessionStore::with_generator(requirements, generator);

        let old = store.new_session("old".to_string());
        old.set_value("final".to_string());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!store.exist("same"));

        let new = store.new_session("new".to_string());
        assert_eq!(new.uid(), "other");

        old.set_value("ghost".to_string());
        let mut values: Vec<String> = store
            .modified_records()
            .into_iter()
            .map(|record| record.value)
            .collect();
        values.sort();
        assert_eq!(values, vec!["ghost".to_string(), "new".to_string()]);
        assert!(store.exist("other"));
    }

    #[test]
    fn test_get_from_cookie() {
        let store = store();
        let session = store.new_session("hi mom!".to_string());

        let mut jar = CookieJar::new();
        jar.add(Cookie::new("_ssid", session.uid()));

        let found = store.get_from_cookie(&jar).unwrap();
        assert_eq!(found.value(), "hi mom!");
    }

    #[test]
    fn test_get_from_cookie_misses() {
        let store = store();
        store.new_session("a".to_string());

        let empty = CookieJar::new();
        assert!(store.get_from_cookie(&empty).is_none());

        let mut unknown = CookieJar::new();
        unknown.add(Cookie::new("_ssid", "unknown"));
        assert!(store.get_from_cookie(&unknown).is_none());
    }

    #[test]
    fn test_get_from_cookie_uses_default_key() {
        let store: SessionStore<String> =
            SessionStore::new(Requirements::new().with_default_key("app"));
        let session = store.new_session("a".to_string());

        let mut jar = CookieJar::new();
        jar.add(Cookie::new("_ssid", session.uid()));
        assert!(store.get_from_cookie(&jar).is_none());

        jar.add(Cookie::new("app", session.uid()));
        assert!(store.get_from_cookie(&jar).is_some());
    }

    #[test]
    fn test_uid_exist_rejects_candidates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let requirements = Requirements::new().with_uid_exist(move |_| {
            // Report the first two candidates as taken
            seen.fetch_add(1, Ordering::SeqCst) < 2
        });

        let store: SessionStore<String> = SessionStore::new(requirements);
        let session = store.new_session("a".to_string());

        assert!(store.exist(&session.uid()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_colliding_generator_retries() {
        let next = AtomicUsize::new(0);
        let generator = move |_: usize| {
            // Every candidate is produced twice in a row
            let n = next.fetch_add(1, Ordering::SeqCst) / 2;
            format!("uid-{n}")
        };

        let store: SessionStore<String, _> =
            SessionStore::with_generator(Requirements::default(), generator);
        let a = store.new_session("a".to_string());
        let b = store.new_session("b".to_string());

        assert_eq!(a.uid(), "uid-0");
        assert_eq!(b.uid(), "uid-1");
    }

    #[test]
    fn test_reservations_released_after_commit() {
        let store = store();
        store.new_session("a".to_string());
        assert!(store.inner.reservations.is_empty());
    }

    #[test]
    fn test_expiry_keeps_modified_entry() {
        let requirements = Requirements::new().with_timeout(Duration::from_millis(20));
        let store: SessionStore<String> = SessionStore::new(requirements);
        let session = store.new_session("a".to_string());
        let uid = session.uid();

        std::thread::sleep(Duration::from_millis(50));

        assert!(!store.exist(&uid));
        assert!(store.get(&uid).is_none());
        assert_eq!(store.modified_len(), 1);

        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.is_empty());
        assert_eq!(store.modified_len(), 1);
    }

    #[test]
    fn test_mutation_refreshes_timeout() {
        let requirements = Requirements::new().with_timeout(Duration::from_millis(100));
        let store: SessionStore<String> = SessionStore::new(requirements);
        let session = store.new_session("a".to_string());
        let uid = session.uid();

        std::thread::sleep(Duration::from_millis(60));
        session.touch();
        std::thread::sleep(Duration::from_millis(60));

        assert!(store.exist(&uid));
    }

    #[test]
    fn test_clones_share_state() {
        let store = store();
        let other = store.clone();
        let session = store.new_session("a".to_string());

        assert!(other.exist(&session.uid()));
        other.remove(&session.uid());
        assert!(!store.exist(&session.uid()));
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps_expired() {
        let requirements = Requirements::new()
            .with_timeout(Duration::from_millis(20))
            .with_cleanup_interval(Duration::from_millis(10));
        let store: SessionStore<String> = SessionStore::new(requirements);
        store.new_session("a".to_string());

        let handle = store.spawn_cleanup_task();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_with_store() {
        let requirements = Requirements::new().with_cleanup_interval(Duration::from_millis(10));
        let store: SessionStore<String> = SessionStore::new(requirements);

        let handle = store.spawn_cleanup_task();
        drop(store);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task should stop")
            .unwrap();
    }
}
