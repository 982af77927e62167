//! Keyed cache with per-entry expiry.
//!
//! Entries expire lazily: an expired entry is invisible to lookups as soon as
//! its deadline passes, but it stays in memory until [`TtlCache::cleanup_expired`]
//! (or the store's sweeper) removes it.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::trace;

/// Entry stored in the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,

    /// When this entry was inserted into the cache.
    inserted_at: Instant,

    /// Inactivity window; `None` means the entry never expires.
    ttl: Option<Duration>,

    /// Deadline after which the entry is treated as absent. A TTL too large
    /// to represent as an `Instant` leaves this `None`.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            ttl,
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
        }
    }

    /// The cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the entry, returning the cached value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// When the entry was inserted.
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// When the entry expires, if it expires at all.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Restart the inactivity window from `now`.
    fn touch(&mut self, now: Instant) {
        self.expires_at = self.ttl.and_then(|ttl| now.checked_add(ttl));
    }
}

/// Thread-safe keyed cache with optional time-to-live per entry.
///
/// All methods take `&self`; locking is internal, so callers never wrap the
/// cache in a lock of their own.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,

    /// TTL applied by [`TtlCache::add`]. `None` means no expiry.
    default_ttl: Option<Duration>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<K, V> TtlCache<K, V> {
    /// Create an empty cache whose [`add`](Self::add) uses `default_ttl`.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    /// Insert with the cache's default TTL, replacing any previous entry.
    pub fn add(&self, key: K, value: V) {
        let entry = CacheEntry::new(value, self.default_ttl);
        self.entries.write().insert(key, entry);
    }

    /// Insert with an explicit TTL, replacing any previous entry.
    pub fn add_with_timeout(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry::new(value, Some(ttl));
        self.entries.write().insert(key, entry);
    }

    /// Check if an unexpired entry exists for `key`.
    pub fn exist<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Check if anything is stored for `key`, expired or not.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.read().contains_key(key)
    }

    /// Restart the inactivity window of a live entry.
    ///
    /// Returns `false` if the entry is missing or already expired; an expired
    /// entry is not revived.
    pub fn touch<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now);
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for `key` and return its value.
    ///
    /// An expired entry that has not been swept yet is still returned.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.write().remove(key).map(CacheEntry::into_value)
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();

        if removed > 0 {
            trace!(removed, remaining = entries.len(), "Swept expired cache entries");
        }

        removed
    }
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Get a copy of the value for `key`, or `None` if missing or expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Get a copy of the whole entry for `key`, or `None` if missing or expired.
    pub fn get_entry<Q>(&self, key: &Q) -> Option<CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .cloned()
    }

    /// Copies of all unexpired values, in no particular order.
    pub fn values(&self) -> Vec<V> {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Remove every entry, returning the unexpired ones.
    pub fn drain(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries
            .drain()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }
}
