//! Unique identifier allocation.
//!
//! A candidate uid is drawn from a [`UidGenerator`] and kept only if it is
//! free in every known source. The claim on the reservation set is an atomic
//! insert-if-absent, and the live-session check runs after the claim, so two
//! concurrent allocations can never hand out the same uid.
//!
//! Allocation retries without bound. A generator with a tiny identifier space,
//! or an existence check that always answers "taken", makes allocation spin
//! forever; size `uid_length` so that collisions are negligible.

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{trace, warn};

/// Symbols used by [`RandomUid`]: ASCII letters, digits and `-_.~!*`, all
/// valid in a cookie value without quoting.
pub const UID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.~!*";

/// Consecutive collisions between two allocation warnings.
pub const RETRY_WARN_INTERVAL: u64 = 1000;

/// Source of candidate identifiers.
pub trait UidGenerator: Send + Sync {
    /// Produce a candidate identifier of `length` characters.
    fn generate(&self, length: usize) -> String;
}

impl<F> UidGenerator for F
where
    F: Fn(usize) -> String + Send + Sync,
{
    fn generate(&self, length: usize) -> String {
        self(length)
    }
}

/// Uniformly random identifiers over [`UID_ALPHABET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUid;

impl UidGenerator for RandomUid {
    fn generate(&self, length: usize) -> String {
        let mut rng = rand::rng();
        (0..length)
            .map(|_| UID_ALPHABET[rng.random_range(0..UID_ALPHABET.len())] as char)
            .collect()
    }
}

/// Uids claimed by an in-flight allocation but not yet committed to a store.
#[derive(Debug, Default)]
pub struct Reservations {
    claimed: Mutex<HashSet<String>>,
}

impl Reservations {
    /// Create an empty reservation set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `uid`. Returns `false` if someone else already holds it.
    pub fn claim(&self, uid: &str) -> bool {
        let mut claimed = self.claimed.lock();
        if claimed.contains(uid) {
            return false;
        }
        claimed.insert(uid.to_string())
    }

    /// Give up a claim. No-op if `uid` is not claimed.
    pub fn release(&self, uid: &str) {
        self.claimed.lock().remove(uid);
    }

    /// Check if `uid` is currently claimed.
    pub fn contains(&self, uid: &str) -> bool {
        self.claimed.lock().contains(uid)
    }

    /// Number of outstanding claims.
    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    /// Check if there are no outstanding claims.
    pub fn is_empty(&self) -> bool {
        self.claimed.lock().is_empty()
    }
}

/// Allocate a uid that is claimed in `reservations` and for which `taken`
/// answered `false`.
///
/// The returned uid stays claimed; the caller releases it once the session is
/// reachable through the store, so `taken` sees it from then on.
pub(crate) fn allocate<G, F>(
    generator: &G,
    length: usize,
    reservations: &Reservations,
    taken: F,
) -> String
where
    G: UidGenerator + ?Sized,
    F: Fn(&str) -> bool,
{
    let mut collisions: u64 = 0;

    loop {
        let candidate = generator.generate(length);

        if reservations.claim(&candidate) {
            if !taken(&candidate) {
                if collisions > 0 {
                    trace!(collisions, "Allocated uid after retries");
                }
                return candidate;
            }
            reservations.release(&candidate);
        }

        collisions += 1;
        trace!(uid = %prefix(&candidate), collisions, "Uid collision, regenerating");

        if collisions % RETRY_WARN_INTERVAL == 0 {
            warn!(
                collisions,
                length,
                "Uid allocation keeps colliding; identifier space may be exhausted"
            );
        }
    }
}

/// Leading characters of a uid, safe to put in logs.
pub(crate) fn prefix(uid: &str) -> &str {
    uid.get(..6).unwrap_or(uid)
}
