//! Configuration for a session store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Cookie name used when [`Requirements::default_key`] is empty.
pub const DEFAULT_KEY: &str = "_ssid";

/// Inactivity timeout used when [`Requirements::timeout`] is zero (1 hour).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Identifier length used when [`Requirements::uid_length`] is zero.
///
/// With the 68-symbol alphabet of [`RandomUid`](crate::RandomUid) this gives
/// over 600 bits of entropy, so allocation retries are practically never
/// needed.
pub const DEFAULT_UID_LENGTH: usize = 99;

/// Sweep interval used when [`Requirements::cleanup_interval`] is zero.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// External uid existence check, e.g. a lookup in durable storage.
pub type UidExistFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Base setup of a [`SessionStore`](crate::SessionStore).
///
/// `Requirements::default()` is the all-zero configuration. Every field has a
/// fallback, applied by [`normalize`](Self::normalize) when the store is built:
///
/// | field              | unset value | fallback                     |
/// |--------------------|-------------|------------------------------|
/// | `default_key`      | `""`        | [`DEFAULT_KEY`]              |
/// | `timeout`          | zero        | [`DEFAULT_TIMEOUT`]          |
/// | `uid_exist`        | `None`      | predicate returning `false`  |
/// | `uid_length`       | `0`         | [`DEFAULT_UID_LENGTH`]       |
/// | `cleanup_interval` | zero        | [`DEFAULT_CLEANUP_INTERVAL`] |
///
/// # Zero timeout
///
/// A `timeout` of exactly zero means "use [`DEFAULT_TIMEOUT`]". It does not
/// mean "never expire" and it does not mean "expire immediately". To keep
/// sessions for a very long time, set a very large timeout instead.
#[derive(Clone, Default)]
pub struct Requirements {
    /// Cookie name the store reads the session uid from.
    pub default_key: String,

    /// Inactivity window after which a session is dropped unless modified.
    pub timeout: Duration,

    /// Checks whether a uid is taken somewhere outside the store (a database,
    /// another cache). `None` means no external source is consulted.
    pub uid_exist: Option<UidExistFn>,

    /// Length of generated uids.
    pub uid_length: usize,

    /// Interval for the background sweeper, if one is spawned.
    pub cleanup_interval: Duration,
}

impl fmt::Debug for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requirements")
            .field("default_key", &self.default_key)
            .field("timeout", &self.timeout)
            .field("uid_exist", &self.uid_exist.as_ref().map(|_| "<fn>"))
            .field("uid_length", &self.uid_length)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

impl Requirements {
    /// Create the all-zero configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookie name sessions are read from.
    pub fn with_default_key(mut self, key: impl Into<String>) -> Self {
        self.default_key = key.into();
        self
    }

    /// Set the inactivity timeout. Zero selects [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the external uid existence check.
    pub fn with_uid_exist<F>(mut self, uid_exist: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.uid_exist = Some(Arc::new(uid_exist));
        self
    }

    /// Set the length of generated uids.
    pub fn with_uid_length(mut self, length: usize) -> Self {
        self.uid_length = length;
        self
    }

    /// Set the background sweep interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Replace unset fields with their fallbacks.
    ///
    /// Never fails; every input is accepted and coerced.
    pub fn normalize(mut self) -> Self {
        if self.default_key.is_empty() {
            debug!(fallback = DEFAULT_KEY, "Empty default_key, using fallback cookie name");
            self.default_key = DEFAULT_KEY.to_string();
        }

        if self.timeout.is_zero() {
            debug!(
                fallback_secs = DEFAULT_TIMEOUT.as_secs(),
                "Zero timeout means fallback timeout, not no-expiry"
            );
            self.timeout = DEFAULT_TIMEOUT;
        }

        if self.uid_exist.is_none() {
            self.uid_exist = Some(Arc::new(|_: &str| false));
        }

        if self.uid_length == 0 {
            self.uid_length = DEFAULT_UID_LENGTH;
        }

        if self.cleanup_interval.is_zero() {
            self.cleanup_interval = DEFAULT_CLEANUP_INTERVAL;
        }

        self
    }

    /// Ask the external existence check about `uid`. `false` when unset.
    pub fn uid_exists(&self, uid: &str) -> bool {
        self.uid_exist.as_ref().is_some_and(|uid_exist| uid_exist(uid))
    }

    /// Parse a TOML requirements section.
    ///
    /// The existence predicate cannot be expressed in TOML; attach it with
    /// [`with_uid_exist`](Self::with_uid_exist) afterwards. Missing keys stay
    /// unset and are filled in by [`normalize`](Self::normalize).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let section: RequirementsSection = toml::from_str(toml_str)?;
        Ok(section.into())
    }
}

/// Serializable form of [`Requirements`].
///
/// ```toml
/// default_key = "_ssid"
/// timeout_secs = 1800
/// uid_length = 64
/// cleanup_interval_secs = 30
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsSection {
    /// Cookie name sessions are read from.
    pub default_key: String,
    /// Inactivity timeout in seconds.
    pub timeout_secs: u64,
    /// Length of generated uids.
    pub uid_length: usize,
    /// Background sweep interval in seconds.
    pub cleanup_interval_secs: u64,
}

impl From<RequirementsSection> for Requirements {
    fn from(section: RequirementsSection) -> Self {
        Self {
            default_key: section.default_key,
            timeout: Duration::from_secs(section.timeout_secs),
            uid_exist: None,
            uid_length: section.uid_length,
            cleanup_interval: Duration::from_secs(section.cleanup_interval_secs),
        }
    }
}

impl From<&Requirements> for RequirementsSection {
    fn from(requirements: &Requirements) -> Self {
        Self {
            default_key: requirements.default_key.clone(),
            timeout_secs: requirements.timeout.as_secs(),
            uid_length: requirements.uid_length,
            cleanup_interval_secs: requirements.cleanup_interval.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_requirements_normalize() {
        let requirements = Requirements::default().normalize();

        assert_eq!(requirements.default_key, "_ssid");
        assert_eq!(requirements.timeout, DEFAULT_TIMEOUT);
        assert!(!requirements.timeout.is_zero());
        assert_eq!(requirements.uid_length, DEFAULT_UID_LENGTH);
        assert_eq!(requirements.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
        assert!(requirements.uid_exist.is_some());
        assert!(!requirements.uid_exists("anything"));
        assert!(!requirements.uid_exists(""));
    }

    #[test]
    fn test_unset_predicate_is_false() {
        let requirements = Requirements::default();
        assert!(!requirements.uid_exists("anything"));
    }

    #[test]
    fn test_normalize_keeps_set_fields() {
        let requirements = Requirements::new()
            .with_default_key("sid")
            .with_timeout(Duration::from_secs(5))
            .with_uid_exist(|uid| uid == "taken")
            .with_uid_length(12)
            .with_cleanup_interval(Duration::from_secs(1))
            .normalize();

        assert_eq!(requirements.default_key, "sid");
        assert_eq!(requirements.timeout, Duration::from_secs(5));
        assert_eq!(requirements.uid_length, 12);
        assert_eq!(requirements.cleanup_interval, Duration::from_secs(1));
        assert!(requirements.uid_exists("taken"));
        assert!(!requirements.uid_exists("free"));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
default_key = "app_session"
timeout_secs = 1800
uid_length = 64
"#;
        let requirements = Requirements::from_toml(toml).unwrap();
        assert_eq!(requirements.default_key, "app_session");
        assert_eq!(requirements.timeout, Duration::from_secs(1800));
        assert_eq!(requirements.uid_length, 64);
        assert!(requirements.cleanup_interval.is_zero());

        let requirements = requirements.normalize();
        assert_eq!(requirements.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
    }

    #[test]
    fn test_from_toml_empty() {
        let requirements = Requirements::from_toml("").unwrap().normalize();
        assert_eq!(requirements.default_key, DEFAULT_KEY);
        assert_eq!(requirements.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_from_toml_invalid() {
        let result = Requirements::from_toml("timeout_secs = \"soon\"");
        assert!(matches!(result, Err(crate::Error::Parse(_))));
    }

    #[test]
    fn test_section_from_requirements() {
        let requirements = Requirements::default().normalize();
        let section = RequirementsSection::from(&requirements);
        assert_eq!(section.default_key, DEFAULT_KEY);
        assert_eq!(section.timeout_secs, 3600);
        assert_eq!(section.uid_length, DEFAULT_UID_LENGTH);
        assert_eq!(section.cleanup_interval_secs, 60);
    }

    #[test]
    fn test_debug_hides_predicate() {
        let requirements = Requirements::new().with_uid_exist(|_| true);
        let rendered = format!("{requirements:?}");
        assert!(rendered.contains("<fn>"));
    }
}
