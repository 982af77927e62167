//! Error types for session store operations.
//!
//! Session lookups report "not found" as `None`, never as an error. These
//! variants cover the fallible edges only: cookie transport and config loading.

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cookie source has no cookie with this name.
    #[error("Cookie not found: {0}")]
    CookieNotFound(String),

    /// A `Cookie` header could not be read, or a cookie could not be written
    /// as a `Set-Cookie` header.
    #[error("Invalid cookie header: {0}")]
    InvalidCookieHeader(String),

    /// Failed to parse a TOML requirements section.
    #[error("Failed to parse requirements: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
