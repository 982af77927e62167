//! Cookie transport for session uids.
//!
//! [`CookieSource`] reads an inbound cookie by name; [`CookieSink`] emits an
//! outbound one. Both are implemented for [`cookie::CookieJar`] and for the
//! `http` header map, request and response types.

use cookie::{Cookie, CookieJar};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request, Response};
use tracing::trace;

use crate::error::{Error, Result};

/// Something inbound cookies can be read from.
pub trait CookieSource {
    /// Find the cookie called `name`.
    ///
    /// Returns [`Error::CookieNotFound`] if there is no such cookie.
    fn cookie(&self, name: &str) -> Result<Cookie<'static>>;
}

/// Something outbound cookies can be written to.
pub trait CookieSink {
    /// Emit `cookie`, e.g. as a `Set-Cookie` header.
    fn set_cookie(&mut self, cookie: Cookie<'static>) -> Result<()>;
}

/// Overwrite the name and value of `template` (or of an empty cookie).
///
/// Every other attribute of the template passes through unchanged.
pub fn bind_cookie(
    name: String,
    value: String,
    template: Option<Cookie<'static>>,
) -> Cookie<'static> {
    let mut cookie = template.unwrap_or_else(|| Cookie::new("", ""));
    cookie.set_name(name);
    cookie.set_value(value);
    cookie
}

impl CookieSource for CookieJar {
    fn cookie(&self, name: &str) -> Result<Cookie<'static>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::CookieNotFound(name.to_string()))
    }
}

impl CookieSink for CookieJar {
    fn set_cookie(&mut self, cookie: Cookie<'static>) -> Result<()> {
        self.add(cookie);
        Ok(())
    }
}

impl CookieSource for HeaderMap {
    /// Search every `Cookie` header. Malformed pairs and headers that are
    /// not visible ASCII are skipped.
    fn cookie(&self, name: &str) -> Result<Cookie<'static>> {
        for header in self.get_all(COOKIE) {
            let raw = match header.to_str() {
                Ok(raw) => raw,
                Err(e) => {
                    trace!(error = %e, "Skipping unreadable cookie header");
                    continue;
                }
            };

            for parsed in Cookie::split_parse(raw) {
                match parsed {
                    Ok(cookie) if cookie.name() == name => return Ok(cookie.into_owned()),
                    Ok(_) => {}
                    Err(e) => trace!(error = %e, "Skipping malformed cookie pair"),
                }
            }
        }

        Err(Error::CookieNotFound(name.to_string()))
    }
}

impl CookieSink for HeaderMap {
    fn set_cookie(&mut self, cookie: Cookie<'static>) -> Result<()> {
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| Error::InvalidCookieHeader(e.to_string()))?;
        self.append(SET_COOKIE, value);
        Ok(())
    }
}

impl<B> CookieSource for Request<B> {
    fn cookie(&self, name: &str) -> Result<Cookie<'static>> {
        self.headers().cookie(name)
    }
}

impl<B> CookieSink for Response<B> {
    fn set_cookie(&mut self, cookie: Cookie<'static>) -> Result<()> {
        self.headers_mut().set_cookie(cookie)
    }
}
