//! Cookie persistence between requests of a session.
//!
//! Cookies are kept as the raw `Set-Cookie` strings received from servers.
//! A [`CookieProcessor`] decides how they travel: which request header they
//! are injected into and which response headers they are extracted from.

use std::fmt;

use crate::transport::{Connection, ConnectionError};

const COOKIE_HEADER: &str = "Cookie";
const SET_COOKIE_HEADER: &str = "Set-Cookie";

/// Insertion-ordered set of raw cookie strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    cookies: Vec<String>,
}

impl CookieSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cookie unless an identical string is already present.
    pub fn insert(&mut self, cookie: impl Into<String>) -> bool {
        let cookie = cookie.into();
        if self.cookies.contains(&cookie) {
            return false;
        }
        self.cookies.push(cookie);
        true
    }

    pub fn contains(&self, cookie: &str) -> bool {
        self.cookies.iter().any(|existing| existing == cookie)
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.cookies.iter().map(String::as_str)
    }
}

impl<S: Into<String>> Extend<S> for CookieSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for cookie in iter {
            self.insert(cookie);
        }
    }
}

impl<S: Into<String>> FromIterator<S> for CookieSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CookieSet::new();
        set.extend(iter);
        set
    }
}

/// Moves cookies between a [`CookieSet`] and connections.
pub trait CookieProcessor: Send + Sync + fmt::Debug {
    /// Attach `cookies` to an unsent request.
    fn inject(&self, connection: &mut dyn Connection, cookies: &CookieSet) -> Result<(), ConnectionError>;

    /// Collect the cookies a completed response sets, in header order.
    fn extract(&self, connection: &dyn Connection) -> Vec<String>;
}

/// Standard processor: `Cookie` request header, `Set-Cookie` response headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderCookieProcessor;

impl CookieProcessor for HeaderCookieProcessor {
    fn inject(&self, connection: &mut dyn Connection, cookies: &CookieSet) -> Result<(), ConnectionError> {
        if cookies.is_empty() {
            return Ok(());
        }
        let header = cookies.iter().map(cookie_pair).collect::<Vec<_>>().join("; ");
        log::debug!("sending {} cookie(s) to {}", cookies.len(), connection.url());
        connection.set_request_header(COOKIE_HEADER, &header)
    }

    fn extract(&self, connection: &dyn Connection) -> Vec<String> {
        connection.response_header_values(SET_COOKIE_HEADER)
    }
}

/// Processor that neither sends nor stores cookies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCookies;

impl CookieProcessor for NoCookies {
    fn inject(&self, _connection: &mut dyn Connection, _cookies: &CookieSet) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn extract(&self, _connection: &dyn Connection) -> Vec<String> {
        Vec::new()
    }
}

/// The `name=value` part of a raw `Set-Cookie` string.
fn cookie_pair(raw: &str) -> &str {
    raw.split(';').next().unwrap_or(raw).trim()
}
