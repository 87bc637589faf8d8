//! Mutable description of the next request.
//!
//! A [`RequestSpec`] is configured through fluent setters and then handed to
//! [`ConnectionExecutor::build`](crate::transport::ConnectionExecutor::build),
//! which marks it [`BuildState::Consumed`]. The first mutation after that
//! discards the previous headers and body, so each request starts clean while
//! URL, method, timeouts and flags carry over.

pub mod body;
pub mod charset;
pub mod resource;

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use url::Url;

use crate::cookies::{CookieProcessor, HeaderCookieProcessor};
use crate::transport::StreamingMode;

pub use body::{BodyBuffer, CRLF};
pub use charset::{Charset, EncodingError};
pub use resource::{ByteStream, Resource};

const USER_AGENT: &str = "User-Agent";
const ACCEPT_CHARSET: &str = "Accept-Charset";
const CONTENT_TYPE: &str = "Content-Type";

/// Whether the pending state has already been turned into a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildState {
    #[default]
    Open,
    Consumed,
}

/// Builder state for one outgoing request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    url: Option<Url>,
    method: Option<Method>,
    headers: Vec<(String, String)>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    follow_redirects: bool,
    random_user_agent: bool,
    mobile_user_agent: bool,
    chunked_streaming: usize,
    fixed_length_streaming: u64,
    cookie_processor: Arc<dyn CookieProcessor>,
    body: BodyBuffer,
    state: BuildState,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSpec {
    pub fn new() -> Self {
        Self {
            url: None,
            method: None,
            headers: Vec::new(),
            connect_timeout: None,
            read_timeout: None,
            follow_redirects: true,
            random_user_agent: true,
            mobile_user_agent: false,
            chunked_streaming: 0,
            fixed_length_streaming: 0,
            cookie_processor: Arc::new(HeaderCookieProcessor),
            body: BodyBuffer::new(),
            state: BuildState::Open,
        }
    }

    /// Restore every setting to its default.
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::new();
        self
    }

    /// Drop headers and body content without touching other settings.
    pub fn reset_pending_body(&mut self) -> &mut Self {
        self.headers.clear();
        self.body.clear();
        self
    }

    fn ensure_open(&mut self) {
        if self.state == BuildState::Consumed {
            log::trace!("previous request consumed, starting a fresh header/body set");
            self.reset_pending_body();
            self.state = BuildState::Open;
        }
    }

    pub(crate) fn mark_consumed(&mut self) {
        self.state = BuildState::Consumed;
    }

    pub fn url(&mut self, url: Url) -> &mut Self {
        self.ensure_open();
        self.url = Some(url);
        self
    }

    /// Parse and set the target URL.
    pub fn url_str(&mut self, url: &str) -> Result<&mut Self, url::ParseError> {
        let url = Url::parse(url)?;
        Ok(self.url(url))
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.ensure_open();
        self.method = Some(method);
        self
    }

    pub fn get(&mut self) -> &mut Self {
        self.method(Method::GET)
    }

    pub fn post(&mut self) -> &mut Self {
        self.method(Method::POST)
    }

    /// Set a header, replacing any value stored under the same name.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ensure_open();
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.header(name, value);
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.ensure_open();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self
    }

    /// Explicit `User-Agent`; suppresses automatic selection.
    pub fn user_agent(&mut self, agent: impl Into<String>) -> &mut Self {
        self.header(USER_AGENT, agent)
    }

    /// Body charset, also advertised through `Accept-Charset`.
    pub fn charset(&mut self, charset: Charset) -> &mut Self {
        self.header(ACCEPT_CHARSET, charset.name());
        self.body.charset(charset);
        self
    }

    /// `application/x-www-form-urlencoded` in the body charset.
    pub fn form_content_type(&mut self) -> &mut Self {
        let value = format!(
            "application/x-www-form-urlencoded;charset={}",
            self.body.get_charset()
        );
        self.header(CONTENT_TYPE, value)
    }

    /// `multipart/form-data` with the body's current boundary.
    pub fn multipart_content_type(&mut self) -> &mut Self {
        let value = format!("multipart/form-data; boundary={}", self.body.get_boundary());
        self.header(CONTENT_TYPE, value)
    }

    /// `None` leaves the transport default in place.
    pub fn connect_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Self {
        self.ensure_open();
        self.connect_timeout = timeout.into();
        self
    }

    pub fn read_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Self {
        self.ensure_open();
        self.read_timeout = timeout.into();
        self
    }

    pub fn follow_redirects(&mut self, follow: bool) -> &mut Self {
        self.ensure_open();
        self.follow_redirects = follow;
        self
    }

    pub fn random_user_agent(&mut self, enabled: bool) -> &mut Self {
        self.ensure_open();
        self.random_user_agent = enabled;
        self
    }

    /// Prefer mobile agents; also enables automatic selection.
    pub fn mobile_user_agent(&mut self, enabled: bool) -> &mut Self {
        self.ensure_open();
        self.mobile_user_agent = enabled;
        self
    }

    /// Chunk size for chunked streaming; zero disables it.
    pub fn chunked_streaming(&mut self, chunk_size: usize) -> &mut Self {
        self.ensure_open();
        self.chunked_streaming = chunk_size;
        self
    }

    /// Declared body length; zero disables fixed-length streaming.
    pub fn fixed_length_streaming(&mut self, length: u64) -> &mut Self {
        self.ensure_open();
        self.fixed_length_streaming = length;
        self
    }

    pub fn cookie_processor(&mut self, processor: Arc<dyn CookieProcessor>) -> &mut Self {
        self.ensure_open();
        self.cookie_processor = processor;
        self
    }

    /// Mutable access to the pending body.
    pub fn body(&mut self) -> &mut BodyBuffer {
        self.ensure_open();
        &mut self.body
    }

    /// Shorthand for `body().param(..)`.
    pub fn param(&mut self, name: &str, value: &str, encode: bool) -> Result<&mut Self, EncodingError> {
        self.body().param(name, value, encode)?;
        Ok(self)
    }

    pub fn params<I, K, V>(&mut self, params: I, encode: bool) -> Result<&mut Self, EncodingError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.body().params(params, encode)?;
        Ok(self)
    }

    pub fn multipart_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.body().multipart_field(name, value);
        self
    }

    pub fn file(&mut self, name: impl Into<String>, path: impl Into<std::path::PathBuf>) -> &mut Self {
        self.body().file(name, path);
        self
    }

    pub fn remote_url(&mut self, name: impl Into<String>, url: Url) -> &mut Self {
        self.body().remote_url(name, url);
        self
    }

    pub fn get_url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn get_method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// Method that will go on the wire: the configured one, else POST with a
    /// body and GET without.
    pub fn effective_method(&self) -> Method {
        match &self.method {
            Some(method) => method.clone(),
            None if self.body.has_output() => Method::POST,
            None => Method::GET,
        }
    }

    pub fn get_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn get_read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn is_follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn is_random_user_agent(&self) -> bool {
        self.random_user_agent
    }

    pub fn is_mobile_user_agent(&self) -> bool {
        self.mobile_user_agent
    }

    /// Fixed-length streaming wins over chunked when both are configured.
    pub fn streaming_mode(&self) -> StreamingMode {
        if self.fixed_length_streaming > 0 {
            StreamingMode::FixedLength(self.fixed_length_streaming)
        } else if self.chunked_streaming > 0 {
            StreamingMode::Chunked(self.chunked_streaming)
        } else {
            StreamingMode::Unbuffered
        }
    }

    pub fn get_cookie_processor(&self) -> Arc<dyn CookieProcessor> {
        Arc::clone(&self.cookie_processor)
    }

    pub fn body_buffer(&self) -> &BodyBuffer {
        &self.body
    }

    pub fn state(&self) -> BuildState {
        self.state
    }
}
