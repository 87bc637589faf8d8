//! Scripted in-memory transport.
//!
//! [`MemoryConnector`] hands out connections whose responses come from a
//! queue of [`ScriptedResponse`]s and records every request it saw as a
//! [`SentRequest`]. It backs the crate's tests and is handy for exercising
//! session behaviour without a network.

use std::collections::VecDeque;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use url::Url;

use super::{Connection, ConnectionError, Connector, StreamingMode, typed_header};
use crate::request::ByteStream;

/// A canned response served by a [`MemoryConnection`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    /// `None` makes status retrieval fail.
    pub status: Option<u16>,
    pub message: Option<String>,
    pub headers: Vec<(String, String)>,
    pub input: Option<Vec<u8>>,
    pub error: Option<Vec<u8>>,
    /// Makes `input_stream` fail with this error kind.
    pub read_failure: Option<io::ErrorKind>,
}

impl ScriptedResponse {
    /// A response whose body is served through the stream matching its status.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let (input, error) = if status >= 400 {
            (None, Some(body))
        } else {
            (Some(body), None)
        };
        Self {
            status: Some(status),
            input,
            error,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_input(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.input = Some(body.into());
        self
    }

    pub fn with_error(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.error = Some(body.into());
        self
    }

    pub fn without_input(mut self) -> Self {
        self.input = None;
        self
    }

    pub fn without_error(mut self) -> Self {
        self.error = None;
        self
    }

    /// Make the status line unreadable.
    pub fn unknown_status(mut self) -> Self {
        self.status = None;
        self
    }

    pub fn failing_read(mut self, kind: io::ErrorKind) -> Self {
        self.read_failure = Some(kind);
        self
    }
}

/// Everything a [`MemoryConnection`] was configured with before it closed.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub url: Url,
    pub method: Option<Method>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub do_output: bool,
    pub do_input: bool,
    pub streaming: StreamingMode,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub follow_redirects: bool,
    /// How many times the output stream was closed.
    pub output_closes: usize,
}

impl SentRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

type Script = VecDeque<Result<ScriptedResponse, io::ErrorKind>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector serving scripted responses in order.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    sent: Arc<Mutex<Vec<SentRequest>>>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: ScriptedResponse) -> &Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    /// Make the next `open` fail with an I/O error of this kind.
    pub fn push_open_failure(&self, kind: io::ErrorKind) -> &Self {
        lock(&self.script).push_back(Err(kind));
        self
    }

    /// Requests recorded so far, oldest first.
    pub fn sent_requests(&self) -> Vec<SentRequest> {
        lock(&self.sent).clone()
    }

    /// Number of `open` calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn Connection>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.script).pop_front();
        match next {
            Some(Ok(response)) => Ok(Box::new(MemoryConnection::new(
                url.clone(),
                response,
                Arc::clone(&self.sent),
            ))),
            Some(Err(kind)) => Err(ConnectionError::Open {
                url: url.to_string(),
                source: io::Error::new(kind, "scripted open failure"),
            }),
            None => Err(ConnectionError::Open {
                url: url.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no scripted response left"),
            }),
        }
    }
}

/// Connection produced by [`MemoryConnector`].
pub struct MemoryConnection {
    request: SentRequest,
    response: ScriptedResponse,
    sent: Arc<Mutex<Vec<SentRequest>>>,
    completed: bool,
}

impl MemoryConnection {
    fn new(url: Url, response: ScriptedResponse, sent: Arc<Mutex<Vec<SentRequest>>>) -> Self {
        Self {
            request: SentRequest {
                url,
                method: None,
                headers: Vec::new(),
                body: Vec::new(),
                do_output: false,
                do_input: true,
                streaming: StreamingMode::Unbuffered,
                connect_timeout: None,
                read_timeout: None,
                follow_redirects: true,
                output_closes: 0,
            },
            response,
            sent,
            completed: false,
        }
    }

    /// Record the request the first time the response side is touched.
    fn complete(&mut self) {
        if !self.completed {
            self.completed = true;
            lock(&self.sent).push(self.request.clone());
        }
    }

    fn ensure_pending(&self) -> Result<(), ConnectionError> {
        if self.completed {
            Err(ConnectionError::AlreadySent)
        } else {
            Ok(())
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.complete();
    }
}

/// Output channel that counts its own close.
struct RecordingWriter<'a> {
    request: &'a mut SentRequest,
}

impl Write for RecordingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.request.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RecordingWriter<'_> {
    fn drop(&mut self) {
        self.request.output_closes += 1;
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn url(&self) -> &Url {
        &self.request.url
    }

    fn set_do_output(&mut self, enabled: bool) {
        self.request.do_output = enabled;
    }

    fn set_do_input(&mut self, enabled: bool) {
        self.request.do_input = enabled;
    }

    fn set_streaming_mode(&mut self, mode: StreamingMode) {
        self.request.streaming = mode;
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.request.connect_timeout = Some(timeout);
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.request.read_timeout = Some(timeout);
    }

    fn set_follow_redirects(&mut self, follow: bool) {
        self.request.follow_redirects = follow;
    }

    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), ConnectionError> {
        self.ensure_pending()?;
        typed_header(name, value)?;
        let headers = &mut self.request.headers;
        match headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value.to_string(),
            None => headers.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn request_header(&self, name: &str) -> Option<String> {
        self.request.header(name).map(str::to_string)
    }

    fn set_method(&mut self, method: &Method) -> Result<(), ConnectionError> {
        self.ensure_pending()?;
        self.request.method = Some(method.clone());
        Ok(())
    }

    fn output_stream(&mut self) -> Result<Box<dyn Write + Send + '_>, ConnectionError> {
        if !self.request.do_output {
            return Err(ConnectionError::OutputDisabled);
        }
        self.ensure_pending()?;
        Ok(Box::new(RecordingWriter {
            request: &mut self.request,
        }))
    }

    async fn response_code(&mut self) -> io::Result<u16> {
        self.complete();
        self.response
            .status
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed status line"))
    }

    async fn response_message(&mut self) -> io::Result<Option<String>> {
        self.complete();
        Ok(self.response.message.clone())
    }

    fn response_header_values(&self, name: &str) -> Vec<String> {
        self.response
            .headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .collect()
    }

    async fn input_stream(&mut self) -> io::Result<Option<ByteStream>> {
        self.complete();
        if let Some(kind) = self.response.read_failure {
            return Err(io::Error::new(kind, "scripted read failure"));
        }
        Ok(self
            .response
            .input
            .clone()
            .map(|body| Box::new(Cursor::new(body)) as ByteStream))
    }

    async fn error_stream(&mut self) -> Option<ByteStream> {
        self.complete();
        self.response
            .error
            .clone()
            .map(|body| Box::new(Cursor::new(body)) as ByteStream)
    }
}
