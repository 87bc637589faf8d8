//! Transport abstraction used to execute a [`RequestSpec`](crate::RequestSpec).
//!
//! A [`Connector`] opens a [`Connection`] for a URL. The connection is
//! configured (headers, method, timeouts, streaming mode), optionally written
//! to through its output stream, and then read back: status, headers and
//! either the input or the error byte stream.

pub mod executor;
pub mod memory;
pub mod reqwest_client;

use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use thiserror::Error;
use url::Url;

use crate::request::{ByteStream, EncodingError};
use crate::retry::{TransientFailure, is_transient_kind};

pub use executor::ConnectionExecutor;
pub use memory::{MemoryConnector, ScriptedResponse, SentRequest};
pub use reqwest_client::ReqwestConnector;

/// How the request body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    /// The whole body is handed to the transport in one buffer.
    #[default]
    Unbuffered,
    /// The body has exactly this many bytes.
    FixedLength(u64),
    /// The body is streamed in chunks of this size.
    Chunked(usize),
}

/// Opens connections for URLs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// One request/response exchange over the transport.
///
/// Configuration setters must be called before the output stream is opened or
/// any response accessor is used; the first response accessor completes the
/// exchange.
#[async_trait]
pub trait Connection: Send {
    fn url(&self) -> &Url;

    /// Whether the URL scheme carries HTTP semantics (methods, status codes).
    fn is_http(&self) -> bool {
        matches!(self.url().scheme(), "http" | "https")
    }

    fn set_do_output(&mut self, enabled: bool);

    fn set_do_input(&mut self, enabled: bool);

    fn set_streaming_mode(&mut self, mode: StreamingMode);

    fn set_connect_timeout(&mut self, timeout: Duration);

    fn set_read_timeout(&mut self, timeout: Duration);

    fn set_follow_redirects(&mut self, follow: bool);

    /// Set a request header, replacing any previous value.
    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), ConnectionError>;

    fn request_header(&self, name: &str) -> Option<String>;

    fn set_method(&mut self, method: &Method) -> Result<(), ConnectionError>;

    /// Write channel for the request body. Dropping the writer closes it.
    fn output_stream(&mut self) -> Result<Box<dyn Write + Send + '_>, ConnectionError>;

    async fn response_code(&mut self) -> io::Result<u16>;

    async fn response_message(&mut self) -> io::Result<Option<String>>;

    /// All values of a response header, in order of appearance. Empty until
    /// the exchange has completed.
    fn response_header_values(&self, name: &str) -> Vec<String>;

    /// Body stream for successful responses; `None` when unavailable.
    async fn input_stream(&mut self) -> io::Result<Option<ByteStream>>;

    /// Body stream for error responses; `None` when unavailable.
    async fn error_stream(&mut self) -> Option<ByteStream>;
}

/// Failures opening, configuring or writing to a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("request has no target url")]
    MissingUrl,
    #[error("failed to open connection to {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("cannot set method {method} on a {scheme} connection")]
    MethodNotSupported { method: String, scheme: String },
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
    #[error("connection output is disabled")]
    OutputDisabled,
    #[error("request was already sent")]
    AlreadySent,
    #[error("body encoding failed: {0}")]
    Encoding(#[from] EncodingError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransientFailure for ConnectionError {
    fn is_transient(&self) -> bool {
        match self {
            ConnectionError::Open { source, .. } => is_transient_kind(source.kind()),
            ConnectionError::Io(err) => is_transient_kind(err.kind()),
            ConnectionError::Encoding(EncodingError::Io(err)) => is_transient_kind(err.kind()),
            _ => false,
        }
    }
}

/// Convert a header name/value pair into typed `http` values.
pub(crate) fn typed_header(
    name: &str,
    value: &str,
) -> Result<(http::HeaderName, http::HeaderValue), ConnectionError> {
    let header_name = http::HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ConnectionError::InvalidHeader(name.to_string()))?;
    let header_value = http::HeaderValue::from_str(value)
        .map_err(|_| ConnectionError::InvalidHeader(name.to_string()))?;
    Ok((header_name, header_value))
}
