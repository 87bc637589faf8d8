//! Reading a completed exchange back into a [`Response`].
//!
//! The decoder picks the body stream according to the status code, unwraps
//! `gzip`/`deflate` content encodings and collects the cookies the response
//! sets. A status line that cannot be read is reported as [`UNKNOWN_STATUS`]
//! rather than as an error.

use std::io::{self, Read};
use std::sync::Arc;

use flate2::read::{DeflateDecoder, GzDecoder};
use thiserror::Error;
use url::Url;

use crate::cookies::CookieProcessor;
use crate::request::{ByteStream, Charset};
use crate::retry::TransientFailure;
use crate::transport::Connection;

/// Status reported when the status line could not be parsed.
pub const UNKNOWN_STATUS: i32 = -1;

const CONTENT_ENCODING: &str = "Content-Encoding";

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("no response stream available from {url}")]
    StreamUnavailable { url: String },
    #[error("failed reading response: {0}")]
    Io(#[from] io::Error),
}

impl TransientFailure for ResponseError {
    fn is_transient(&self) -> bool {
        match self {
            ResponseError::StreamUnavailable { .. } => false,
            ResponseError::Io(err) => err.is_transient(),
        }
    }
}

/// A decoded response: status, cookies and a readable body.
pub struct Response {
    code: i32,
    message: Option<String>,
    cookies: Vec<String>,
    stream: ByteStream,
    connection: Box<dyn Connection>,
}

impl Response {
    /// Status code, or [`UNKNOWN_STATUS`].
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Raw `Set-Cookie` values carried by this response.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// First value of a response header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.connection.response_header_values(name).into_iter().next()
    }

    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.connection.response_header_values(name)
    }

    pub fn url(&self) -> &Url {
        self.connection.url()
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    /// Decoded body stream.
    pub fn stream(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.stream.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    pub fn into_text(self, charset: Charset) -> io::Result<String> {
        let bytes = self.into_bytes()?;
        Ok(charset.decode(&bytes))
    }

    /// Read the remaining body, returning it alongside the response.
    pub(crate) fn take_body(mut self) -> io::Result<(Self, Vec<u8>)> {
        let mut bytes = Vec::new();
        self.stream.read_to_end(&mut bytes)?;
        Ok((self, bytes))
    }

    /// Serve `body` as the response stream from now on.
    pub(crate) fn with_body(mut self, body: Vec<u8>) -> Self {
        self.stream = Box::new(io::Cursor::new(body));
        self
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cookies", &self.cookies)
            .field("url", &self.connection.url().as_str())
            .finish()
    }
}

/// Turns completed connections into [`Response`]s.
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    cookie_processor: Arc<dyn CookieProcessor>,
}

impl ResponseDecoder {
    pub fn new(cookie_processor: Arc<dyn CookieProcessor>) -> Self {
        Self { cookie_processor }
    }

    pub async fn decode(&self, mut connection: Box<dyn Connection>) -> Result<Response, ResponseError> {
        let code = match connection.response_code().await {
            Ok(code) => i32::from(code),
            Err(err) => {
                log::debug!("no status line from {}: {err}", connection.url());
                UNKNOWN_STATUS
            }
        };
        let message = match connection.response_message().await {
            Ok(message) => message,
            Err(err) => {
                log::debug!("no status message from {}: {err}", connection.url());
                None
            }
        };

        let raw = select_stream(connection.as_mut(), code).await?;
        let stream = decode_content(raw, connection.as_ref());
        let cookies = self.cookie_processor.extract(connection.as_ref());
        log::debug!(
            "decoded {} from {} with {} cookie(s)",
            code,
            connection.url(),
            cookies.len()
        );

        Ok(Response {
            code,
            message,
            cookies,
            stream,
            connection,
        })
    }
}

/// Error stream first for failures and unknown statuses, input stream first
/// otherwise; each falls back to the other.
async fn select_stream(connection: &mut dyn Connection, code: i32) -> Result<ByteStream, ResponseError> {
    let stream = if code == UNKNOWN_STATUS || code >= 400 {
        match connection.error_stream().await {
            Some(stream) => Some(stream),
            None => connection.input_stream().await?,
        }
    } else {
        match connection.input_stream().await? {
            Some(stream) => Some(stream),
            None => connection.error_stream().await,
        }
    };

    stream.ok_or_else(|| ResponseError::StreamUnavailable {
        url: connection.url().to_string(),
    })
}

fn decode_content(stream: ByteStream, connection: &dyn Connection) -> ByteStream {
    let encoding = connection
        .response_header_values(CONTENT_ENCODING)
        .into_iter()
        .next()
        .map(|value| value.to_ascii_lowercase());

    match encoding.as_deref() {
        Some(value) if value.contains("gzip") => Box::new(GzDecoder::new(stream)),
        Some(value) if value.contains("deflate") => Box::new(DeflateDecoder::new(stream)),
        _ => stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::{HeaderCookieProcessor, NoCookies};
    use crate::transport::{Connector, MemoryConnector, ScriptedResponse};
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder};
    use std::io::Write;

    async fn decode(response: ScriptedResponse) -> Result<Response, ResponseError> {
        let connector = MemoryConnector::new();
        connector.push_response(response);
        let connection = connector
            .open(&Url::parse("http://example.com/page").unwrap())
            .await
            .unwrap();
        ResponseDecoder::new(Arc::new(HeaderCookieProcessor))
            .decode(connection)
            .await
    }

    #[tokio::test]
    async fn success_reads_input_stream() {
        let response = decode(
            ScriptedResponse::new(200, "hello")
                .with_message("OK")
                .with_error("wrong stream"),
        )
        .await
        .unwrap();
        assert_eq!(response.code(), 200);
        assert_eq!(response.message(), Some("OK"));
        assert_eq!(response.into_text(Charset::Utf8).unwrap(), "hello");
    }

    #[tokio::test]
    async fn errors_prefer_error_stream_and_fall_back() {
        let response = decode(ScriptedResponse::new(404, "not here").with_input("wrong stream"))
            .await
            .unwrap();
        assert_eq!(response.into_bytes().unwrap(), b"not here");

        let response = decode(
            ScriptedResponse::new(500, "")
                .without_error()
                .with_input("fallback"),
        )
        .await
        .unwrap();
        assert_eq!(response.into_bytes().unwrap(), b"fallback");
    }

    #[tokio::test]
    async fn unknown_status_uses_error_stream() {
        let response = decode(
            ScriptedResponse::new(200, "input")
                .with_error("error")
                .unknown_status(),
        )
        .await
        .unwrap();
        assert_eq!(response.code(), UNKNOWN_STATUS);
        assert_eq!(response.into_bytes().unwrap(), b"error");
    }

    #[tokio::test]
    async fn failed_exchange_surfaces_transport_error() {
        let result = decode(
            ScriptedResponse::new(200, "")
                .unknown_status()
                .without_error()
                .failing_read(io::ErrorKind::ConnectionRefused),
        )
        .await;
        assert!(matches!(
            result,
            Err(ResponseError::Io(err)) if err.kind() == io::ErrorKind::ConnectionRefused
        ));
    }

    #[tokio::test]
    async fn missing_streams_fail() {
        let result = decode(ScriptedResponse::new(204, "").without_input()).await;
        assert!(matches!(result, Err(ResponseError::StreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn read_failures_propagate_as_io() {
        let result = decode(ScriptedResponse::new(200, "").failing_read(io::ErrorKind::ConnectionReset)).await;
        let err = result.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn gzip_and_raw_deflate_are_unwrapped() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"zipped text").unwrap();
        let response = decode(
            ScriptedResponse::new(200, gz.finish().unwrap()).with_header("Content-Encoding", "GZIP"),
        )
        .await
        .unwrap();
        assert_eq!(response.into_bytes().unwrap(), b"zipped text");

        let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
        deflate.write_all(b"deflated text").unwrap();
        let response = decode(
            ScriptedResponse::new(200, deflate.finish().unwrap())
                .with_header("content-encoding", "deflate"),
        )
        .await
        .unwrap();
        assert_eq!(response.into_bytes().unwrap(), b"deflated text");
    }

    #[tokio::test]
    async fn collects_cookies_unless_disabled() {
        let response = decode(
            ScriptedResponse::new(200, "")
                .with_header("Set-Cookie", "a=1")
                .with_header("Set-Cookie", "b=2"),
        )
        .await
        .unwrap();
        assert_eq!(response.cookies(), ["a=1", "b=2"]);
        assert_eq!(response.header("set-cookie").as_deref(), Some("a=1"));

        let connector = MemoryConnector::new();
        connector.push_response(ScriptedResponse::new(200, "").with_header("Set-Cookie", "a=1"));
        let connection = connector
            .open(&Url::parse("http://example.com/").unwrap())
            .await
            .unwrap();
        let response = ResponseDecoder::new(Arc::new(NoCookies))
            .decode(connection)
            .await
            .unwrap();
        assert!(response.cookies().is_empty());
    }
}
