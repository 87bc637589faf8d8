//! Reqwest-backed implementation of the [`Connector`] trait.
//!
//! Each [`ReqwestConnection`] buffers its configuration and request body and
//! performs the exchange on first access to the response. Clients are pooled
//! per redirect policy and connect timeout, since reqwest fixes both at client
//! construction time. Transparent decompression and the cookie store are left
//! off: content decoding and cookies are handled above the transport.

use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use reqwest::{Body, Client, redirect::Policy};
use url::Url;

use super::{Connection, ConnectionError, Connector, StreamingMode, typed_header};
use crate::request::ByteStream;

const MAX_REDIRECTS: usize = 10;

type PoolKey = (bool, Option<Duration>);

/// Shares reqwest clients between connections with identical transport settings.
#[derive(Default)]
struct ClientPool {
    clients: Mutex<HashMap<PoolKey, Client>>,
}

impl ClientPool {
    fn client(&self, follow_redirects: bool, connect_timeout: Option<Duration>) -> io::Result<Client> {
        let key = (follow_redirects, connect_timeout);
        let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .redirect(if follow_redirects {
                Policy::limited(MAX_REDIRECTS)
            } else {
                Policy::none()
            })
            .no_gzip()
            .no_brotli()
            .no_deflate();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(to_io_error)?;
        log::debug!(
            "created http client (follow_redirects={follow_redirects}, connect_timeout={connect_timeout:?})"
        );
        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// Opens HTTP(S) connections through reqwest.
#[derive(Clone, Default)]
pub struct ReqwestConnector {
    pool: Arc<ClientPool>,
}

impl ReqwestConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for ReqwestConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn Connection>, ConnectionError> {
        match url.scheme() {
            "http" | "https" => Ok(Box::new(ReqwestConnection::new(
                Arc::clone(&self.pool),
                url.clone(),
            ))),
            other => Err(ConnectionError::UnsupportedScheme(other.to_string())),
        }
    }
}

enum Exchange {
    Pending,
    Completed {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Failed {
        kind: io::ErrorKind,
        message: String,
    },
}

/// A single buffered exchange executed with reqwest.
pub struct ReqwestConnection {
    pool: Arc<ClientPool>,
    url: Url,
    method: Option<Method>,
    headers: HeaderMap,
    do_output: bool,
    do_input: bool,
    streaming: StreamingMode,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    follow_redirects: bool,
    body: Vec<u8>,
    exchange: Exchange,
}

impl ReqwestConnection {
    fn new(pool: Arc<ClientPool>, url: Url) -> Self {
        Self {
            pool,
            url,
            method: None,
            headers: HeaderMap::new(),
            do_output: false,
            do_input: true,
            streaming: StreamingMode::Unbuffered,
            connect_timeout: None,
            read_timeout: None,
            follow_redirects: true,
            body: Vec::new(),
            exchange: Exchange::Pending,
        }
    }

    /// Send the request unless that already happened, remembering the outcome.
    async fn complete(&mut self) -> io::Result<()> {
        if let Exchange::Pending = self.exchange {
            self.exchange = match self.send().await {
                Ok((status, headers, body)) => Exchange::Completed {
                    status,
                    headers,
                    body,
                },
                Err(err) => Exchange::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            };
        }

        match &self.exchange {
            Exchange::Failed { kind, message } => Err(io::Error::new(*kind, message.clone())),
            _ => Ok(()),
        }
    }

    async fn send(&mut self) -> io::Result<(StatusCode, HeaderMap, Bytes)> {
        let client = self.pool.client(self.follow_redirects, self.connect_timeout)?;
        let method = self.method.clone().unwrap_or(if self.do_output {
            Method::POST
        } else {
            Method::GET
        });

        log::debug!("sending {} {}", method, self.url);
        let mut request = client
            .request(method, self.url.as_str())
            .headers(self.headers.clone());
        if let Some(timeout) = self.read_timeout {
            request = request.timeout(timeout);
        }
        if self.do_output {
            request = request.body(self.request_body()?);
        }

        let response = request.send().await.map_err(to_io_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = if self.do_input {
            response.bytes().await.map_err(to_io_error)?
        } else {
            Bytes::new()
        };
        Ok((status, headers, body))
    }

    fn request_body(&mut self) -> io::Result<Body> {
        let body = std::mem::take(&mut self.body);
        match self.streaming {
            StreamingMode::FixedLength(length) if body.len() as u64 != length => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "declared content length {length} but body has {} bytes",
                    body.len()
                ),
            )),
            StreamingMode::Chunked(size) if size > 0 => {
                let chunks: Vec<Result<Bytes, io::Error>> = body
                    .chunks(size)
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                Ok(Body::wrap_stream(futures_util::stream::iter(chunks)))
            }
            _ => Ok(Body::from(body)),
        }
    }

    fn ensure_pending(&self) -> Result<(), ConnectionError> {
        match self.exchange {
            Exchange::Pending => Ok(()),
            _ => Err(ConnectionError::AlreadySent),
        }
    }

    fn completed_status(&self) -> Option<StatusCode> {
        match &self.exchange {
            Exchange::Completed { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn body_stream(&self) -> Option<ByteStream> {
        match &self.exchange {
            Exchange::Completed { body, .. } => Some(Box::new(Cursor::new(body.clone()))),
            _ => None,
        }
    }
}

#[async_trait]
impl Connection for ReqwestConnection {
    fn url(&self) -> &Url {
        &self.url
    }

    fn set_do_output(&mut self, enabled: bool) {
        self.do_output = enabled;
    }

    fn set_do_input(&mut self, enabled: bool) {
        self.do_input = enabled;
    }

    fn set_streaming_mode(&mut self, mode: StreamingMode) {
        self.streaming = mode;
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = Some(timeout);
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = Some(timeout);
    }

    fn set_follow_redirects(&mut self, follow: bool) {
        self.follow_redirects = follow;
    }

    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), ConnectionError> {
        self.ensure_pending()?;
        let (name, value) = typed_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn request_header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn set_method(&mut self, method: &Method) -> Result<(), ConnectionError> {
        self.ensure_pending()?;
        self.method = Some(method.clone());
        Ok(())
    }

    fn output_stream(&mut self) -> Result<Box<dyn Write + Send + '_>, ConnectionError> {
        if !self.do_output {
            return Err(ConnectionError::OutputDisabled);
        }
        self.ensure_pending()?;
        Ok(Box::new(&mut self.body))
    }

    async fn response_code(&mut self) -> io::Result<u16> {
        self.complete().await?;
        Ok(self.completed_status().map(|status| status.as_u16()).unwrap_or_default())
    }

    async fn response_message(&mut self) -> io::Result<Option<String>> {
        self.complete().await?;
        Ok(self
            .completed_status()
            .and_then(|status| status.canonical_reason())
            .map(str::to_string))
    }

    fn response_header_values(&self, name: &str) -> Vec<String> {
        match &self.exchange {
            Exchange::Completed { headers, .. } => headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn input_stream(&mut self) -> io::Result<Option<ByteStream>> {
        self.complete().await?;
        match self.completed_status() {
            Some(status) if status.as_u16() < 400 => Ok(self.body_stream()),
            _ => Ok(None),
        }
    }

    async fn error_stream(&mut self) -> Option<ByteStream> {
        self.complete().await.ok()?;
        match self.completed_status() {
            Some(status) if status.as_u16() >= 400 => self.body_stream(),
            _ => None,
        }
    }
}

/// Map reqwest failures onto I/O error kinds so retry classification can see them.
fn to_io_error(err: reqwest::Error) -> io::Error {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else if err.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else if err.is_body() || err.is_decode() {
        io::ErrorKind::UnexpectedEof
    } else if err.is_builder() {
        io::ErrorKind::InvalidInput
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, err)
}
