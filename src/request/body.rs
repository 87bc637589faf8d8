//! Request body accumulation and serialization.
//!
//! A [`BodyBuffer`] collects either URL-encoded parameters or multipart
//! fields/resources and writes them to a sink on demand. Serialization does
//! not consume the buffer: writing the same state twice produces identical
//! bytes, which is what lets retries and challenge replays regenerate a body.

use std::io::{self, Write};

use url::form_urlencoded;

use super::charset::{Charset, EncodingError};
use super::resource::{Resource, read_head};

/// Line separator required by multipart/form-data.
pub const CRLF: &str = "\r\n";

const PARAM_SEPARATOR: char = '&';

/// Accumulates one pending request body.
#[derive(Debug, Clone)]
pub struct BodyBuffer {
    params: String,
    fields: Vec<(String, String)>,
    resources: Vec<Resource>,
    charset: Charset,
    separator: String,
    boundary: String,
    default_resource_type: String,
}

impl Default for BodyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self {
            params: String::new(),
            fields: Vec::new(),
            resources: Vec::new(),
            charset: Charset::Utf8,
            separator: CRLF.to_string(),
            boundary: default_boundary(),
            default_resource_type: String::new(),
        }
    }

    /// Restore defaults: UTF-8, CRLF and a freshly generated boundary.
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::new();
        self
    }

    /// Drop pending content while keeping charset, separator and boundary.
    pub fn clear(&mut self) -> &mut Self {
        self.params.clear();
        self.fields.clear();
        self.resources.clear();
        self
    }

    pub fn charset(&mut self, charset: Charset) -> &mut Self {
        self.charset = charset;
        self
    }

    /// Override the multipart boundary. Call before adding multipart content.
    pub fn boundary(&mut self, boundary: impl Into<String>) -> &mut Self {
        self.boundary = boundary.into();
        self
    }

    /// Override the multipart line separator. Call before adding multipart content.
    pub fn separator(&mut self, separator: impl Into<String>) -> &mut Self {
        self.separator = separator.into();
        self
    }

    /// Content type used for resources whose type cannot be sniffed or guessed.
    pub fn default_resource_type(&mut self, content_type: impl Into<String>) -> &mut Self {
        self.default_resource_type = content_type.into();
        self
    }

    /// Append `name=value` to the URL-encoded body.
    pub fn param(
        &mut self,
        name: &str,
        value: &str,
        encode: bool,
    ) -> Result<&mut Self, EncodingError> {
        let (name, value) = if encode {
            (self.percent_encode(name)?, self.percent_encode(value)?)
        } else {
            (name.to_string(), value.to_string())
        };

        if !self.params.is_empty() {
            self.params.push(PARAM_SEPARATOR);
        }
        self.params.push_str(&name);
        self.params.push('=');
        self.params.push_str(&value);
        log::debug!("appended request parameter {name}");
        Ok(self)
    }

    pub fn params<I, K, V>(&mut self, params: I, encode: bool) -> Result<&mut Self, EncodingError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in params {
            self.param(name.as_ref(), value.as_ref(), encode)?;
        }
        Ok(self)
    }

    /// Append a text part to the multipart body.
    pub fn multipart_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn multipart_fields<I, K, V>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in fields {
            self.multipart_field(name, value);
        }
        self
    }

    /// Queue a resource; its bytes are read only during serialization.
    pub fn resource(&mut self, resource: Resource) -> &mut Self {
        self.resources.push(resource);
        self
    }

    pub fn file(&mut self, name: impl Into<String>, path: impl Into<std::path::PathBuf>) -> &mut Self {
        self.resource(Resource::file(name, path))
    }

    pub fn files<I, K, P>(&mut self, files: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<std::path::PathBuf>,
    {
        for (name, path) in files {
            self.file(name, path);
        }
        self
    }

    pub fn remote_url(&mut self, name: impl Into<String>, url: url::Url) -> &mut Self {
        self.resource(Resource::remote(name, url))
    }

    pub fn remote_urls<I, K>(&mut self, urls: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, url::Url)>,
        K: Into<String>,
    {
        for (name, url) in urls {
            self.remote_url(name, url);
        }
        self
    }

    pub fn has_output(&self) -> bool {
        self.has_multipart_fields() || self.has_resources() || self.has_params()
    }

    pub fn has_multipart_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    pub fn is_multipart(&self) -> bool {
        self.has_multipart_fields() || self.has_resources()
    }

    pub fn get_charset(&self) -> Charset {
        self.charset
    }

    pub fn get_boundary(&self) -> &str {
        &self.boundary
    }

    pub fn get_separator(&self) -> &str {
        &self.separator
    }

    /// Encoded URL parameters accumulated so far.
    pub fn encoded_params(&self) -> &str {
        &self.params
    }

    /// `Content-Type` matching the body that [`serialize`](Self::serialize) would write.
    pub fn content_type(&self) -> Option<String> {
        if self.is_multipart() {
            Some(format!("multipart/form-data; boundary={}", self.boundary))
        } else if self.has_params() {
            Some(format!(
                "application/x-www-form-urlencoded;charset={}",
                self.charset
            ))
        } else {
            None
        }
    }

    /// Write the body to `sink`. Multipart content wins over URL parameters.
    ///
    /// The sink is flushed but never closed; closing belongs to whoever owns it.
    pub async fn serialize(&self, sink: &mut (dyn Write + Send)) -> Result<(), EncodingError> {
        if self.is_multipart() {
            for (name, value) in &self.fields {
                let block = self.field_block(name, value);
                sink.write_all(&self.charset.encode(&block)?)?;
            }

            for resource in &self.resources {
                self.write_resource(sink, resource).await?;
            }

            let terminal = format!("--{}--{}", self.boundary, self.separator);
            sink.write_all(&self.charset.encode(&terminal)?)?;
        } else if self.has_params() {
            sink.write_all(&self.charset.encode(&self.params)?)?;
        } else {
            log::debug!("nothing to write");
        }

        sink.flush()?;
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub async fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buffer = Vec::new();
        self.serialize(&mut buffer).await?;
        Ok(buffer)
    }

    fn field_block(&self, name: &str, value: &str) -> String {
        let sep = &self.separator;
        format!(
            "--{boundary}{sep}Content-Disposition: form-data; name=\"{name}\"{sep}Content-Type: text/plain; charset={charset}{sep}{sep}{value}{sep}",
            boundary = self.boundary,
            charset = self.charset,
        )
    }

    async fn write_resource(
        &self,
        sink: &mut (dyn Write + Send),
        resource: &Resource,
    ) -> Result<(), EncodingError> {
        let field = resource.field_name();
        let display_name = resource.display_name();
        log::debug!("writing resource {field}={display_name}");

        let mut stream = resource.open_read_stream().await?;
        let head = read_head(&mut stream)?;
        let content_type = resource.content_type(&head, &self.default_resource_type);

        let sep = &self.separator;
        let header = format!(
            "--{boundary}{sep}Content-Disposition: form-data; name=\"{field}\"; filename=\"{display_name}\"{sep}Content-Type: {content_type}{sep}Content-Transfer-Encoding: binary{sep}{sep}",
            boundary = self.boundary,
        );
        sink.write_all(&self.charset.encode(&header)?)?;
        sink.write_all(&head)?;
        io::copy(&mut stream, sink)?;
        flush_quietly(sink);
        sink.write_all(&self.charset.encode(sep)?)?;
        Ok(())
    }

    fn percent_encode(&self, text: &str) -> Result<String, EncodingError> {
        let bytes = self.charset.encode(text)?;
        Ok(form_urlencoded::byte_serialize(&bytes).collect())
    }
}

fn flush_quietly(sink: &mut (dyn Write + Send)) {
    if let Err(err) = sink.flush() {
        log::warn!("failed flushing request body: {err}");
    }
}

/// Lowercase hex encoding of the current epoch milliseconds.
fn default_boundary() -> String {
    format!("{:x}", chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn buffer() -> BodyBuffer {
        let mut body = BodyBuffer::new();
        body.boundary("b0undary");
        body
    }

    #[tokio::test]
    async fn url_params_join_in_call_order() {
        let mut body = buffer();
        assert!(!body.has_output());

        body.param("q", "rust lang", true)
            .unwrap()
            .param("page", "2", false)
            .unwrap()
            .param("tag", "a&b", true)
            .unwrap();

        assert!(body.has_output());
        assert!(!body.is_multipart());
        let bytes = body.to_bytes().await.unwrap();
        assert_eq!(bytes, b"q=rust+lang&page=2&tag=a%26b");
        assert_eq!(
            body.content_type().as_deref(),
            Some("application/x-www-form-urlencoded;charset=UTF-8")
        );
    }

    #[tokio::test]
    async fn multipart_field_layout_is_exact() {
        let mut body = buffer();
        body.multipart_field("title", "hello");

        let text = String::from_utf8(body.to_bytes().await.unwrap()).unwrap();
        assert_eq!(
            text,
            "--b0undary\r\nContent-Disposition: form-data; name=\"title\"\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\nhello\r\n--b0undary--\r\n"
        );
    }

    #[tokio::test]
    async fn multipart_takes_priority_and_ends_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::io::Write::write_all(&mut File::create(&path).unwrap(), b"line one").unwrap();

        let mut body = buffer();
        body.param("ignored", "value", true).unwrap();
        body.multipart_fields([("a", "1"), ("b", "2")]);
        body.file("upload", &path);

        let text = String::from_utf8(body.to_bytes().await.unwrap()).unwrap();
        assert!(text.starts_with("--b0undary\r\n"));
        assert!(text.ends_with("--b0undary--\r\n"));
        assert_eq!(text.matches("--b0undary--").count(), 1);
        assert!(!text.contains("ignored=value"));
        assert!(text.contains(
            "Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\nContent-Type: text/plain\r\nContent-Transfer-Encoding: binary\r\n\r\nline one\r\n"
        ));
    }

    #[tokio::test]
    async fn serialization_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::io::Write::write_all(&mut File::create(&path).unwrap(), &[0u8, 1, 2, 3, 255]).unwrap();

        let mut body = buffer();
        body.default_resource_type("application/octet-stream");
        body.multipart_field("k", "v").file("blob", &path);

        let first = body.to_bytes().await.unwrap();
        let second = body.to_bytes().await.unwrap();
        assert_eq!(first, second);
        assert!(String::from_utf8_lossy(&first).contains("Content-Type: application/octet-stream"));
    }

    #[tokio::test]
    async fn empty_buffer_writes_nothing() {
        let body = buffer();
        assert!(body.to_bytes().await.unwrap().is_empty());
        assert_eq!(body.content_type(), None);
    }

    #[test]
    fn unmappable_characters_fail_encoding() {
        let mut body = buffer();
        body.charset(Charset::UsAscii);
        assert!(matches!(
            body.param("name", "caf\u{e9}", true),
            Err(EncodingError::Unmappable { .. })
        ));
    }

    #[test]
    fn clear_keeps_boundary_reset_replaces_it() {
        let mut body = buffer();
        body.multipart_field("a", "b").clear();
        assert!(!body.has_output());
        assert_eq!(body.get_boundary(), "b0undary");

        body.reset();
        assert_ne!(body.get_boundary(), "b0undary");
        assert_eq!(body.get_separator(), CRLF);
        assert!(body.get_boundary().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
