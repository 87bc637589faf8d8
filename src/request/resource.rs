//! Upload sources for multipart bodies.
//!
//! A [`Resource`] is either a local file or a remote URL. Both are opened
//! lazily, only when the body is serialized, so a retried request re-reads the
//! source from the start.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use url::Url;

/// Readable byte stream handed out by resources and responses.
pub type ByteStream = Box<dyn Read + Send>;

/// Number of leading bytes inspected when sniffing a content type.
const SNIFF_LEN: usize = 16;

/// A file or URL queued for upload under a form field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    File { field: String, path: PathBuf },
    Remote { field: String, url: Url },
}

impl Resource {
    pub fn file(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Resource::File {
            field: field.into(),
            path: path.into(),
        }
    }

    pub fn remote(field: impl Into<String>, url: Url) -> Self {
        Resource::Remote {
            field: field.into(),
            url,
        }
    }

    /// Form field the resource is submitted under.
    pub fn field_name(&self) -> &str {
        match self {
            Resource::File { field, .. } | Resource::Remote { field, .. } => field,
        }
    }

    /// Name written into the `filename` attribute of the part.
    pub fn display_name(&self) -> String {
        match self {
            Resource::File { path, .. } => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Resource::Remote { url, .. } => url.path().to_string(),
        }
    }

    /// Open a fresh stream over the resource's bytes.
    pub async fn open_read_stream(&self) -> io::Result<ByteStream> {
        match self {
            Resource::File { path, .. } => Ok(Box::new(File::open(path)?)),
            Resource::Remote { url, .. } => {
                let response = reqwest::get(url.as_str())
                    .await
                    .map_err(|err| io::Error::other(err.to_string()))?;
                if !response.status().is_success() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} returned {}", url, response.status()),
                    ));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|err| io::Error::other(err.to_string()))?;
                Ok(Box::new(Cursor::new(bytes)))
            }
        }
    }

    /// Part content type for a resource whose stream starts with `head`:
    /// sniffed from the bytes, then guessed from the display name, then `default`.
    pub fn content_type(&self, head: &[u8], default: &str) -> String {
        sniff_content_type(head)
            .or_else(|| guess_content_type_from_name(&self.display_name()))
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }
}

/// Read up to [`SNIFF_LEN`] bytes from `stream`.
pub(crate) fn read_head(stream: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    stream.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Recognise a handful of well-known magic numbers.
pub fn sniff_content_type(head: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"<?xml", "application/xml"),
        (b"#def", "image/x-bitmap"),
        (b"! XPM2", "image/x-pixmap"),
    ];

    if let Some((_, content_type)) = SIGNATURES.iter().find(|(sig, _)| head.starts_with(sig)) {
        return Some(*content_type);
    }

    let lowered = head.to_ascii_lowercase();
    if lowered.starts_with(b"<!doctype html") || lowered.starts_with(b"<html") {
        return Some("text/html");
    }
    None
}

/// Guess a content type from a file name extension.
pub fn guess_content_type_from_name(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "txt" | "text" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(content_type)
}
