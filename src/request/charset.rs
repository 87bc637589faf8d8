//! Character sets understood by the body encoder.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Failures while turning body text into bytes.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),
    #[error("character {ch:?} cannot be encoded as {charset}")]
    Unmappable { ch: char, charset: Charset },
    #[error("i/o error while encoding body: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported body charsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Iso8859_1,
    UsAscii,
}

impl Charset {
    /// Canonical name, as written into `Content-Type` and `Accept-Charset`.
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::UsAscii => "US-ASCII",
        }
    }

    /// Encode `text` into this charset.
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>, EncodingError> {
        match self {
            Charset::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            Charset::UsAscii if text.is_ascii() => Ok(Cow::Borrowed(text.as_bytes())),
            Charset::Iso8859_1 if text.is_ascii() => Ok(Cow::Borrowed(text.as_bytes())),
            Charset::UsAscii => Err(self.unmappable(text, 0x7f)),
            Charset::Iso8859_1 => {
                let mut out = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xff {
                        return Err(EncodingError::Unmappable { ch, charset: *self });
                    }
                    out.push(code as u8);
                }
                Ok(Cow::Owned(out))
            }
        }
    }

    /// Decode `bytes` from this charset, replacing malformed UTF-8 sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Iso8859_1 | Charset::UsAscii => bytes.iter().map(|b| *b as char).collect(),
        }
    }

    fn unmappable(&self, text: &str, max: u32) -> EncodingError {
        let ch = text
            .chars()
            .find(|ch| (*ch as u32) > max)
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        EncodingError::Unmappable { ch, charset: *self }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Charset {
    type Err = EncodingError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Charset::Iso8859_1),
            "us-ascii" | "ascii" => Ok(Charset::UsAscii),
            _ => Err(EncodingError::UnsupportedCharset(name.to_string())),
        }
    }
}
