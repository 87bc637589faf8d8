//! User-Agent selection.
//!
//! Responsibilities:
//! - Load desktop and mobile user-agent lists from JSON (`browsers.json` is
//!   embedded as the built-in catalog).
//! - Pick an agent for a host: stable for a given host, random otherwise.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::Deserialize;

/// Used when a catalog has no agents at all.
pub const DEFAULT_USER_AGENT: &str = concat!("reqsession-rs/", env!("CARGO_PKG_VERSION"));

/// Source of `User-Agent` header values.
pub trait UserAgentProvider: Send + Sync {
    /// Agent string for a request to `host`.
    fn user_agent(&self, host: Option<&str>, mobile: bool) -> String;
}

/// Desktop and mobile agent lists.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserAgentCatalog {
    #[serde(default)]
    desktop: Vec<String>,
    #[serde(default)]
    mobile: Vec<String>,
}

static BUILTIN: Lazy<Result<UserAgentCatalog, UserAgentError>> =
    Lazy::new(|| UserAgentCatalog::from_json(include_str!("browsers.json")));

impl UserAgentCatalog {
    pub fn new(desktop: Vec<String>, mobile: Vec<String>) -> Self {
        Self { desktop, mobile }
    }

    /// The catalog shipped with the crate.
    pub fn builtin() -> Self {
        match BUILTIN.as_ref() {
            Ok(catalog) => catalog.clone(),
            Err(err) => {
                log::warn!("built-in user-agent catalog unusable: {err}");
                Self::new(Vec::new(), Vec::new())
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self, UserAgentError> {
        let catalog: UserAgentCatalog = serde_json::from_str(json)?;
        if catalog.desktop.is_empty() && catalog.mobile.is_empty() {
            return Err(UserAgentError::Empty);
        }
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, UserAgentError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| UserAgentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn desktop(&self) -> &[String] {
        &self.desktop
    }

    pub fn mobile(&self) -> &[String] {
        &self.mobile
    }

    fn pool(&self, mobile: bool) -> &[String] {
        let (preferred, fallback) = if mobile {
            (&self.mobile, &self.desktop)
        } else {
            (&self.desktop, &self.mobile)
        };
        if preferred.is_empty() { fallback } else { preferred }
    }
}

impl Default for UserAgentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl UserAgentProvider for UserAgentCatalog {
    fn user_agent(&self, host: Option<&str>, mobile: bool) -> String {
        let pool = self.pool(mobile);
        let chosen = match host {
            Some(host) if !pool.is_empty() => {
                let mut hasher = DefaultHasher::new();
                host.to_ascii_lowercase().hash(&mut hasher);
                pool.get((hasher.finish() % pool.len() as u64) as usize)
            }
            _ => pool.choose(&mut thread_rng()),
        };
        chosen
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Always returns the same agent.
#[derive(Debug, Clone)]
pub struct FixedUserAgent(pub String);

impl UserAgentProvider for FixedUserAgent {
    fn user_agent(&self, _host: Option<&str>, _mobile: bool) -> String {
        self.0.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserAgentError {
    #[error("user-agent JSON invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("I/O error reading {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("user-agent catalog has no entries")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads() {
        let catalog = UserAgentCatalog::builtin();
        assert!(!catalog.desktop().is_empty());
        assert!(!catalog.mobile().is_empty());
    }

    #[test]
    fn same_host_gets_same_agent() {
        let catalog = UserAgentCatalog::builtin();
        let first = catalog.user_agent(Some("example.com"), false);
        for _ in 0..5 {
            assert_eq!(catalog.user_agent(Some("EXAMPLE.com"), false), first);
        }
        assert!(catalog.mobile().contains(&catalog.user_agent(Some("example.com"), true)));
    }

    #[test]
    fn mobile_falls_back_to_desktop() {
        let catalog = UserAgentCatalog::from_json(r#"{"desktop": ["only-desktop"]}"#).unwrap();
        assert_eq!(catalog.user_agent(None, true), "only-desktop");
    }

    #[test]
    fn rejects_empty_and_malformed_catalogs() {
        assert!(matches!(
            UserAgentCatalog::from_json(r#"{"desktop": [], "mobile": []}"#),
            Err(UserAgentError::Empty)
        ));
        assert!(matches!(
            UserAgentCatalog::from_json("not json"),
            Err(UserAgentError::InvalidJson(_))
        ));
    }

    #[test]
    fn loads_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        fs::write(&path, r#"{"mobile": ["m"]}"#).unwrap();
        let catalog = UserAgentCatalog::from_path(&path).unwrap();
        assert_eq!(catalog.user_agent(Some("a.b"), false), "m");
        assert!(matches!(
            UserAgentCatalog::from_path(dir.path().join("missing.json")),
            Err(UserAgentError::Io { .. })
        ));
    }
}
