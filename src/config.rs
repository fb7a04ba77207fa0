//! Server configuration and the process-wide response header set.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

/// Server configuration. Every field has a default, so an empty TOML
/// document is a valid config.
///
/// ```toml
/// port = 8080
/// dynamic_cors_origin = false
/// ignored_url_prefix = "/api"
///
/// [headers]
/// x-powered-by = "rpcgate"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Port [`Server::serve`](crate::Server::serve) listens on.
    pub port: u16,

    /// Echo the caller's `Origin` back instead of sending
    /// `access-control-allow-origin: *`.
    pub dynamic_cors_origin: bool,

    /// Stripped from the start of every path before routing, for deployments
    /// behind a proxy that does not rewrite paths.
    pub ignored_url_prefix: String,

    /// Extra headers sent on every response.
    pub headers: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            dynamic_cors_origin: true,
            ignored_url_prefix: String::new(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Strips [`ignored_url_prefix`](Self::ignored_url_prefix) from `path`.
    ///
    /// The prefix only matches whole segments: with `/api`, `/api/x` becomes
    /// `/x` but `/apiary` is left alone.
    pub(crate) fn route_path<'a>(&self, path: &'a str) -> &'a str {
        let prefix = self.ignored_url_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return path;
        }
        match path.strip_prefix(prefix) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    /// The header set this config starts every server with.
    pub(crate) fn header_set(&self) -> HeaderSet {
        let mut headers = HeaderSet::default();
        headers.add("access-control-allow-methods", "DELETE, HEAD, PUT, POST, PATCH, GET, OPTIONS");
        headers.add("access-control-allow-headers", "Content-Type");
        headers.add("access-control-max-age", "86400");
        headers.add("content-type", "application/json; charset=utf-8");
        if !self.dynamic_cors_origin {
            headers.add("access-control-allow-origin", "*");
        }
        for (name, value) in &self.headers {
            headers.add(name, value);
        }
        headers
    }
}

/// Response headers merged into every response.
///
/// Additive: adding a name that is already present appends `", value"`
/// instead of overwriting. Names are case-insensitive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn add(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.entries.push((name, value.to_owned())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
