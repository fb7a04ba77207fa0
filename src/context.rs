//! Per-call execution context.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::HeaderMap;
use serde_json::{Map, Value};

use crate::protocol::CanonicalRequest;

/// Everything known about one call once the caller's address and the
/// normalized request are both available.
///
/// Function implementations and hooks receive it; it lives until the reply
/// has been written.
#[derive(Debug)]
pub struct Context {
    /// Host-supplied fields, copied into every context.
    pub extra: Map<String, Value>,
    pub ip: String,
    pub request: CanonicalRequest,
    started: Instant,
}

impl Context {
    pub(crate) fn new(extra: Map<String, Value>, ip: String, request: CanonicalRequest) -> Self {
        Self { extra, ip, request, started: Instant::now() }
    }

    /// Time since the context was built.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Resolves the caller's address.
///
/// Proxy headers take precedence over the socket peer: `x-client-ip`, then
/// the first hop of `x-forwarded-for`, then `x-real-ip`.
pub(crate) fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    if let Some(ip) = header(headers, "x-client-ip") {
        return Some(ip.to_owned());
    }
    if let Some(first) = header(headers, "x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return Some(first.to_owned());
        }
    }
    if let Some(ip) = header(headers, "x-real-ip") {
        return Some(ip.to_owned());
    }
    remote.map(|addr| addr.ip().to_string())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
