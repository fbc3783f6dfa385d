//! The inbound side of the upgrade: headers, path and URL reconstruction.
//!
//! - [`Headers`]: ordered header list with case-insensitive lookup
//! - [`HandshakeRequest`]: what negotiation needs to know about the request
//! - [`read_request_head`]: parse a raw HTTP/1.1 request line and header block
//! - [`is_upgrade_request`]: routing predicate for upgrade requests

use std::fmt;
use std::io::{BufRead, Read};

use crate::error::UpgradeError;

/// Request headers in arrival order. Lookup ignores ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value whose name matches `name` case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every entry named `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

/// The parts of an upgrade request that negotiation reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    /// Whether the request arrived over TLS (selects `wss` in location URLs).
    pub secure: bool,
}

impl HandshakeRequest {
    /// Build a `GET` request for `target`, which may carry a `?query`.
    pub fn new(target: &str, headers: Headers) -> Self {
        let (path, query) = split_target(target);
        HandshakeRequest {
            method: "GET".to_string(),
            path,
            query,
            headers,
            secure: false,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Absolute `ws://` / `wss://` URL of this request, or `None` without a
    /// `Host` header.
    pub fn location_url(&self) -> Option<String> {
        let host = self.headers.get("Host")?;
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut location = format!("{}://{}{}", scheme, host, self.path);
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            location.push('?');
            location.push_str(query);
        }
        Some(location)
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

/// Whether `headers` ask for a WebSocket upgrade.
///
/// Mirrors the first two negotiation checks so a router can pick the upgrade
/// handler without running negotiation.
pub fn is_upgrade_request(headers: &Headers) -> bool {
    let upgrade = headers
        .get("Upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    upgrade && headers.get("Connection") == Some("Upgrade")
}

/// Read the request line and headers of an HTTP/1.1 request.
///
/// Stops at the blank line ending the header block; body bytes are left in
/// `reader`. Fails if the head exceeds `limit` bytes or the stream ends
/// first.
pub fn read_request_head<R: BufRead>(
    reader: &mut R,
    limit: usize,
) -> Result<HandshakeRequest, UpgradeError> {
    let mut consumed = 0usize;
    let mut next_line = |reader: &mut R| -> Result<String, UpgradeError> {
        let mut raw = Vec::new();
        // One byte past the limit is enough to tell that it was crossed.
        let remaining = (limit - consumed) as u64 + 1;
        let n = Read::take(&mut *reader, remaining).read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Err(UpgradeError::Request("unexpected end of request head".into()));
        }
        consumed += n;
        if consumed > limit {
            return Err(UpgradeError::Request(format!(
                "request head exceeds {} bytes",
                limit
            )));
        }
        let line = String::from_utf8(raw)
            .map_err(|_| UpgradeError::Request("request head is not UTF-8".into()))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    };

    let request_line = next_line(reader)?;
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m.to_string(), t.to_string()),
        _ => {
            return Err(UpgradeError::Request(format!(
                "malformed request line: {}",
                request_line
            )))
        }
    };

    let mut headers = Headers::new();
    loop {
        let line = next_line(reader)?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim(), value.trim());
        }
    }

    let (path, query) = split_target(&target);
    Ok(HandshakeRequest {
        method,
        path,
        query,
        headers,
        secure: false,
    })
}
