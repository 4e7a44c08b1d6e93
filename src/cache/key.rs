use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::request::RequestDescriptor;

/// Short request bodies are folded into the key verbatim; anything longer is
/// represented by its digest to keep keys bounded.
const MAX_VERBATIM_BODY: usize = 50;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("http/https required, got {0:?}")]
    UnsupportedScheme(String),
    #[error("hostname required")]
    MissingHost,
}

/// Canonical identity of a request for caching purposes.
///
/// Two requests that differ only in method casing, scheme casing, host
/// casing, a default port, or the order of (non-ignored) query or form body
/// parameters share the same key, digest, and disk path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    key: String,
    digest: String,
    disk_path: PathBuf,
}

impl CacheKey {
    pub fn new(
        request: &RequestDescriptor,
        ignore_params: &HashSet<String>,
    ) -> Result<Self, KeyError> {
        let scheme = request
            .url
            .scheme_str()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(KeyError::UnsupportedScheme(scheme));
        }
        let host = match request.url.host() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(KeyError::MissingHost),
        };

        let key = calculate_key(request, &scheme, &host, ignore_params);
        let digest = content_digest(key.as_bytes());
        let disk_path = Path::new(&host_dir(&host))
            .join(&digest[..3])
            .join(&digest[3..]);

        Ok(Self {
            key,
            digest,
            disk_path,
        })
    }

    /// Canonical human-readable key string.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 32 lowercase hex chars identifying `key`.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Relative path `host_dir/digest[0..3]/digest[3..]`. The three-char split
    /// bounds directory fan-out for large caches.
    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn calculate_key(
    request: &RequestDescriptor,
    scheme: &str,
    host: &str,
    ignore_params: &HashSet<String>,
) -> String {
    let url = &request.url;
    let mut key = String::new();

    key.push_str(request.method.as_str().to_ascii_uppercase().as_str());
    key.push(' ');
    key.push_str(scheme);
    key.push_str("://");
    key.push_str(host);

    let default_port = if scheme == "https" { 443 } else { 80 };
    if let Some(port) = url.port_u16()
        && port != default_port
    {
        key.push(':');
        key.push_str(&port.to_string());
    }

    if url.path() != "/" {
        key.push_str(url.path());
    }

    if let Some(query) = url.query()
        && !query.is_empty()
    {
        key.push('?');
        key.push_str(&canonical_query(query, ignore_params));
    }

    if let Some(body) = &request.body {
        key.push(' ');
        key.push_str(&body_key(request, body, ignore_params));
    }

    key
}

/// Canonical form of a raw (already percent-encoded) query string: drop
/// ignored parameters, sort the remaining pairs lexicographically, rejoin.
fn canonical_query(raw: &str, ignore_params: &HashSet<String>) -> String {
    let mut pairs: Vec<&str> = raw
        .split('&')
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or(pair);
            !ignore_params.contains(name)
        })
        .collect();
    pairs.sort_unstable();
    pairs.join("&")
}

fn body_key(request: &RequestDescriptor, body: &[u8], ignore_params: &HashSet<String>) -> String {
    if request.is_form_encoded() {
        return canonical_query(&String::from_utf8_lossy(body), ignore_params);
    }
    match std::str::from_utf8(body) {
        Ok(text) if text.len() < MAX_VERBATIM_BODY => text.to_string(),
        _ => content_digest(body),
    }
}

/// 128-bit content digest rendered as 32 lowercase hex chars.
pub(crate) fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex()[..32].to_string()
}

/// Cosmetic directory name derived from the host, safe for any filesystem.
fn host_dir(host: &str) -> String {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let mut dir = String::with_capacity(host.len());
    for ch in host.chars() {
        if !matches!(ch, 'a'..='z' | '0'..='9' | '.' | '_' | '-') {
            continue;
        }
        if ch == '.' && dir.ends_with('.') {
            continue;
        }
        dir.push(ch);
    }
    if dir.is_empty() {
        return "any".to_string();
    }
    dir
}
