use bytes::Bytes;
use http::{HeaderMap, Method, Uri, header};

/// One outbound HTTP request as seen by the cache. Supplied by the caller,
/// immutable for the duration of a single lookup.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: Uri) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// True when the request declares a form-encoded body. Form bodies get the
    /// same canonicalization treatment as query strings.
    pub fn is_form_encoded(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == "application/x-www-form-urlencoded")
            .unwrap_or(false)
    }
}
