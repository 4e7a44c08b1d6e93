use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use thiserror::Error;
use tracing::debug;

use crate::request::RequestDescriptor;

/// Normalized classification of transport failures. The first three kinds are
/// recoverable into a cached sentinel response; `Other` always propagates.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForwardError {
    /// Network-layer failures that may be cached as sentinel responses.
    pub fn is_transport_failure(&self) -> bool {
        !matches!(self, ForwardError::Other(_))
    }

    /// Only connection failures are candidates for proxy attribution.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ForwardError::ConnectionFailed(_))
    }
}

/// A settled response from the network, before any cache bookkeeping.
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The capability to actually perform a network call. Injected into the
/// client so tests (and other hosts) can substitute their own transport.
#[async_trait]
pub trait Forward: Send + Sync {
    async fn call(&self, request: &RequestDescriptor) -> Result<ForwardResponse, ForwardError>;
}

/// reqwest-backed transport. Redirects are disabled here on purpose: the
/// caller follows them outside the cache so each hop is cached individually.
pub struct ReqwestForward {
    client: reqwest::Client,
}

impl ReqwestForward {
    pub fn new(proxy: Option<&str>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(proxy) = proxy {
            let url = if proxy.contains("://") {
                proxy.to_string()
            } else {
                format!("http://{proxy}")
            };
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Forward for ReqwestForward {
    async fn call(&self, request: &RequestDescriptor) -> Result<ForwardResponse, ForwardError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.to_string())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        Ok(ForwardResponse {
            status: status.as_u16(),
            reason,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> ForwardError {
    let text = full_message(&err);
    if err.is_timeout() {
        return ForwardError::Timeout(text);
    }
    let lower = text.to_ascii_lowercase();
    if lower.contains("tls") || lower.contains("certificate") {
        return ForwardError::Tls(text);
    }
    if err.is_connect() {
        return ForwardError::ConnectionFailed(text);
    }
    ForwardError::Other(anyhow!(err))
}

/// Flatten the source chain so the message carries the underlying cause
/// (reqwest's own Display omits it). Proxy attribution depends on the cause
/// text naming the proxy host and port.
fn full_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Retries transient failures inside the forward capability, so the cache
/// only ever sees a settled outcome. The policy is deliberately liberal:
/// transport failures and 5xx statuses are both retried.
pub struct RetryForward<F> {
    inner: F,
    max_retries: u32,
}

impl<F> RetryForward<F> {
    pub fn new(inner: F, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }
}

#[async_trait]
impl<F: Forward> Forward for RetryForward<F> {
    async fn call(&self, request: &RequestDescriptor) -> Result<ForwardResponse, ForwardError> {
        let mut attempt = 0;
        loop {
            let retryable = match self.inner.call(request).await {
                Ok(response) if response.status < 500 => return Ok(response),
                Ok(response) if attempt >= self.max_retries => return Ok(response),
                Err(err) if !err.is_transport_failure() => return Err(err),
                Err(err) if attempt >= self.max_retries => return Err(err),
                Ok(response) => format!("status {}", response.status),
                Err(err) => err.to_string(),
            };
            attempt += 1;
            debug!(attempt, max = self.max_retries, reason = %retryable, "retrying request");
            tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::sync::Mutex;

    struct ScriptedForward {
        script: Mutex<Vec<Result<ForwardResponse, ForwardError>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedForward {
        fn new(script: Vec<Result<ForwardResponse, ForwardError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Forward for ScriptedForward {
        async fn call(
            &self,
            _request: &RequestDescriptor,
        ) -> Result<ForwardResponse, ForwardError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.script.lock().unwrap().remove(0)
        }
    }

    fn response(status: u16) -> ForwardResponse {
        ForwardResponse {
            status,
            reason: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, "http://example.com".parse().unwrap())
    }

    #[tokio::test]
    async fn retries_transport_failures_until_success() {
        let inner = ScriptedForward::new(vec![
            Err(ForwardError::ConnectionFailed("refused".to_string())),
            Err(ForwardError::Timeout("deadline".to_string())),
            Ok(response(200)),
        ]);
        let retry = RetryForward::new(inner, 3);
        let result = retry.call(&request()).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(retry.inner.calls(), 3);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let inner = ScriptedForward::new(vec![Ok(response(503)), Ok(response(200))]);
        let retry = RetryForward::new(inner, 1);
        let result = retry.call(&request()).await.unwrap();
        assert_eq!(result.status, 200);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = ScriptedForward::new(vec![
            Err(ForwardError::ConnectionFailed("refused".to_string())),
            Err(ForwardError::ConnectionFailed("refused".to_string())),
        ]);
        let retry = RetryForward::new(inner, 1);
        let err = retry.call(&request()).await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(retry.inner.calls(), 2);
    }

    #[tokio::test]
    async fn never_retries_unrecognized_errors() {
        let inner = ScriptedForward::new(vec![Err(ForwardError::Other(anyhow!("boom")))]);
        let retry = RetryForward::new(inner, 5);
        let err = retry.call(&request()).await.unwrap_err();
        assert!(!err.is_transport_failure());
        assert_eq!(retry.inner.calls(), 1);
    }
}
