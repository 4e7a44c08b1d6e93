use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use bytes::Bytes;
use http::HeaderMap;

use crate::cache::{Cache, CacheKey, CacheStatus, Payload};
use crate::logging::log_request;
use crate::request::RequestDescriptor;
use crate::settings::Settings;

mod encoding;
mod forward;

pub use forward::{Forward, ForwardError, ForwardResponse, ReqwestForward, RetryForward};

/// A response as handed back to the host pipeline, indistinguishable in shape
/// from a live one apart from the provenance flag.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// True when the response was replayed from disk without a network call.
    pub from_cache: bool,
}

/// Diagnostic record for a request's cache state, produced without any
/// network activity.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub url: String,
    pub status: CacheStatus,
    pub key: String,
    pub digest: String,
    pub path: PathBuf,
}

/// The cache hook in the request pipeline: consult the disk cache, fall back
/// to the injected transport, persist what came back.
///
/// Redirect and retry handling live outside this type. The host is expected
/// to resolve redirects before a request reaches `intercept` (so each hop is
/// cached individually) and to retry inside the `Forward` capability (so only
/// settled outcomes are cached).
pub struct Client {
    cache: Cache,
    settings: Settings,
    ignore_params: HashSet<String>,
    proxy: Option<(String, u16)>,
}

impl Client {
    pub fn new(settings: Settings) -> Self {
        let cache = Cache::new(settings.cache_options());
        let ignore_params = settings.ignore_params_set();
        let proxy = settings.proxy_host_port();
        Self {
            cache,
            settings,
            ignore_params,
            proxy,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Answer `request` from the cache, or perform the real call via
    /// `forward` and persist the outcome. Recognized transport failures are
    /// cached as sentinel responses and replayed on later calls; failures
    /// attributable to the configured proxy are re-raised uncached.
    pub async fn intercept(
        &self,
        request: &RequestDescriptor,
        forward: &dyn Forward,
    ) -> Result<Response> {
        let key = CacheKey::new(request, &self.ignore_params)?;

        if self.settings.log_requests
            && let Ok(status) = self.cache.status(&key)
        {
            log_request(&request.method, &request.url, status);
        }

        let mut response = match self.cache.read(&key)? {
            Some(payload) => Response {
                status: payload.status,
                reason: payload.reason.clone(),
                headers: payload.header_map(),
                body: payload.body.clone(),
                from_cache: true,
            },
            None => {
                let settled = self.perform(request, forward).await?;
                let mut payload = Payload::from_parts(
                    settled.status,
                    &settled.reason,
                    &settled.headers,
                    settled.body.clone(),
                );
                payload.comment = format!(
                    "{} {}",
                    request.method.as_str().to_ascii_uppercase(),
                    request.url
                );
                self.cache.write(&key, &payload)?;
                Response {
                    status: settled.status,
                    reason: settled.reason,
                    headers: settled.headers,
                    body: settled.body,
                    from_cache: false,
                }
            }
        };

        encoding::encode_body(&mut response, self.settings.utf8);
        Ok(response)
    }

    /// Cache status for `request` without touching the network.
    pub fn status(&self, request: &RequestDescriptor) -> Result<StatusReport> {
        let key = CacheKey::new(request, &self.ignore_params)?;
        Ok(StatusReport {
            url: request.url.to_string(),
            status: self.cache.status(&key)?,
            key: key.key().to_string(),
            digest: key.digest().to_string(),
            path: self.cache.disk_path(&key),
        })
    }

    async fn perform(
        &self,
        request: &RequestDescriptor,
        forward: &dyn Forward,
    ) -> Result<ForwardResponse> {
        match forward.call(request).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_transport_failure() => {
                // A flaky proxy must not poison the cache.
                if self.is_proxy_error(&err) {
                    return Err(err.into());
                }
                Ok(ForwardResponse {
                    status: crate::ERROR_STATUS,
                    reason: err.to_string(),
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Heuristic: a connection failure whose text names the configured proxy
    /// host followed by its port is attributed to the proxy.
    fn is_proxy_error(&self, err: &ForwardError) -> bool {
        let Some((host, port)) = &self.proxy else {
            return false;
        };
        if !err.is_connection_failure() {
            return false;
        }
        let text = err.to_string();
        match text.find(host.as_str()) {
            Some(index) => text[index + host.len()..].contains(&port.to_string()),
            None => false,
        }
    }
}
