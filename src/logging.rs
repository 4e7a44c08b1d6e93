use anyhow::{Result, anyhow};
use http::{Method, Uri};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cache::CacheStatus;
use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// One line per intercepted request: "METHOD URL (status)".
pub fn log_request(method: &Method, url: &Uri, status: CacheStatus) {
    tracing::info!(target: "httpdisk", "{method} {url} ({status})");
}
